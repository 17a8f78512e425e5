//! Collaborator errors.

/// Errors reported by a [`crate::WidgetLifecycle`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
  /// The widget instance is unknown.
  #[error("widget instance {widget_instance_id} not found")]
  InstanceNotFound { widget_instance_id: i64 },

  /// The state update could not be stored.
  #[error("failed to persist widget instance {widget_instance_id}: {message}")]
  Persistence {
    widget_instance_id: i64,
    message: String,
  },
}

/// Errors reported by a [`crate::WidgetMetadataProvider`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
  /// The widget is unknown.
  #[error("widget {widget_id} not found")]
  WidgetNotFound { widget_id: i64 },

  /// The catalog could not be queried.
  #[error("widget catalog unavailable: {message}")]
  Unavailable { message: String },
}
