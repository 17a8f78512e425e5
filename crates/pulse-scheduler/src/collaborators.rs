//! Interfaces of the services the scheduler depends on.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use pulse_widget::{
  ExecutionResult, WidgetExecutionRequest, WidgetParameterDescriptor, WidgetState,
};

use crate::error::{CatalogError, LifecycleError};

/// Owns widget instance state and reacts to execution results.
pub trait WidgetLifecycle: Send + Sync {
  /// Move an instance to `state`.
  fn set_state(
    &self,
    widget_instance_id: i64,
    state: WidgetState,
    at: DateTime<Utc>,
  ) -> BoxFuture<'_, Result<(), LifecycleError>>;

  /// Record an execution result.
  ///
  /// Returns the instance as recorded when it stays scheduled, or `None` once
  /// it has stopped. Only the state, previous data and success flag of the
  /// returned request carry into the next cycle.
  fn process_result(
    &self,
    result: ExecutionResult,
  ) -> BoxFuture<'_, Result<Option<WidgetExecutionRequest>, LifecycleError>>;

  /// Record that a cycle produced no result and stop the instance.
  fn record_no_result(
    &self,
    log: String,
    widget_instance_id: i64,
    project_id: i64,
  ) -> BoxFuture<'_, Result<(), LifecycleError>>;

  /// Move every known instance to [`WidgetState::Stopped`].
  fn reset_all_to_stopped(&self) -> BoxFuture<'_, Result<(), LifecycleError>>;
}

/// Read access to widget definitions and placements.
pub trait WidgetMetadataProvider: Send + Sync {
  /// Parameters currently declared by a widget.
  fn parameter_descriptors(
    &self,
    widget_id: i64,
  ) -> BoxFuture<'_, Result<Vec<WidgetParameterDescriptor>, CatalogError>>;

  /// Instances placed on any grid of a project.
  fn instances_in_project(&self, project_id: i64) -> BoxFuture<'_, Result<Vec<i64>, CatalogError>>;

  /// Instances placed on a grid.
  fn instances_in_grid(&self, grid_id: i64) -> BoxFuture<'_, Result<Vec<i64>, CatalogError>>;
}

/// Decides whether a request may be scheduled at all.
pub trait ExecutabilityCheck: Send + Sync {
  fn is_executable(&self, request: &WidgetExecutionRequest) -> bool;
}

/// Default executability rule.
///
/// A request is executable when its script is non-blank, declares a `run`
/// function and its delay is not negative.
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutability;

impl ExecutabilityCheck for ScriptExecutability {
  fn is_executable(&self, request: &WidgetExecutionRequest) -> bool {
    request.delay_seconds >= 0 && declares_entry_point(&request.script)
  }
}

fn declares_entry_point(script: &str) -> bool {
  let script = script.trim();
  if script.is_empty() {
    return false;
  }
  let compact: String = script.chars().filter(|c| !c.is_whitespace()).collect();
  compact.contains("functionrun(")
    || compact.contains("run=function")
    || compact.contains("run=(")
    || compact.contains("run=async")
}
