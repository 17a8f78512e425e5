use thiserror::Error;

#[derive(Debug, Error)]
pub enum WidgetError {
  #[error("unknown widget state: {0}")]
  UnknownState(String),

  #[error("unknown parameter type: {0}")]
  UnknownParameterType(String),
}
