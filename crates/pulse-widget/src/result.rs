use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a script execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
  /// The script succeeded and returned valid JSON.
  #[default]
  None,
  /// Retryable on the next cycle without operator action.
  Transient,
  /// Stops the instance until it is explicitly rescheduled.
  Fatal,
}

impl ErrorKind {
  pub fn is_error(&self) -> bool {
    !matches!(self, ErrorKind::None)
  }
}

/// Outcome of one script execution. Produced exactly once per execution task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
  pub widget_instance_id: i64,
  pub project_id: i64,
  /// JSON returned by the script, present only on success.
  pub data: Option<String>,
  /// Console output or failure diagnostic, with secret values redacted.
  pub log: Option<String>,
  pub error_kind: ErrorKind,
  pub launched_at: DateTime<Utc>,
}

impl ExecutionResult {
  /// An empty result for the given instance, launched at `launched_at`.
  pub fn empty(widget_instance_id: i64, project_id: i64, launched_at: DateTime<Utc>) -> Self {
    Self {
      widget_instance_id,
      project_id,
      data: None,
      log: None,
      error_kind: ErrorKind::None,
      launched_at,
    }
  }

  pub fn is_success(&self) -> bool {
    self.error_kind == ErrorKind::None && self.data.is_some()
  }
}
