use serde::{Deserialize, Serialize};

use crate::state::WidgetState;

/// Everything needed to schedule one execution cycle of a widget instance.
///
/// Created by the caller for each scheduling call; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetExecutionRequest {
  pub widget_instance_id: i64,
  pub project_id: i64,
  /// The widget definition this instance was created from.
  pub widget_id: i64,
  /// Script source text.
  pub script: String,
  /// Instance properties, encoded as `key=value` lines.
  #[serde(default)]
  pub properties_raw: String,
  /// Data returned by the previous successful execution, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_result_data: Option<String>,
  /// Delay between two executions. Negative values disable scheduling.
  pub delay_seconds: i64,
  /// Maximum time to wait for a result. Values under the scheduler floor are raised.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_seconds: Option<u64>,
  #[serde(default)]
  pub current_state: WidgetState,
  #[serde(default)]
  pub has_previously_succeeded: bool,
}

impl WidgetExecutionRequest {
  /// Build the request for the next cycle after a completed execution.
  pub fn next_cycle(
    &self,
    state: WidgetState,
    previous_result_data: Option<String>,
    has_previously_succeeded: bool,
  ) -> Self {
    Self {
      current_state: state,
      previous_result_data,
      has_previously_succeeded,
      ..self.clone()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request() -> WidgetExecutionRequest {
    WidgetExecutionRequest {
      widget_instance_id: 7,
      project_id: 1,
      widget_id: 3,
      script: "function run() { return '{}'; }".to_string(),
      properties_raw: String::new(),
      previous_result_data: None,
      delay_seconds: 30,
      timeout_seconds: None,
      current_state: WidgetState::Stopped,
      has_previously_succeeded: false,
    }
  }

  #[test]
  fn test_next_cycle_keeps_configuration() {
    let next = request().next_cycle(WidgetState::Running, Some("{\"a\":1}".to_string()), true);

    assert_eq!(next.widget_instance_id, 7);
    assert_eq!(next.delay_seconds, 30);
    assert_eq!(next.current_state, WidgetState::Running);
    assert_eq!(next.previous_result_data.as_deref(), Some("{\"a\":1}"));
    assert!(next.has_previously_succeeded);
  }

  #[test]
  fn test_deserialize_with_defaults() {
    let json = r#"{
      "widget_instance_id": 1,
      "project_id": 2,
      "widget_id": 3,
      "script": "function run() {}",
      "delay_seconds": -1
    }"#;
    let request: WidgetExecutionRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.current_state, WidgetState::Stopped);
    assert_eq!(request.timeout_seconds, None);
    assert!(!request.has_previously_succeeded);
  }
}
