use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WidgetError;

/// Lifecycle state of a widget instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WidgetState {
  /// Not scheduled, cancelled, or fatally failed.
  #[default]
  Stopped,
  /// Actively scheduled, or the last run succeeded.
  Running,
  /// The last run failed transiently; scheduling continues.
  Warning,
}

impl WidgetState {
  pub fn as_str(&self) -> &'static str {
    match self {
      WidgetState::Stopped => "STOPPED",
      WidgetState::Running => "RUNNING",
      WidgetState::Warning => "WARNING",
    }
  }

  /// Whether the instance is expected to have a pending execution cycle.
  pub fn is_active(&self) -> bool {
    !matches!(self, WidgetState::Stopped)
  }
}

impl fmt::Display for WidgetState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WidgetState {
  type Err = WidgetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "STOPPED" => Ok(WidgetState::Stopped),
      "RUNNING" => Ok(WidgetState::Running),
      "WARNING" => Ok(WidgetState::Warning),
      _ => Err(WidgetError::UnknownState(s.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_state_case_insensitive() {
    assert_eq!("running".parse::<WidgetState>().unwrap(), WidgetState::Running);
    assert_eq!("WARNING".parse::<WidgetState>().unwrap(), WidgetState::Warning);
    assert!("paused".parse::<WidgetState>().is_err());
  }

  #[test]
  fn test_serde_uses_upper_case_names() {
    let json = serde_json::to_string(&WidgetState::Stopped).unwrap();
    assert_eq!(json, "\"STOPPED\"");
  }

  #[test]
  fn test_only_stopped_is_inactive() {
    assert!(!WidgetState::Stopped.is_active());
    assert!(WidgetState::Running.is_active());
    assert!(WidgetState::Warning.is_active());
  }
}
