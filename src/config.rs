//! CLI configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pulse_host_http::HttpConfig;
use pulse_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// Contents of the configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
  pub scheduler: SchedulerConfig,
  pub http: HttpConfig,
}

impl PulseConfig {
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
      .with_context(|| format!("failed to parse config file: {}", path.display()))
  }

  /// Load `explicit`, or the default file when it exists, or the defaults.
  pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit {
      return Self::load(path);
    }
    match default_path() {
      Some(path) if path.exists() => Self::load(&path),
      _ => Ok(Self::default()),
    }
  }
}

/// `~/.pulse/scheduler.json`
pub fn default_path() -> Option<PathBuf> {
  dirs::home_dir().map(|home| home.join(".pulse").join("scheduler.json"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_is_default() {
    let config: PulseConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, PulseConfig::default());
  }

  #[test]
  fn test_partial_sections() {
    let config: PulseConfig = serde_json::from_str(
      r#"{ "scheduler": { "pool_size": 8 }, "http": { "request_timeout_ms": 5000 } }"#,
    )
    .unwrap();

    assert_eq!(config.scheduler.pool_size, 8);
    assert_eq!(config.scheduler.timeout_floor_ms, 60_000);
    assert_eq!(config.http.request_timeout_ms, 5000);
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    assert!(PulseConfig::resolve(Some(Path::new("/nonexistent/pulse.json"))).is_err());
  }
}
