//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the execution scheduler.
///
/// Every field has a default, so a partial (or empty) JSON document is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Number of workers in each of the two pools.
  pub pool_size: usize,
  /// Delay used when a cycle is started immediately.
  pub immediate_delay_ms: u64,
  /// Minimum time the result task waits for an execution.
  pub timeout_floor_ms: u64,
  /// Retry policy for handing results to the lifecycle collaborator.
  pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      pool_size: 60,
      immediate_delay_ms: 1_000,
      timeout_floor_ms: 60_000,
      retry: RetryConfig::default(),
    }
  }
}

impl SchedulerConfig {
  pub fn immediate_delay(&self) -> Duration {
    Duration::from_millis(self.immediate_delay_ms)
  }

  pub fn timeout_floor(&self) -> Duration {
    Duration::from_millis(self.timeout_floor_ms)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub min_backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      min_backoff_ms: 1_000,
      max_backoff_ms: 10_000,
    }
  }
}
