//! Retry with uniformly random backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;

/// How often, and how patiently, an operation is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total number of attempts, the first one included.
  pub max_attempts: u32,
  pub min_backoff: Duration,
  pub max_backoff: Duration,
}

impl RetryPolicy {
  /// A random delay in `[min_backoff, max_backoff]`.
  pub fn backoff(&self) -> Duration {
    if self.max_backoff <= self.min_backoff {
      return self.min_backoff;
    }
    let min = self.min_backoff.as_millis() as u64;
    let max = self.max_backoff.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts,
      min_backoff: Duration::from_millis(config.min_backoff_ms),
      max_backoff: Duration::from_millis(config.max_backoff_ms),
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&RetryConfig::default())
  }
}

/// Run `attempt` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<T, E, F, Fut>(
  policy: &RetryPolicy,
  operation: &str,
  mut attempt: F,
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempts = 0;

  loop {
    attempts += 1;
    match attempt().await {
      Ok(value) => return Ok(value),
      Err(e) if attempts >= max_attempts => return Err(e),
      Err(e) => {
        let delay = policy.backoff();
        warn!(
          operation,
          attempt = attempts,
          max_attempts,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      min_backoff: Duration::from_millis(1),
      max_backoff: Duration::from_millis(5),
    }
  }

  #[test]
  fn test_backoff_stays_in_bounds() {
    let policy = RetryPolicy::default();
    for _ in 0..100 {
      let delay = policy.backoff();
      assert!(delay >= Duration::from_secs(1));
      assert!(delay <= Duration::from_secs(10));
    }
  }

  #[test]
  fn test_backoff_with_inverted_bounds() {
    let policy = RetryPolicy {
      max_attempts: 1,
      min_backoff: Duration::from_millis(50),
      max_backoff: Duration::from_millis(10),
    };
    assert_eq!(policy.backoff(), Duration::from_millis(50));
  }

  #[tokio::test]
  async fn test_succeeds_after_failures() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, String> = retry_with_backoff(&fast_policy(5), "flaky", || {
      let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
      async move {
        if call < 3 {
          Err(format!("failure {}", call))
        } else {
          Ok(call)
        }
      }
    })
    .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<(), String> = retry_with_backoff(&fast_policy(4), "broken", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err("still broken".to_string()) }
    })
    .await;

    assert_eq!(result, Err("still broken".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_zero_attempts_still_tries_once() {
    let calls = AtomicU32::new(0);
    let _: Result<(), String> = retry_with_backoff(&fast_policy(0), "once", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err("no".to_string()) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
