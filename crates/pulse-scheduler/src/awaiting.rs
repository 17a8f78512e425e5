//! The result awaiting task.

use std::sync::Arc;
use std::time::Duration;

use pulse_widget::{ExecutionResult, WidgetExecutionRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::WidgetLifecycle;
use crate::pool::{ScheduledTask, TaskOutcome};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::scheduler::SchedulerHandle;

/// Waits for one script execution and hands its result on.
///
/// Never fails: every path ends in a state update, or in a fresh cycle when
/// the update itself failed, so an instance is only abandoned by an explicit
/// cancel. Once `cancel` fires the task starts no further cycle.
pub struct ResultAwaitingTask {
  request: WidgetExecutionRequest,
  lifecycle: Arc<dyn WidgetLifecycle>,
  scheduler: SchedulerHandle,
  retry: RetryPolicy,
  timeout_floor: Duration,
}

impl ResultAwaitingTask {
  pub fn new(
    request: WidgetExecutionRequest,
    lifecycle: Arc<dyn WidgetLifecycle>,
    scheduler: SchedulerHandle,
    retry: RetryPolicy,
    timeout_floor: Duration,
  ) -> Self {
    Self {
      request,
      lifecycle,
      scheduler,
      retry,
      timeout_floor,
    }
  }

  /// How long to wait for the execution.
  ///
  /// The request's own timeout when it is at least the floor, the floor
  /// otherwise.
  pub fn effective_timeout(&self) -> Duration {
    match self.request.timeout_seconds.map(Duration::from_secs) {
      Some(timeout) if timeout >= self.timeout_floor => timeout,
      _ => self.timeout_floor,
    }
  }

  #[instrument(
    name = "result_await",
    skip(self, execution, cancel),
    fields(
      widget_instance_id = self.request.widget_instance_id,
      project_id = self.request.project_id,
    )
  )]
  pub async fn run(self, execution: ScheduledTask<ExecutionResult>, cancel: CancellationToken) {
    let control = execution.control().clone();
    let wait = self.effective_timeout();

    match tokio::time::timeout(wait, execution.outcome()).await {
      Ok(TaskOutcome::Completed(_)) if control.is_cancelled() => {
        debug!("execution was cancelled, discarding its result");
      }
      Ok(TaskOutcome::Completed(result)) => self.deliver(result, &cancel).await,
      Ok(TaskOutcome::Cancelled) => {
        debug!("execution cancelled");
      }
      Ok(TaskOutcome::Failed(message)) => {
        error!(error = %message, "execution task failed");
        self.record_no_result(message, &cancel).await;
      }
      Err(_) => {
        control.cancel();
        warn!(timeout_secs = wait.as_secs(), "execution exceeded the timeout");
        self
          .record_no_result(format!("exceeded the timeout of {}s", wait.as_secs()), &cancel)
          .await;
      }
    }
  }

  /// Hand the result to the lifecycle, retrying with backoff.
  ///
  /// The next cycle runs the same script and configuration as this one, with
  /// the state and previous data the lifecycle recorded.
  async fn deliver(&self, result: ExecutionResult, cancel: &CancellationToken) {
    let delivered = retry_with_backoff(&self.retry, "process_result", || {
      self.lifecycle.process_result(result.clone())
    })
    .await;

    match delivered {
      Ok(Some(recorded)) => {
        let next = self.request.next_cycle(
          recorded.current_state,
          recorded.previous_result_data,
          recorded.has_previously_succeeded,
        );
        self.reschedule(next, cancel).await;
      }
      Ok(None) => info!("widget instance stopped"),
      Err(e) => {
        error!(error = %e, "failed to process result, starting a fresh cycle");
        self.reschedule(self.request.clone(), cancel).await;
      }
    }
  }

  async fn record_no_result(&self, log: String, cancel: &CancellationToken) {
    let outcome = self
      .lifecycle
      .record_no_result(log, self.request.widget_instance_id, self.request.project_id)
      .await;

    if let Err(e) = outcome {
      error!(error = %e, "failed to record missing result, starting a fresh cycle");
      self.reschedule(self.request.clone(), cancel).await;
    }
  }

  async fn reschedule(&self, request: WidgetExecutionRequest, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
      debug!("cycle cancelled, not rescheduling");
      return;
    }
    match self.scheduler.upgrade() {
      Some(scheduler) => scheduler.schedule(request, false).await,
      None => debug!("scheduler dropped, not rescheduling"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::future::BoxFuture;
  use pulse_widget::WidgetState;

  struct Unused;

  impl WidgetLifecycle for Unused {
    fn set_state(
      &self,
      _id: i64,
      _state: WidgetState,
      _at: chrono::DateTime<chrono::Utc>,
    ) -> BoxFuture<'_, Result<(), crate::LifecycleError>> {
      Box::pin(async { Ok(()) })
    }

    fn process_result(
      &self,
      _result: ExecutionResult,
    ) -> BoxFuture<'_, Result<Option<WidgetExecutionRequest>, crate::LifecycleError>> {
      Box::pin(async { Ok(None) })
    }

    fn record_no_result(
      &self,
      _log: String,
      _id: i64,
      _project_id: i64,
    ) -> BoxFuture<'_, Result<(), crate::LifecycleError>> {
      Box::pin(async { Ok(()) })
    }

    fn reset_all_to_stopped(&self) -> BoxFuture<'_, Result<(), crate::LifecycleError>> {
      Box::pin(async { Ok(()) })
    }
  }

  fn task(timeout_seconds: Option<u64>) -> ResultAwaitingTask {
    let request = WidgetExecutionRequest {
      widget_instance_id: 1,
      project_id: 1,
      widget_id: 1,
      script: String::new(),
      properties_raw: String::new(),
      previous_result_data: None,
      delay_seconds: 0,
      timeout_seconds,
      current_state: WidgetState::Running,
      has_previously_succeeded: false,
    };
    ResultAwaitingTask::new(
      request,
      Arc::new(Unused),
      SchedulerHandle::detached(),
      RetryPolicy::default(),
      Duration::from_secs(60),
    )
  }

  #[test]
  fn test_timeout_below_floor_uses_floor() {
    assert_eq!(task(Some(1)).effective_timeout(), Duration::from_secs(60));
    assert_eq!(task(None).effective_timeout(), Duration::from_secs(60));
  }

  #[test]
  fn test_timeout_above_floor_is_kept() {
    assert_eq!(task(Some(60)).effective_timeout(), Duration::from_secs(60));
    assert_eq!(task(Some(300)).effective_timeout(), Duration::from_secs(300));
  }
}
