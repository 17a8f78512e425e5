//! Bounded pools of delayed one-shot tasks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Cancellation handle of one submitted task.
///
/// Clones share the same task.
#[derive(Debug, Clone)]
pub struct TaskControl {
  cancel: CancellationToken,
  finished: Arc<AtomicBool>,
}

impl TaskControl {
  fn new(cancel: CancellationToken) -> Self {
    Self {
      cancel,
      finished: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Request cancellation. Does nothing once the task has finished.
  pub fn cancel(&self) {
    if !self.is_finished() {
      self.cancel.cancel();
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Whether the task body ran to completion.
  pub fn is_finished(&self) -> bool {
    self.finished.load(Ordering::Acquire)
  }
}

/// How a submitted task ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
  Completed(T),
  /// Cancelled before or while running.
  Cancelled,
  /// The task panicked.
  Failed(String),
}

/// A task submitted to a [`WorkerPool`].
///
/// Dropping it detaches the task.
#[derive(Debug)]
pub struct ScheduledTask<T> {
  handle: JoinHandle<Option<T>>,
  control: TaskControl,
}

impl<T> ScheduledTask<T> {
  pub fn control(&self) -> &TaskControl {
    &self.control
  }

  /// Wait for the task to end.
  pub async fn outcome(self) -> TaskOutcome<T> {
    match self.handle.await {
      Ok(Some(output)) => TaskOutcome::Completed(output),
      Ok(None) => TaskOutcome::Cancelled,
      Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
      Err(e) => TaskOutcome::Failed(e.to_string()),
    }
  }
}

/// A fixed-size pool running delayed one-shot tasks on a tokio runtime.
///
/// At most `size` task bodies run at once; the rest wait for a permit.
/// Delays elapse concurrently and do not hold a permit.
#[derive(Debug)]
pub struct WorkerPool {
  name: &'static str,
  runtime: Handle,
  permits: Arc<Semaphore>,
  shutdown: CancellationToken,
  tracker: TaskTracker,
}

impl WorkerPool {
  pub fn new(name: &'static str, runtime: Handle, size: usize) -> Self {
    Self {
      name,
      runtime,
      permits: Arc::new(Semaphore::new(size.max(1))),
      shutdown: CancellationToken::new(),
      tracker: TaskTracker::new(),
    }
  }

  /// A control for a task about to be submitted to this pool.
  ///
  /// Shutting the pool down cancels every control it handed out.
  pub fn control(&self) -> TaskControl {
    TaskControl::new(self.shutdown.child_token())
  }

  /// Run `task` after `delay` once a worker is free.
  ///
  /// The task receives its cancellation token. Cancelling the control before
  /// the task starts skips it; cancelling it while it runs drops the task at
  /// its next suspension point.
  pub fn submit_after<F, Fut>(
    &self,
    control: TaskControl,
    delay: Duration,
    task: F,
  ) -> ScheduledTask<Fut::Output>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
  {
    let permits = self.permits.clone();
    let token = control.cancel.clone();
    let finished = control.finished.clone();
    let pool = self.name;

    let body = async move {
      let output = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = async {
          tokio::time::sleep(delay).await;
          let _permit = permits.acquire_owned().await.ok()?;
          Some(task(token.clone()).await)
        } => output,
      };

      match output {
        Some(output) => {
          finished.store(true, Ordering::Release);
          Some(output)
        }
        None => {
          debug!(pool, "task cancelled");
          None
        }
      }
    };

    let handle = self.tracker.spawn_on(body, &self.runtime);
    ScheduledTask { handle, control }
  }

  /// Number of tasks submitted and not yet ended.
  pub fn pending(&self) -> usize {
    self.tracker.len()
  }

  /// Cancel every task of this pool and refuse new permits.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
    self.permits.close();
    self.tracker.close();
    debug!(pool = self.name, pending = self.tracker.len(), "pool shut down");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Instant;

  fn explode() -> u8 {
    panic!("task exploded")
  }

  fn pool(size: usize) -> WorkerPool {
    WorkerPool::new("test", Handle::current(), size)
  }

  #[tokio::test]
  async fn test_task_runs_after_delay() {
    let pool = pool(2);
    let started = Instant::now();

    let task = pool.submit_after(pool.control(), Duration::from_millis(50), |_| async { 7 });
    let control = task.control().clone();

    assert!(matches!(task.outcome().await, TaskOutcome::Completed(7)));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(control.is_finished());
  }

  #[tokio::test]
  async fn test_cancel_before_start() {
    let pool = pool(2);
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();

    let task = pool.submit_after(pool.control(), Duration::from_secs(30), move |_| async move {
      flag.store(true, Ordering::SeqCst);
    });
    task.control().cancel();

    assert!(matches!(task.outcome().await, TaskOutcome::Cancelled));
    assert!(!ran.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_cancel_while_running() {
    let pool = pool(1);
    let task = pool.submit_after(pool.control(), Duration::ZERO, |_| async {
      tokio::time::sleep(Duration::from_secs(30)).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let control = task.control().clone();
    control.cancel();

    assert!(matches!(task.outcome().await, TaskOutcome::Cancelled));
    assert!(!control.is_finished());
  }

  #[tokio::test]
  async fn test_cancel_after_finish_is_ignored() {
    let pool = pool(1);
    let task = pool.submit_after(pool.control(), Duration::ZERO, |_| async {});
    let control = task.control().clone();
    task.outcome().await;

    control.cancel();
    assert!(!control.is_cancelled());
  }

  #[tokio::test]
  async fn test_pool_bounds_concurrency() {
    let pool = pool(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..6)
      .map(|_| {
        let running = running.clone();
        let peak = peak.clone();
        pool.submit_after(pool.control(), Duration::ZERO, move |_| async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          running.fetch_sub(1, Ordering::SeqCst);
        })
      })
      .collect();

    for task in tasks {
      assert!(matches!(task.outcome().await, TaskOutcome::Completed(())));
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
  }

  #[tokio::test]
  async fn test_shutdown_cancels_pending_tasks() {
    let pool = pool(1);
    let task = pool.submit_after(pool.control(), Duration::from_secs(30), |_| async {});
    pool.shutdown();

    assert!(matches!(task.outcome().await, TaskOutcome::Cancelled));
  }

  #[tokio::test]
  async fn test_panicking_task_fails() {
    let pool = pool(1);
    let task = pool.submit_after(pool.control(), Duration::ZERO, |_| async { explode() });

    match task.outcome().await {
      TaskOutcome::Failed(message) => assert!(message.contains("panic")),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }
}
