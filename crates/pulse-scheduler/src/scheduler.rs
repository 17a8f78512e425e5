//! The execution scheduler.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use pulse_host_secret::SecretDecryptor;
use pulse_sandbox::Sandbox;
use pulse_widget::{WidgetExecutionRequest, WidgetState};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::awaiting::ResultAwaitingTask;
use crate::collaborators::{ExecutabilityCheck, WidgetLifecycle, WidgetMetadataProvider};
use crate::config::SchedulerConfig;
use crate::error::CatalogError;
use crate::execution::ScriptExecutionTask;
use crate::pool::WorkerPool;
use crate::registry::{TaskPair, TaskRegistry};
use crate::retry::RetryPolicy;

/// The services the scheduler calls out to.
#[derive(Clone)]
pub struct Collaborators {
  pub lifecycle: Arc<dyn WidgetLifecycle>,
  pub metadata: Arc<dyn WidgetMetadataProvider>,
  pub decryptor: Arc<dyn SecretDecryptor>,
  pub executability: Arc<dyn ExecutabilityCheck>,
}

/// The two pools of one scheduler generation.
struct Pools {
  execution: WorkerPool,
  result: WorkerPool,
}

impl Pools {
  fn new(runtime: Handle, size: usize) -> Self {
    Self {
      execution: WorkerPool::new("execution", runtime.clone(), size),
      result: WorkerPool::new("result", runtime, size),
    }
  }

  fn shutdown(&self) {
    self.execution.shutdown();
    self.result.shutdown();
  }
}

struct SchedulerInner {
  config: SchedulerConfig,
  collaborators: Collaborators,
  sandbox: Arc<Sandbox>,
  pools: RwLock<Option<Arc<Pools>>>,
  registry: TaskRegistry,
  generation: AtomicU64,
}

/// Schedules execution cycles of widget instances.
///
/// Cheap to clone; clones drive the same pools and registry. Nothing runs
/// until [`ExecutionScheduler::init`] has been called.
#[derive(Clone)]
pub struct ExecutionScheduler {
  inner: Arc<SchedulerInner>,
}

/// A non-owning reference to a scheduler, held by running tasks.
///
/// Once every [`ExecutionScheduler`] clone is dropped, pending cycles stop
/// rescheduling.
#[derive(Clone)]
pub struct SchedulerHandle {
  inner: Weak<SchedulerInner>,
}

impl SchedulerHandle {
  /// A handle that never resolves to a scheduler.
  pub fn detached() -> Self {
    Self { inner: Weak::new() }
  }

  pub fn upgrade(&self) -> Option<ExecutionScheduler> {
    self.inner.upgrade().map(|inner| ExecutionScheduler { inner })
  }
}

impl ExecutionScheduler {
  pub fn new(config: SchedulerConfig, collaborators: Collaborators, sandbox: Sandbox) -> Self {
    Self {
      inner: Arc::new(SchedulerInner {
        config,
        collaborators,
        sandbox: Arc::new(sandbox),
        pools: RwLock::new(None),
        registry: TaskRegistry::new(),
        generation: AtomicU64::new(0),
      }),
    }
  }

  pub fn handle(&self) -> SchedulerHandle {
    SchedulerHandle {
      inner: Arc::downgrade(&self.inner),
    }
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.inner.config
  }

  pub fn registry(&self) -> &TaskRegistry {
    &self.inner.registry
  }

  pub fn is_initialized(&self) -> bool {
    self.pools().is_some()
  }

  /// (Re)create both pools and reset every instance to stopped.
  ///
  /// Cancels everything the previous pools were running. Outside a tokio
  /// runtime the scheduler stays uninitialised.
  pub async fn init(&self) {
    let Ok(runtime) = Handle::try_current() else {
      error!("scheduler init called outside a tokio runtime");
      return;
    };

    let pools = Arc::new(Pools::new(runtime, self.inner.config.pool_size));
    let previous = self
      .inner
      .pools
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(pools);
    if let Some(previous) = previous {
      previous.shutdown();
    }
    self.inner.registry.clear();

    if let Err(e) = self.inner.collaborators.lifecycle.reset_all_to_stopped().await {
      error!(error = %e, "failed to reset widget instances");
    }

    info!(pool_size = self.inner.config.pool_size, "scheduler initialised");
  }

  /// Cancel everything and release the pools.
  pub fn shutdown(&self) {
    let previous = self
      .inner
      .pools
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(previous) = previous {
      previous.shutdown();
    }
    self.inner.registry.clear();
    info!("scheduler shut down");
  }

  /// Start a new execution cycle for the request's instance.
  ///
  /// Runs after the immediate delay when `start_immediately` is set, after
  /// the request's own delay otherwise. Replaces the instance's registry
  /// entry. Returns a boxed future because cycles reschedule themselves.
  pub fn schedule(
    &self,
    request: WidgetExecutionRequest,
    start_immediately: bool,
  ) -> BoxFuture<'_, ()> {
    Box::pin(async move {
      let Some(pools) = self.pools() else {
        debug!(
          widget_instance_id = request.widget_instance_id,
          "scheduler not initialised, ignoring schedule"
        );
        return;
      };
      let widget_instance_id = request.widget_instance_id;
      let collaborators = &self.inner.collaborators;

      if !collaborators.executability.is_executable(&request) {
        info!(widget_instance_id, "widget instance is not executable");
        self.set_state(widget_instance_id, WidgetState::Stopped).await;
        return;
      }

      if request.current_state == WidgetState::Stopped {
        self.set_state(widget_instance_id, WidgetState::Running).await;
      }

      let delay = if start_immediately {
        self.inner.config.immediate_delay()
      } else {
        Duration::from_secs(u64::try_from(request.delay_seconds).unwrap_or_default())
      };

      let descriptors = match collaborators
        .metadata
        .parameter_descriptors(request.widget_id)
        .await
      {
        Ok(descriptors) => descriptors,
        Err(e) => {
          error!(
            widget_instance_id,
            widget_id = request.widget_id,
            error = %e,
            "failed to fetch parameter descriptors"
          );
          self.set_state(widget_instance_id, WidgetState::Stopped).await;
          return;
        }
      };

      let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
      let pair = TaskPair {
        execution: pools.execution.control(),
        result: pools.result.control(),
        generation,
      };
      self.inner.registry.insert(widget_instance_id, pair.clone());

      let execution = ScriptExecutionTask::new(
        request.clone(),
        descriptors,
        collaborators.decryptor.clone(),
        self.inner.sandbox.clone(),
      );
      let run_id = execution.run_id().to_string();
      let execution = pools
        .execution
        .submit_after(pair.execution, delay, move |cancel| execution.run(cancel));

      let awaiting = ResultAwaitingTask::new(
        request,
        collaborators.lifecycle.clone(),
        self.handle(),
        RetryPolicy::from(&self.inner.config.retry),
        self.inner.config.timeout_floor(),
      );
      let registry = self.inner.registry.clone();
      pools.result.submit_after(pair.result, delay, move |cancel| async move {
        awaiting.run(execution, cancel).await;
        registry.release(widget_instance_id, generation);
      });

      debug!(
        widget_instance_id,
        generation,
        run_id = %run_id,
        delay_ms = delay.as_millis() as u64,
        "execution cycle scheduled"
      );
    })
  }

  /// Schedule every request; one failing request does not stop the others.
  pub async fn schedule_many(&self, requests: Vec<WidgetExecutionRequest>, start_immediately: bool) {
    for request in requests {
      let widget_instance_id = request.widget_instance_id;
      let scheduled = AssertUnwindSafe(self.schedule(request, start_immediately))
        .catch_unwind()
        .await;
      if scheduled.is_err() {
        error!(widget_instance_id, "scheduling widget instance panicked");
      }
    }
  }

  /// Cancel the instance's cycle and stop it.
  ///
  /// Idempotent: the instance ends up stopped whether or not a cycle was
  /// registered.
  pub async fn cancel(&self, widget_instance_id: i64) {
    if let Some(pair) = self.inner.registry.remove(widget_instance_id) {
      pair.cancel();
      debug!(widget_instance_id, generation = pair.generation, "execution cycle cancelled");
    }
    self.set_state(widget_instance_id, WidgetState::Stopped).await;
  }

  /// Cancel the running cycle and start a new one immediately.
  ///
  /// The new cycle starts from the stopped state the cancel left behind.
  pub async fn cancel_and_reschedule(&self, request: WidgetExecutionRequest) {
    self.cancel(request.widget_instance_id).await;
    let request = WidgetExecutionRequest {
      current_state: WidgetState::Stopped,
      ..request
    };
    self.schedule(request, true).await;
  }

  /// Cancel every instance of a project.
  pub async fn cancel_all_for_project(&self, project_id: i64) {
    let instances = self
      .inner
      .collaborators
      .metadata
      .instances_in_project(project_id)
      .await;
    self.cancel_all(instances, "project", project_id).await;
  }

  /// Cancel every instance placed on a grid.
  pub async fn cancel_all_for_grid(&self, grid_id: i64) {
    let instances = self
      .inner
      .collaborators
      .metadata
      .instances_in_grid(grid_id)
      .await;
    self.cancel_all(instances, "grid", grid_id).await;
  }

  async fn cancel_all(&self, instances: Result<Vec<i64>, CatalogError>, scope: &str, id: i64) {
    match instances {
      Ok(instances) => {
        info!(scope, id, count = instances.len(), "cancelling widget instances");
        for widget_instance_id in instances {
          self.cancel(widget_instance_id).await;
        }
      }
      Err(e) => error!(scope, id, error = %e, "failed to list widget instances"),
    }
  }

  fn pools(&self) -> Option<Arc<Pools>> {
    self
      .inner
      .pools
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  async fn set_state(&self, widget_instance_id: i64, state: WidgetState) {
    let outcome = self
      .inner
      .collaborators
      .lifecycle
      .set_state(widget_instance_id, state, Utc::now())
      .await;
    if let Err(e) = outcome {
      warn!(widget_instance_id, state = %state, error = %e, "failed to update widget state");
    }
  }
}
