//! Pulse execution scheduler.
//!
//! Decides when each widget instance's script runs. Every execution cycle is
//! a pair of one-shot tasks: a [`ScriptExecutionTask`] that runs the script in
//! the sandbox and a [`ResultAwaitingTask`] that waits for it (bounded by a
//! timeout), hands the result to the [`WidgetLifecycle`] collaborator and
//! schedules the next cycle.
//!
//! ```ignore
//! let scheduler = ExecutionScheduler::new(config, collaborators, sandbox);
//! scheduler.init().await;
//! scheduler.schedule(request, true).await;
//! ```

mod awaiting;
mod collaborators;
mod config;
mod error;
mod events;
mod execution;
mod memory;
mod pool;
mod registry;
mod retry;
mod scheduler;

pub use awaiting::ResultAwaitingTask;
pub use collaborators::{
  ExecutabilityCheck, ScriptExecutability, WidgetLifecycle, WidgetMetadataProvider,
};
pub use config::{RetryConfig, SchedulerConfig};
pub use error::{CatalogError, LifecycleError};
pub use events::{ChannelNotifier, NoopNotifier, Notification, WidgetNotifier};
pub use execution::ScriptExecutionTask;
pub use memory::{InMemoryCatalog, InMemoryLifecycle, InstanceStatus};
pub use pool::{ScheduledTask, TaskControl, TaskOutcome, WorkerPool};
pub use pulse_host_secret::SecretDecryptor;
pub use registry::{TaskPair, TaskRegistry};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use scheduler::{Collaborators, ExecutionScheduler, SchedulerHandle};
