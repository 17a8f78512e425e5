//! In-memory collaborators.
//!
//! Back the CLI and the tests; a deployment with persistent storage provides
//! its own implementations of the collaborator traits.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use pulse_widget::{
  ErrorKind, ExecutionResult, WidgetExecutionRequest, WidgetParameterDescriptor, WidgetState,
};
use serde::Serialize;

use crate::collaborators::{WidgetLifecycle, WidgetMetadataProvider};
use crate::error::{CatalogError, LifecycleError};
use crate::events::{NoopNotifier, Notification, WidgetNotifier};

#[derive(Debug, Clone, Copy)]
struct Placement {
  project_id: i64,
  grid_id: i64,
}

/// Widget definitions and instance placements held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
  descriptors: DashMap<i64, Vec<WidgetParameterDescriptor>>,
  placements: DashMap<i64, Placement>,
}

impl InMemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a widget and its parameters, replacing any earlier definition.
  pub fn add_widget(&self, widget_id: i64, descriptors: Vec<WidgetParameterDescriptor>) {
    self.descriptors.insert(widget_id, descriptors);
  }

  /// Place an instance on a grid of a project.
  pub fn place_instance(&self, widget_instance_id: i64, project_id: i64, grid_id: i64) {
    self.placements.insert(
      widget_instance_id,
      Placement {
        project_id,
        grid_id,
      },
    );
  }

  pub fn remove_instance(&self, widget_instance_id: i64) {
    self.placements.remove(&widget_instance_id);
  }

  fn instances_where(&self, matches: impl Fn(&Placement) -> bool) -> Vec<i64> {
    let ids: BTreeSet<i64> = self
      .placements
      .iter()
      .filter(|entry| matches(entry.value()))
      .map(|entry| *entry.key())
      .collect();
    ids.into_iter().collect()
  }
}

impl WidgetMetadataProvider for InMemoryCatalog {
  fn parameter_descriptors(
    &self,
    widget_id: i64,
  ) -> BoxFuture<'_, Result<Vec<WidgetParameterDescriptor>, CatalogError>> {
    let descriptors = self
      .descriptors
      .get(&widget_id)
      .map(|entry| entry.value().clone())
      .ok_or(CatalogError::WidgetNotFound { widget_id });
    Box::pin(async move { descriptors })
  }

  fn instances_in_project(&self, project_id: i64) -> BoxFuture<'_, Result<Vec<i64>, CatalogError>> {
    let ids = self.instances_where(|placement| placement.project_id == project_id);
    Box::pin(async move { Ok(ids) })
  }

  fn instances_in_grid(&self, grid_id: i64) -> BoxFuture<'_, Result<Vec<i64>, CatalogError>> {
    let ids = self.instances_where(|placement| placement.grid_id == grid_id);
    Box::pin(async move { Ok(ids) })
  }
}

/// Current view of one widget instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatus {
  pub widget_instance_id: i64,
  pub project_id: i64,
  pub state: WidgetState,
  pub previous_data: Option<String>,
  pub has_previously_succeeded: bool,
  pub last_error_kind: ErrorKind,
  pub last_log: Option<String>,
  pub updated_at: DateTime<Utc>,
}

struct InstanceRecord {
  request: WidgetExecutionRequest,
  status: InstanceStatus,
}

/// Widget instance state machine held in memory.
///
/// Successful results keep the instance running and feed their data to the
/// next cycle. Transient failures move it to warning and keep it scheduled.
/// Fatal failures and missing results stop it.
pub struct InMemoryLifecycle<N = NoopNotifier> {
  instances: DashMap<i64, InstanceRecord>,
  notifier: N,
}

impl InMemoryLifecycle<NoopNotifier> {
  pub fn new() -> Self {
    Self::with_notifier(NoopNotifier)
  }
}

impl Default for InMemoryLifecycle<NoopNotifier> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N: WidgetNotifier> InMemoryLifecycle<N> {
  pub fn with_notifier(notifier: N) -> Self {
    Self {
      instances: DashMap::new(),
      notifier,
    }
  }

  /// Track an instance. Its state, previous data and success flag are taken
  /// from the request.
  pub fn register(&self, request: WidgetExecutionRequest) {
    let status = InstanceStatus {
      widget_instance_id: request.widget_instance_id,
      project_id: request.project_id,
      state: request.current_state,
      previous_data: request.previous_result_data.clone(),
      has_previously_succeeded: request.has_previously_succeeded,
      last_error_kind: ErrorKind::None,
      last_log: None,
      updated_at: Utc::now(),
    };
    self
      .instances
      .insert(request.widget_instance_id, InstanceRecord { request, status });
  }

  pub fn status(&self, widget_instance_id: i64) -> Option<InstanceStatus> {
    self
      .instances
      .get(&widget_instance_id)
      .map(|record| record.status.clone())
  }

  pub fn state(&self, widget_instance_id: i64) -> Option<WidgetState> {
    self
      .instances
      .get(&widget_instance_id)
      .map(|record| record.status.state)
  }

  /// The request that would start the instance's next cycle.
  pub fn request(&self, widget_instance_id: i64) -> Option<WidgetExecutionRequest> {
    self.instances.get(&widget_instance_id).map(|record| {
      let status = &record.status;
      record.request.next_cycle(
        status.state,
        status.previous_data.clone(),
        status.has_previously_succeeded,
      )
    })
  }

  pub fn requests(&self) -> Vec<WidgetExecutionRequest> {
    let mut ids: Vec<i64> = self.instances.iter().map(|entry| *entry.key()).collect();
    ids.sort_unstable();
    ids
      .into_iter()
      .filter_map(|id| self.request(id))
      .collect()
  }

  fn update_state(
    &self,
    widget_instance_id: i64,
    state: WidgetState,
    at: DateTime<Utc>,
  ) -> Result<(), LifecycleError> {
    let project_id = {
      let mut record = self
        .instances
        .get_mut(&widget_instance_id)
        .ok_or(LifecycleError::InstanceNotFound { widget_instance_id })?;
      if record.status.state == state {
        return Ok(());
      }
      record.status.state = state;
      record.status.updated_at = at;
      record.status.project_id
    };

    self.notifier.notify(Notification::StateChanged {
      widget_instance_id,
      project_id,
      state,
      at,
    });
    Ok(())
  }

  fn apply_result(
    &self,
    result: ExecutionResult,
  ) -> Result<Option<WidgetExecutionRequest>, LifecycleError> {
    let widget_instance_id = result.widget_instance_id;
    let (state, next) = {
      let mut record = self
        .instances
        .get_mut(&widget_instance_id)
        .ok_or(LifecycleError::InstanceNotFound { widget_instance_id })?;
      let status = &mut record.status;

      status.state = match result.error_kind {
        ErrorKind::None => {
          if result.data.is_some() {
            status.previous_data = result.data.clone();
            status.has_previously_succeeded = true;
          }
          WidgetState::Running
        }
        ErrorKind::Transient => WidgetState::Warning,
        ErrorKind::Fatal => WidgetState::Stopped,
      };
      status.last_error_kind = result.error_kind;
      status.last_log = result.log.clone();
      status.updated_at = Utc::now();

      let state = status.state;
      let next = (state != WidgetState::Stopped).then(|| {
        record.request.next_cycle(
          state,
          record.status.previous_data.clone(),
          record.status.has_previously_succeeded,
        )
      });
      (state, next)
    };

    self.notifier.notify(Notification::ResultRecorded {
      widget_instance_id,
      project_id: result.project_id,
      state,
      error_kind: result.error_kind,
      data: result.data,
      log: result.log,
      launched_at: result.launched_at,
    });
    Ok(next)
  }

  fn apply_no_result(
    &self,
    log: String,
    widget_instance_id: i64,
    project_id: i64,
  ) -> Result<(), LifecycleError> {
    let at = Utc::now();
    {
      let mut record = self
        .instances
        .get_mut(&widget_instance_id)
        .ok_or(LifecycleError::InstanceNotFound { widget_instance_id })?;
      let status = &mut record.status;
      status.state = WidgetState::Stopped;
      status.last_error_kind = ErrorKind::Fatal;
      status.last_log = Some(log.clone());
      status.updated_at = at;
    }

    self.notifier.notify(Notification::ResultRecorded {
      widget_instance_id,
      project_id,
      state: WidgetState::Stopped,
      error_kind: ErrorKind::Fatal,
      data: None,
      log: Some(log),
      launched_at: at,
    });
    Ok(())
  }
}

impl<N: WidgetNotifier> WidgetLifecycle for InMemoryLifecycle<N> {
  fn set_state(
    &self,
    widget_instance_id: i64,
    state: WidgetState,
    at: DateTime<Utc>,
  ) -> BoxFuture<'_, Result<(), LifecycleError>> {
    let outcome = self.update_state(widget_instance_id, state, at);
    Box::pin(async move { outcome })
  }

  fn process_result(
    &self,
    result: ExecutionResult,
  ) -> BoxFuture<'_, Result<Option<WidgetExecutionRequest>, LifecycleError>> {
    let outcome = self.apply_result(result);
    Box::pin(async move { outcome })
  }

  fn record_no_result(
    &self,
    log: String,
    widget_instance_id: i64,
    project_id: i64,
  ) -> BoxFuture<'_, Result<(), LifecycleError>> {
    let outcome = self.apply_no_result(log, widget_instance_id, project_id);
    Box::pin(async move { outcome })
  }

  fn reset_all_to_stopped(&self) -> BoxFuture<'_, Result<(), LifecycleError>> {
    let now = Utc::now();
    let ids: Vec<i64> = self.instances.iter().map(|entry| *entry.key()).collect();
    let outcome = ids
      .into_iter()
      .try_for_each(|id| self.update_state(id, WidgetState::Stopped, now));
    Box::pin(async move { outcome })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::ChannelNotifier;
  use tokio::sync::mpsc;

  fn request(id: i64) -> WidgetExecutionRequest {
    WidgetExecutionRequest {
      widget_instance_id: id,
      project_id: 9,
      widget_id: 1,
      script: "function run() { return '{}'; }".to_string(),
      properties_raw: String::new(),
      previous_result_data: None,
      delay_seconds: 30,
      timeout_seconds: None,
      current_state: WidgetState::Stopped,
      has_previously_succeeded: false,
    }
  }

  fn result(id: i64, error_kind: ErrorKind, data: Option<&str>) -> ExecutionResult {
    ExecutionResult {
      widget_instance_id: id,
      project_id: 9,
      data: data.map(str::to_string),
      log: None,
      error_kind,
      launched_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_success_keeps_running_and_feeds_next_cycle() {
    let lifecycle = InMemoryLifecycle::new();
    lifecycle.register(request(1));
    lifecycle.set_state(1, WidgetState::Running, Utc::now()).await.unwrap();

    let next = lifecycle
      .process_result(result(1, ErrorKind::None, Some("{\"v\":1}")))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(next.current_state, WidgetState::Running);
    assert_eq!(next.previous_result_data.as_deref(), Some("{\"v\":1}"));
    assert!(next.has_previously_succeeded);
    assert_eq!(next.delay_seconds, 30);
    assert_eq!(lifecycle.state(1), Some(WidgetState::Running));
  }

  #[tokio::test]
  async fn test_transient_moves_to_warning() {
    let lifecycle = InMemoryLifecycle::new();
    lifecycle.register(request(1));

    let next = lifecycle
      .process_result(result(1, ErrorKind::Transient, None))
      .await
      .unwrap();

    assert_eq!(next.unwrap().current_state, WidgetState::Warning);
    assert_eq!(lifecycle.state(1), Some(WidgetState::Warning));
  }

  #[tokio::test]
  async fn test_fatal_stops() {
    let lifecycle = InMemoryLifecycle::new();
    lifecycle.register(request(1));

    let next = lifecycle
      .process_result(result(1, ErrorKind::Fatal, None))
      .await
      .unwrap();

    assert!(next.is_none());
    assert_eq!(lifecycle.state(1), Some(WidgetState::Stopped));
    assert_eq!(lifecycle.status(1).unwrap().last_error_kind, ErrorKind::Fatal);
  }

  #[tokio::test]
  async fn test_no_result_stops_with_log() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let lifecycle = InMemoryLifecycle::with_notifier(ChannelNotifier::new(tx));
    lifecycle.register(request(1));

    lifecycle
      .record_no_result("exceeded the timeout".to_string(), 1, 9)
      .await
      .unwrap();

    let status = lifecycle.status(1).unwrap();
    assert_eq!(status.state, WidgetState::Stopped);
    assert_eq!(status.last_log.as_deref(), Some("exceeded the timeout"));
    assert!(matches!(
      rx.try_recv().unwrap(),
      Notification::ResultRecorded {
        state: WidgetState::Stopped,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_unknown_instance_is_an_error() {
    let lifecycle = InMemoryLifecycle::new();
    let outcome = lifecycle.set_state(404, WidgetState::Running, Utc::now()).await;
    assert!(matches!(
      outcome,
      Err(LifecycleError::InstanceNotFound {
        widget_instance_id: 404
      })
    ));
  }

  #[tokio::test]
  async fn test_state_changes_are_notified_once() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let lifecycle = InMemoryLifecycle::with_notifier(ChannelNotifier::new(tx));
    lifecycle.register(request(1));

    lifecycle.set_state(1, WidgetState::Running, Utc::now()).await.unwrap();
    lifecycle.set_state(1, WidgetState::Running, Utc::now()).await.unwrap();

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_reset_all_to_stopped() {
    let lifecycle = InMemoryLifecycle::new();
    let mut running = request(1);
    running.current_state = WidgetState::Running;
    lifecycle.register(running);
    let mut warning = request(2);
    warning.current_state = WidgetState::Warning;
    lifecycle.register(warning);

    lifecycle.reset_all_to_stopped().await.unwrap();

    assert_eq!(lifecycle.state(1), Some(WidgetState::Stopped));
    assert_eq!(lifecycle.state(2), Some(WidgetState::Stopped));
  }

  #[tokio::test]
  async fn test_catalog_scopes() {
    let catalog = InMemoryCatalog::new();
    catalog.add_widget(1, vec![]);
    catalog.place_instance(10, 100, 1000);
    catalog.place_instance(11, 100, 1001);
    catalog.place_instance(12, 200, 1001);

    assert_eq!(catalog.instances_in_project(100).await.unwrap(), vec![10, 11]);
    assert_eq!(catalog.instances_in_grid(1001).await.unwrap(), vec![11, 12]);
    assert!(catalog.parameter_descriptors(1).await.unwrap().is_empty());
    assert!(matches!(
      catalog.parameter_descriptors(2).await,
      Err(CatalogError::WidgetNotFound { widget_id: 2 })
    ));
  }
}
