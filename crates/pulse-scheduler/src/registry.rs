//! In-flight task pairs per widget instance.

use std::sync::Arc;

use dashmap::DashMap;

use crate::pool::TaskControl;

/// Controls of one execution cycle.
#[derive(Debug, Clone)]
pub struct TaskPair {
  pub execution: TaskControl,
  pub result: TaskControl,
  /// Distinguishes this cycle from earlier and later ones of the same
  /// instance.
  pub generation: u64,
}

impl TaskPair {
  /// Cancel both tasks of the cycle.
  pub fn cancel(&self) {
    self.execution.cancel();
    self.result.cancel();
  }

  pub fn is_finished(&self) -> bool {
    self.execution.is_finished() && self.result.is_finished()
  }
}

/// Concurrent map from widget instance id to its current [`TaskPair`].
///
/// Holds at most one entry per instance; the latest schedule wins. Clones
/// share the same map.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
  pairs: Arc<DashMap<i64, TaskPair>>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store `pair`, returning the entry it replaced.
  pub fn insert(&self, widget_instance_id: i64, pair: TaskPair) -> Option<TaskPair> {
    self.pairs.insert(widget_instance_id, pair)
  }

  pub fn get(&self, widget_instance_id: i64) -> Option<TaskPair> {
    self
      .pairs
      .get(&widget_instance_id)
      .map(|entry| entry.value().clone())
  }

  pub fn remove(&self, widget_instance_id: i64) -> Option<TaskPair> {
    self
      .pairs
      .remove(&widget_instance_id)
      .map(|(_, pair)| pair)
  }

  /// Remove the entry of a finished cycle.
  ///
  /// Only removes it while it still belongs to `generation`, so a cycle that
  /// was already replaced by a newer schedule is left alone.
  pub fn release(&self, widget_instance_id: i64, generation: u64) -> bool {
    self
      .pairs
      .remove_if(&widget_instance_id, |_, pair| pair.generation == generation)
      .is_some()
  }

  pub fn contains(&self, widget_instance_id: i64) -> bool {
    self.pairs.contains_key(&widget_instance_id)
  }

  pub fn clear(&self) {
    self.pairs.clear();
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }
}
