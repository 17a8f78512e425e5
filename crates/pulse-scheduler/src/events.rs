//! Widget notifications.
//!
//! Every state change and every recorded result is pushed to a notifier so
//! the dashboard surface always shows the latest attempt's outcome.

use chrono::{DateTime, Utc};
use pulse_widget::{ErrorKind, WidgetState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A change the dashboard surface should hear about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
  /// A widget instance moved to a new state.
  StateChanged {
    widget_instance_id: i64,
    project_id: i64,
    state: WidgetState,
    at: DateTime<Utc>,
  },

  /// An execution produced a result, or failed to produce one.
  ResultRecorded {
    widget_instance_id: i64,
    project_id: i64,
    state: WidgetState,
    error_kind: ErrorKind,
    data: Option<String>,
    log: Option<String>,
    launched_at: DateTime<Utc>,
  },
}

impl Notification {
  pub fn widget_instance_id(&self) -> i64 {
    match self {
      Notification::StateChanged {
        widget_instance_id, ..
      }
      | Notification::ResultRecorded {
        widget_instance_id, ..
      } => *widget_instance_id,
    }
  }
}

/// Receives widget notifications.
pub trait WidgetNotifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// A notifier that discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl WidgetNotifier for NoopNotifier {
  fn notify(&self, _notification: Notification) {}
}

/// A notifier that forwards notifications to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a result task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
    Self { sender }
  }
}

impl WidgetNotifier for ChannelNotifier {
  fn notify(&self, notification: Notification) {
    // receiver may have been dropped
    let _ = self.sender.send(notification);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_notifier_forwards() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notifier = ChannelNotifier::new(tx);

    notifier.notify(Notification::StateChanged {
      widget_instance_id: 5,
      project_id: 1,
      state: WidgetState::Running,
      at: Utc::now(),
    });

    let received = rx.try_recv().unwrap();
    assert_eq!(received.widget_instance_id(), 5);
  }

  #[test]
  fn test_channel_notifier_ignores_closed_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    ChannelNotifier::new(tx).notify(Notification::StateChanged {
      widget_instance_id: 1,
      project_id: 1,
      state: WidgetState::Stopped,
      at: Utc::now(),
    });
  }

  #[test]
  fn test_serialized_shape() {
    let json = serde_json::to_value(Notification::StateChanged {
      widget_instance_id: 2,
      project_id: 3,
      state: WidgetState::Warning,
      at: Utc::now(),
    })
    .unwrap();

    assert_eq!(json["type"], "state_changed");
    assert_eq!(json["state"], "WARNING");
  }
}
