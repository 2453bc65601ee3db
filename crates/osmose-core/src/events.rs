//! Console event system.
//!
//! Everything a UI shell needs to redraw is announced here: channel
//! connectivity, merged telemetry, derived button enablement, history
//! refreshes, and the transient user notices produced by settings and
//! history actions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use osmose_types::{DeviceSnapshot, HistoryRange};

use crate::reconcile::ButtonEnablement;

/// Severity of a user notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Confirmation of a completed action.
    Info,
    /// Completed, but the user must do something (e.g. restart).
    Warning,
    /// The action failed and must be re-invoked.
    Error,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human-readable text.
    pub message: String,
}

impl Notice {
    /// Create an informational notice.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Create a warning notice.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Events emitted by the console.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConsoleEvent {
    /// The live channel opened.
    Connected { url: String },
    /// The live channel closed; a reconnect is scheduled.
    Disconnected { reconnect_in_ms: u64 },
    /// The merged telemetry after an inbound message.
    Snapshot { snapshot: DeviceSnapshot },
    /// The composed status line changed.
    StatusChanged { status: String },
    /// Start/stop enablement changed.
    ButtonsChanged { buttons: ButtonEnablement },
    /// The chart datasets were replaced.
    SeriesUpdated { range: HistoryRange, samples: usize },
    /// The run table was rebuilt.
    TableUpdated { rows: usize },
    /// A message for the user.
    Notice(Notice),
}

/// Sender for console events.
pub type EventSender = broadcast::Sender<ConsoleEvent>;

/// Receiver for console events.
pub type EventReceiver = broadcast::Receiver<ConsoleEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ConsoleEvent) {
        // Nobody listening is fine
        let _ = self.sender.send(event);
    }

    /// Send a user notice.
    pub fn notify(&self, notice: Notice) {
        self.send(ConsoleEvent::Notice(notice));
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatcher_delivers_notices() {
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();

        events.notify(Notice::warning("restart required"));

        match rx.recv().await.unwrap() {
            ConsoleEvent::Notice(notice) => {
                assert_eq!(notice.level, NoticeLevel::Warning);
                assert_eq!(notice.message, "restart required");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        let events = EventDispatcher::new(4);
        assert_eq!(events.receiver_count(), 0);
        events.send(ConsoleEvent::TableUpdated { rows: 3 });
    }

    #[test]
    fn test_event_serialization() {
        let event = ConsoleEvent::SeriesUpdated {
            range: HistoryRange::OneHour,
            samples: 120,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"series_updated""#));
        assert!(json.contains(r#""range":"one_hour""#));

        let notice = ConsoleEvent::Notice(Notice::info("Settings saved"));
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains(r#""type":"notice""#));
        assert!(json.contains(r#""level":"info""#));
    }
}
