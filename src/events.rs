//! Progress events
//!
//! Structured lifecycle events for consumers such as a dashboard's
//! server-sent-event stream. The engine only emits them; transport is the
//! consumer's concern.

use std::path::PathBuf;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{IrcBookError, Result};

/// Capacity of the event channel; slow subscribers lose the oldest events
const EVENT_CAPACITY: usize = 256;

/// One progress or error event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connecting {
        server: String,
        attempt: u32,
    },
    Registered {
        session_id: String,
        nickname: String,
    },
    Searching {
        session_id: String,
        query: String,
    },
    ResultCount {
        session_id: String,
        count: usize,
    },
    Downloading {
        server: String,
        filename: String,
        attempt: usize,
        total: usize,
    },
    TransferProgress {
        filename: String,
        received: u64,
        expected: u64,
    },
    AttemptFailed {
        server: String,
        reason: String,
    },
    Succeeded {
        path: PathBuf,
        extracted: Vec<PathBuf>,
    },
    Failed {
        reason: String,
        message: String,
    },
}

impl ProgressEvent {
    /// Build the terminal failure event for an error
    pub fn failed(err: &IrcBookError) -> Self {
        ProgressEvent::Failed {
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Connecting { .. } => "connecting",
            ProgressEvent::Registered { .. } => "registered",
            ProgressEvent::Searching { .. } => "searching",
            ProgressEvent::ResultCount { .. } => "result_count",
            ProgressEvent::Downloading { .. } => "downloading",
            ProgressEvent::TransferProgress { .. } => "transfer_progress",
            ProgressEvent::AttemptFailed { .. } => "attempt_failed",
            ProgressEvent::Succeeded { .. } => "succeeded",
            ProgressEvent::Failed { .. } => "failed",
        }
    }

    /// JSON payload for a push channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Fan-out channel for progress events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: ProgressEvent) {
        trace!("Emitting {} event", event.name());
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferErrorKind;

    #[test]
    fn test_event_json_shape() {
        let event = ProgressEvent::ResultCount { session_id: "sess-1".to_string(), count: 4 };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "result_count");
        assert_eq!(json["count"], 4);
    }

    #[test]
    fn test_failed_event_uses_reason_code() {
        let err = IrcBookError::transfer_error(TransferErrorKind::Stalled, "no data");
        match ProgressEvent::failed(&err) {
            ProgressEvent::Failed { reason, message } => {
                assert_eq!(reason, "stalled");
                assert!(message.contains("no data"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ProgressEvent::Connecting { server: "irc.test:6667".to_string(), attempt: 1 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "connecting");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(ProgressEvent::Failed { reason: "timeout".to_string(), message: "x".to_string() });
    }
}
