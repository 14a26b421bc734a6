//! Typed progress events for batch execution.
//!
//! The engine emits structured events; how they are rendered (color, icons,
//! log lines) is strictly a caller concern.

use crate::attempt::Outcome;
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_BUFFER: usize = 256;

/// Progress events emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        total: usize,
        /// Masked command text, safe for display and logs.
        command: String,
    },
    AttemptStarted {
        target_id: String,
        label: String,
        attempt: u32,
    },
    /// Emitted before the backoff wait begins, so an interactive caller sees
    /// why nothing is happening.
    RetryScheduled {
        target_id: String,
        label: String,
        attempt: u32,
        delay_ms: u64,
    },
    TargetFinished {
        target_id: String,
        label: String,
        outcome: Outcome,
        cancelled: bool,
        attempt_count: usize,
        duration_ms: u64,
    },
    BatchFinished {
        succeeded: usize,
        failed: usize,
        timed_out: usize,
        total: usize,
        duration_ms: u64,
    },
}

/// Broadcast channel for batch progress events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// The effective buffer is clamped to at least `DEFAULT_BUFFER` to avoid
    /// lag/drop behavior for bursty batches.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: BatchEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(BatchEvent::BatchStarted {
            total: 3,
            command: "uptime".to_string(),
        });

        match rx.recv().await.expect("event should arrive") {
            BatchEvent::BatchStarted { total, command } => {
                assert_eq!(total, 3);
                assert_eq!(command, "uptime");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.emit(BatchEvent::BatchFinished {
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            total: 0,
            duration_ms: 0,
        });
    }

    #[tokio::test]
    async fn test_small_buffer_clamped_to_default() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe();

        for i in 0..DEFAULT_BUFFER {
            bus.emit(BatchEvent::AttemptStarted {
                target_id: i.to_string(),
                label: i.to_string(),
                attempt: 0,
            });
        }

        // With the clamped buffer the first event is still readable.
        let first = rx.recv().await.expect("recv should not lag");
        match first {
            BatchEvent::AttemptStarted { target_id, .. } => assert_eq!(target_id, "0"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_events_serialize_with_snake_case_tag() {
        let event = BatchEvent::RetryScheduled {
            target_id: "i-1".to_string(),
            label: "web-1".to_string(),
            attempt: 2,
            delay_ms: 20_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"retry_scheduled\""));
        assert!(json.contains("\"delay_ms\":20000"));
    }
}
