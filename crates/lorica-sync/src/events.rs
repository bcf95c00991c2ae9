//! Event emission at the pipeline's well-defined points.
//!
//! Controllers emit events over a broadcast bus: one per applied entry, one
//! with the affected table names, and one on every sync state change.
//! Subscribers have independent buffers; emission never blocks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Sync lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

/// An event emitted by a log controller. `log` identifies the instance:
/// the db name for personal logs, `"{group_id}/{db}"` for group logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    EntryApplied { log: String, index: u64 },
    #[serde(rename_all = "camelCase")]
    TablesAffected { log: String, tables: Vec<String> },
    #[serde(rename_all = "camelCase")]
    SyncStateChanged { log: String, state: SyncState },
}

/// Broadcast bus for sync events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// A bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit to all subscribers. Lagging or absent subscribers are ignored.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();

        bus.emit(SyncEvent::EntryApplied {
            log: "notes".into(),
            index: 3,
        });
        bus.emit(SyncEvent::TablesAffected {
            log: "notes".into(),
            tables: vec!["t".into()],
        });

        assert_eq!(
            receiver.recv().await.expect("first"),
            SyncEvent::EntryApplied {
                log: "notes".into(),
                index: 3
            }
        );
        assert_eq!(
            receiver.recv().await.expect("second"),
            SyncEvent::TablesAffected {
                log: "notes".into(),
                tables: vec!["t".into()]
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(SyncEvent::SyncStateChanged {
            log: "notes".into(),
            state: SyncState::Syncing,
        });
    }

    #[test]
    fn test_event_wire_shape() {
        let event = SyncEvent::SyncStateChanged {
            log: "notes".into(),
            state: SyncState::Error,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "sync_state_changed");
        assert_eq!(json["state"], "error");
    }
}
