//! Fan-out of pipeline events to subscribers.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::alerts::{ErrorRecord, SystemStatus};
use crate::logbook::LogEntry;
use crate::stats::StatsSnapshot;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    StatsUpdate(StatsSnapshot),
    LogUpdate(LogEntry),
    NewError(ErrorRecord),
    ErrorUpdate(ErrorRecord),
    StatusChange {
        system_status: SystemStatus,
        stream_state: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StatsUpdate(_) => "stats_update",
            Event::LogUpdate(_) => "log_update",
            Event::NewError(_) => "new_error",
            Event::ErrorUpdate(_) => "error_update",
            Event::StatusChange { .. } => "status_change",
        }
    }

    /// JSON of the payload alone.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Event::StatsUpdate(stats) => serde_json::to_string(stats),
            Event::LogUpdate(entry) => serde_json::to_string(entry),
            Event::NewError(record) | Event::ErrorUpdate(record) => serde_json::to_string(record),
            Event::StatusChange {
                system_status,
                stream_state,
            } => serde_json::to_string(&serde_json::json!({
                "system_status": system_status,
                "stream_state": stream_state,
            })),
        }
    }
}

/// Events a subscriber may have queued before it is cut off.
pub const SUBSCRIBER_BACKLOG: usize = 256;

/// Bounded channel per subscriber. Publishing never blocks; a subscriber
/// whose receiver is gone, or whose backlog is full, is dropped on that
/// publish and its receiver sees a disconnect once drained.
pub struct EventBus {
    subscribers: Mutex<Vec<SyncSender<Event>>>,
    backlog: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_backlog(SUBSCRIBER_BACKLOG)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backlog(backlog: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            backlog: backlog.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SyncSender<Event>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::sync_channel(self.backlog);
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        self.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("event subscriber fell {} events behind; dropping it", self.backlog);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        for count in [2, 3, 1] {
            bus.publish(Event::StatsUpdate(StatsSnapshot {
                current_count: count,
                ..StatsSnapshot::default()
            }));
        }
        for rx in [a, b] {
            let counts: Vec<usize> = rx
                .try_iter()
                .map(|e| match e {
                    Event::StatsUpdate(s) => s.current_count,
                    other => panic!("unexpected {:?}", other),
                })
                .collect();
            assert_eq!(counts, vec![2, 3, 1]);
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(Event::StatsUpdate(StatsSnapshot::default()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn stalled_subscriber_is_cut_off_at_the_backlog() {
        let bus = EventBus::with_backlog(4);
        let stalled = bus.subscribe();
        let reader = bus.subscribe();

        for count in 0..4 {
            bus.publish(Event::StatsUpdate(StatsSnapshot {
                current_count: count,
                ..StatsSnapshot::default()
            }));
            assert_eq!(reader.try_iter().count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Event::StatsUpdate(StatsSnapshot::default()));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(reader.try_iter().count(), 1);

        // the queued events drain, then the stream reports the disconnect
        assert_eq!(stalled.try_iter().count(), 4);
        assert!(matches!(
            stalled.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = Event::StatusChange {
            system_status: SystemStatus::Warning,
            stream_state: "streaming".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "status_change");
        assert_eq!(value["data"]["system_status"], "warning");
        assert_eq!(event.name(), "status_change");
    }
}
