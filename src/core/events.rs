// src/core/events.rs

//! Typed change events broadcast from the core components so any number of
//! consumers (the edge API's WebSocket clients, the audit log, tests) can
//! observe state transitions without the emitting component knowing who, if
//! anyone, is listening.

use crate::core::consultation::ConsultationStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel carrying domain events. Generous enough
/// that a momentarily slow WebSocket consumer doesn't lose events under
/// normal load; a consumer that falls behind this much is caught by
/// `RecvError::Lagged` and expected to resynchronize by re-fetching state.
const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    FacultyStateChanged {
        faculty_id: i64,
        present: bool,
        grace_active: bool,
        at: DateTime<Utc>,
    },
    ConsultationStatusChanged {
        consultation_id: i64,
        status: ConsultationStatus,
        at: DateTime<Utc>,
    },
    RfidScanned {
        uid: String,
        at: DateTime<Utc>,
    },
    BusConnectionChanged {
        connected: bool,
        at: DateTime<Utc>,
    },
    RfidDeviceLost {
        reason: String,
        at: DateTime<Utc>,
    },
}

/// The shared event bus. Cloning is cheap (clones the underlying sender).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A publish with zero subscribers is a routine
    /// no-op, not an error.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}
