//! Status events - what subscribers hear about session transitions.

use crate::id::{EventId, SessionId};
use crate::session::UnitSnapshot;
use crate::status::Status;
use crate::Time;
use serde::{Deserialize, Serialize};

/// A status transition of a monitored unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Unique identifier
    pub id: EventId,

    /// When it happened
    pub timestamp: Time,

    /// Session that changed
    pub session: SessionId,

    /// New status
    pub status: Status,

    /// Unit at the time of the transition
    pub snapshot: UnitSnapshot,
}

impl StatusEvent {
    /// Create a new event.
    pub fn new(session: SessionId, status: Status, snapshot: UnitSnapshot) -> Self {
        Self {
            id: EventId::new(),
            timestamp: chrono::Utc::now(),
            session,
            status,
            snapshot,
        }
    }
}
