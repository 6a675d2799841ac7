//! Session storage for the monitoring engine.
//!
//! A trait-based store for root session trees with a JSON file and an
//! in-memory implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod memory;

pub use trait_::{SessionStore, StorageError, Result};
pub use json_storage::JsonSessionStore;
pub use memory::MemorySessionStore;

#[cfg(test)]
pub(crate) mod testing {
    use exertion_core::{SessionId, SessionRecord, Status, Task, Signature, UnitSnapshot, Exertion};

    pub fn record(name: &str, status: Status) -> SessionRecord {
        let mut unit: Exertion = Task::new(name, Signature::local(name, "Test")).into();
        let initial = UnitSnapshot::of(&unit);
        unit.set_status(status);
        SessionRecord {
            cookie: SessionId::new(),
            parent: None,
            initial,
            runtime: UnitSnapshot::of(&unit),
            expiration: None,
            timeout_ms: None,
            children: Vec::new(),
        }
    }
}
