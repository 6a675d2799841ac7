//! In-memory session store.

use std::collections::HashMap;
use std::sync::Mutex;
use async_trait::async_trait;
use exertion_core::{SessionId, SessionRecord};
use super::{Result, SessionStore};

/// Keeps the latest tree per root and a log of every write.
///
/// The write log makes the store useful for checking how often, and for
/// which root, a monitor persisted.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    writes: Mutex<Vec<SessionId>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookies of every saved root, in write order.
    pub fn writes(&self) -> Vec<SessionId> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Number of saves so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> super::StorageError {
    super::StorageError::Other("session store lock poisoned".to_string())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, root: &SessionRecord) -> Result<()> {
        self.sessions.lock().map_err(poisoned)?.insert(root.cookie, root.clone());
        self.writes.lock().map_err(poisoned)?.push(root.cookie);
        Ok(())
    }

    async fn load(&self, cookie: SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().map_err(poisoned)?.get(&cookie).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut all: Vec<_> = self.sessions.lock().map_err(poisoned)?.values().cloned().collect();
        all.sort_by(|a, b| a.cookie.cmp(&b.cookie));
        Ok(all)
    }

    async fn delete(&self, cookie: SessionId) -> Result<()> {
        self.sessions.lock().map_err(poisoned)?.remove(&cookie);
        Ok(())
    }
}
