//! In-memory workspace for PULL units.
//!
//! The dispatching side deposits units and takes results; workers pick
//! entries up and write results back.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use async_trait::async_trait;
use exertion_core::{Exertion, ExertionId};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::WorkspaceError;
use crate::traits::Workspace;

/// FIFO workspace. All state is lost on restart.
#[derive(Default)]
pub struct MemorySpace {
    entries: Mutex<VecDeque<Exertion>>,
    results: Mutex<HashMap<ExertionId, Exertion>>,
    deposited: Notify,
    written: Notify,
}

impl MemorySpace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries waiting for a worker.
    pub async fn pending(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Pick up the oldest entry, waiting up to `timeout` for one.
    pub async fn next_entry(&self, timeout: Duration) -> Option<Exertion> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let deposited = self.deposited.notified();
            if let Some(unit) = self.entries.lock().await.pop_front() {
                debug!("Picked up {} from workspace", unit.name());
                return Some(unit);
            }
            if tokio::time::timeout_at(deadline, deposited).await.is_err() {
                return None;
            }
        }
    }

    /// Write back the result of a picked-up entry.
    pub async fn write_result(&self, unit: Exertion) {
        debug!("Result for {} written to workspace", unit.name());
        self.results.lock().await.insert(unit.id(), unit);
        self.written.notify_waiters();
    }
}

#[async_trait]
impl Workspace for MemorySpace {
    async fn deposit(&self, unit: Exertion) -> Result<(), WorkspaceError> {
        debug!("Deposited {} in workspace", unit.name());
        self.entries.lock().await.push_back(unit);
        self.deposited.notify_waiters();
        Ok(())
    }

    async fn take(&self, id: ExertionId, timeout: Duration) -> Result<Option<Exertion>, WorkspaceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let written = self.written.notified();
            if let Some(unit) = self.results.lock().await.remove(&id) {
                return Ok(Some(unit));
            }
            if tokio::time::timeout_at(deadline, written).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exertion_core::{Signature, Task};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deposit_pickup_take() {
        let space = Arc::new(MemorySpace::new());
        let unit: Exertion = Task::new("t", Signature::new("run", "Worker")).into();
        let id = unit.id();

        let worker = {
            let space = Arc::clone(&space);
            tokio::spawn(async move {
                let mut entry = space.next_entry(Duration::from_secs(5)).await.unwrap();
                entry.context_mut().put("result/y", 1);
                space.write_result(entry).await;
            })
        };

        space.deposit(unit).await.unwrap();
        let result = space.take(id, Duration::from_secs(5)).await.unwrap().unwrap();
        worker.await.unwrap();

        assert_eq!(result.context().get_f64("result/y"), Some(1.0));
        assert_eq!(space.pending().await, 0);
    }

    #[tokio::test]
    async fn test_take_times_out() {
        let space = MemorySpace::new();
        let taken = space.take(ExertionId::new(), Duration::from_millis(20)).await.unwrap();
        assert!(taken.is_none());
        assert!(space.next_entry(Duration::from_millis(20)).await.is_none());
    }
}
