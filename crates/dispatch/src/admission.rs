//! In-process admission lock.

use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use exertion_core::TxnId;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::AdmissionError;
use crate::traits::AdmissionLock;

/// Named locks held by transactions, released on commit or abort.
///
/// A busy key is waited on for at most `wait`, then denied. The lock is not
/// reentrant: a transaction asking again for a key it holds is denied.
pub struct LocalAdmissionLock {
    held: Mutex<HashMap<String, TxnId>>,
    released: Notify,
    wait: Duration,
}

impl LocalAdmissionLock {
    /// Create a lock that denies immediately when a key is busy.
    pub fn new() -> Self {
        Self::with_wait(Duration::ZERO)
    }

    /// Create a lock that waits up to `wait` for a busy key.
    pub fn with_wait(wait: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Notify::new(),
            wait,
        }
    }

    /// Transaction holding `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<TxnId> {
        self.held.lock().await.get(key).copied()
    }

    async fn release(&self, txn: TxnId) {
        let mut held = self.held.lock().await;
        held.retain(|_, holder| *holder != txn);
        drop(held);
        self.released.notify_waiters();
    }
}

impl Default for LocalAdmissionLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdmissionLock for LocalAdmissionLock {
    async fn acquire(&self, key: &str, txn: TxnId) -> Result<bool, AdmissionError> {
        let deadline = tokio::time::Instant::now() + self.wait;
        loop {
            let released = self.released.notified();
            {
                let mut held = self.held.lock().await;
                match held.get(key) {
                    None => {
                        held.insert(key.to_string(), txn);
                        debug!("Admission {} granted to {}", key, txn);
                        return Ok(true);
                    }
                    Some(holder) if *holder == txn => {
                        debug!("Admission {} denied: {} already holds it", key, txn);
                        return Ok(false);
                    }
                    Some(_) => {}
                }
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                debug!("Admission {} denied to {}", key, txn);
                return Ok(false);
            }
        }
    }

    async fn commit(&self, txn: TxnId) -> Result<(), AdmissionError> {
        self.release(txn).await;
        Ok(())
    }

    async fn abort(&self, txn: TxnId) -> Result<(), AdmissionError> {
        self.release(txn).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_busy_key_denied() {
        let lock = LocalAdmissionLock::new();
        let (a, b) = (TxnId::new(), TxnId::new());

        assert!(lock.acquire("Adder:adder", a).await.unwrap());
        assert!(!lock.acquire("Adder:adder", b).await.unwrap());
        assert!(lock.acquire("Other:adder", b).await.unwrap());

        lock.commit(a).await.unwrap();
        assert!(lock.acquire("Adder:adder", b).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_reentrant() {
        let lock = LocalAdmissionLock::new();
        let txn = TxnId::new();
        assert!(lock.acquire("k", txn).await.unwrap());
        assert!(!lock.acquire("k", txn).await.unwrap());
        assert_eq!(lock.holder("k").await, Some(txn));
    }

    #[tokio::test]
    async fn test_waiter_granted_after_release() {
        let lock = Arc::new(LocalAdmissionLock::with_wait(Duration::from_secs(5)));
        let (a, b) = (TxnId::new(), TxnId::new());
        assert!(lock.acquire("k", a).await.unwrap());

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire("k", b).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        lock.abort(a).await.unwrap();

        assert!(waiter.await.unwrap().unwrap());
        assert_eq!(lock.holder("k").await, Some(b));
    }
}
