//! Collaborator interfaces of the dispatch engine.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use exertion_core::{DataContext, Exertion, ExertionId, Signature, TxnId};
use serde_json::Value;

use crate::error::{AdmissionError, ExecutorError, WorkspaceError};

/// Something that performs the work of a unit.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executor identity, part of the admission key.
    fn name(&self) -> &str;

    /// Whether invocations must hold the admission lock.
    fn requires_mutual_exclusion(&self) -> bool {
        false
    }

    /// Execute `unit`, returning it with results written into its context.
    async fn invoke(&self, unit: Exertion, txn: Option<TxnId>) -> Result<Option<Exertion>, ExecutorError>;
}

/// Finds executors for signatures.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Executor serving `signature`, if any.
    async fn resolve(&self, signature: &Signature) -> Option<Arc<dyn Executor>>;
}

/// Transactional mutual-exclusion lock keyed by capability and executor.
#[async_trait]
pub trait AdmissionLock: Send + Sync {
    /// Try to take `key` for `txn`. `Ok(false)` means denied.
    async fn acquire(&self, key: &str, txn: TxnId) -> Result<bool, AdmissionError>;

    /// Release everything `txn` holds after a successful invocation.
    async fn commit(&self, txn: TxnId) -> Result<(), AdmissionError>;

    /// Release everything `txn` holds without committing.
    async fn abort(&self, txn: TxnId) -> Result<(), AdmissionError>;
}

/// Queue hand-off for PULL units.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Queue a unit for a worker.
    async fn deposit(&self, unit: Exertion) -> Result<(), WorkspaceError>;

    /// Wait up to `timeout` for the result written back for `id`.
    async fn take(&self, id: ExertionId, timeout: Duration) -> Result<Option<Exertion>, WorkspaceError>;
}

/// Deploys executors on demand.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Make sure executors for these signatures are running.
    async fn ensure_deployed(&self, signatures: &[Signature]) -> bool;
}

/// External code another unit is waiting on, run before a unit executes.
#[async_trait]
pub trait Depender: Send + Sync {
    /// Realize the precondition, possibly writing into the unit's context.
    async fn realize(&self, unit: ExertionId, context: &mut DataContext) -> Result<(), ExecutorError>;
}

/// External store kept in sync with watched output paths.
#[async_trait]
pub trait OutputPersister: Send + Sync {
    /// Write back the freshly computed value of a watched path.
    async fn write(&self, unit: ExertionId, path: &str, value: &Value) -> Result<(), ExecutorError>;
}
