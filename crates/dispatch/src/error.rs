//! Dispatch errors and their mapping onto unit faults.

use exertion_core::{FaultKind, ModelError};
use exertion_monitor::MonitorError;

/// Result type of dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure reported by an executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The operation failed
    #[error("{0}")]
    Failed(String),

    /// An unrecoverable runtime error; the unit ends in ERROR
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Admission lock failure.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The lock service cannot be reached or refused the transaction
    #[error("admission unavailable: {0}")]
    Unavailable(String),
}

/// Workspace failure.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// The workspace no longer accepts entries
    #[error("workspace closed")]
    Closed,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while dispatching a unit.
///
/// Inside the engine every error ends up as a fault on the unit it concerns.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No executor serves the signature
    #[error("no executor for {0}")]
    NoExecutor(String),

    /// The admission lock was denied
    #[error("admission denied for {0}")]
    AdmissionDenied(String),

    /// Admission lock failure
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// A child unit ended FAILED or ERROR
    #[error("{0}")]
    ChildFailed(String),

    /// Pipe validation or value propagation failed
    #[error("{0}")]
    Propagation(String),

    /// Executor failure
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The executor or workspace returned nothing
    #[error("no result from {0}")]
    NoResult(String),

    /// Workspace failure
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Deployment could not be ensured
    #[error("not deployed: {0}")]
    NotDeployed(String),

    /// A precondition hook failed
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Model error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Monitoring engine error
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl DispatchError {
    /// Fault kind recorded on the unit for this error.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            DispatchError::NoExecutor(_) => FaultKind::Resolution,
            DispatchError::AdmissionDenied(_) | DispatchError::Admission(_) => FaultKind::Admission,
            DispatchError::Propagation(_) => FaultKind::Propagation,
            DispatchError::Executor(ExecutorError::Runtime(_)) => FaultKind::Runtime,
            DispatchError::Executor(ExecutorError::Failed(_)) | DispatchError::ChildFailed(_) => {
                FaultKind::Executor
            }
            DispatchError::NotDeployed(_) => FaultKind::Provision,
            DispatchError::Monitor(_) => FaultKind::Protocol,
            DispatchError::NoResult(_)
            | DispatchError::Workspace(_)
            | DispatchError::Precondition(_)
            | DispatchError::Model(_) => FaultKind::Dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds() {
        assert_eq!(DispatchError::NoExecutor("x".into()).fault_kind(), FaultKind::Resolution);
        assert_eq!(
            DispatchError::from(ExecutorError::Runtime("overflow".into())).fault_kind(),
            FaultKind::Runtime
        );
        assert_eq!(
            DispatchError::from(ExecutorError::Failed("bad".into())).fault_kind(),
            FaultKind::Executor
        );
        assert_eq!(DispatchError::NoResult("space".into()).fault_kind(), FaultKind::Dispatch);
    }
}
