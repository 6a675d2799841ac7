//! Faults recorded on a unit's exception log.

use crate::Time;
use serde::{Deserialize, Serialize};

/// Fault taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// No executor found for a signature
    Resolution,
    /// Mutual-exclusion lock denied
    Admission,
    /// A pipe references a missing path or an unknown unit
    Propagation,
    /// Executor returned a fault
    Executor,
    /// Unrecoverable runtime error inside an executor
    Runtime,
    /// Session operation invoked from an invalid state
    Protocol,
    /// Lease cancelled or execution timed out
    Lease,
    /// Provisioning failed
    Provision,
    /// Any other dispatch failure
    Dispatch,
}

impl FaultKind {
    /// Name used in traces.
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Resolution => "resolution",
            FaultKind::Admission => "admission",
            FaultKind::Propagation => "propagation",
            FaultKind::Executor => "executor",
            FaultKind::Runtime => "runtime",
            FaultKind::Protocol => "protocol",
            FaultKind::Lease => "lease",
            FaultKind::Provision => "provision",
            FaultKind::Dispatch => "dispatch",
        }
    }
}

/// A fault recorded against a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Fault class
    pub kind: FaultKind,

    /// Human readable explanation
    pub message: String,

    /// Name of the unit where the fault was raised
    pub origin: String,

    /// Whether the fault terminates the unit
    pub fatal: bool,

    /// When it was recorded
    pub at: Time,
}

impl Fault {
    /// Create a fatal fault.
    pub fn new(kind: FaultKind, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin: origin.into(),
            fatal: true,
            at: chrono::Utc::now(),
        }
    }

    /// Mark the fault as non-fatal (informational).
    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind.as_str(), self.origin, self.message)
    }
}
