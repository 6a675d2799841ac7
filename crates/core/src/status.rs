//! Lifecycle status shared by exertions and monitor sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a unit of work.
///
/// ```text
/// INITIAL → {INSPACE, PROVISION, RUNNING} → {UPDATED ⇄ RUNNING} → {DONE, SUSPENDED}
/// {RUNNING, INSPACE, PROVISION} → FAILED | ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet dispatched
    #[default]
    Initial,
    /// Deposited into the workspace, waiting for pick-up
    InSpace,
    /// Waiting for its executors to be provisioned
    Provision,
    /// Executing
    Running,
    /// Intermediate progress reported
    Updated,
    /// Parked; may be resumed later
    Suspended,
    /// Completed successfully
    Done,
    /// Completed with a fault
    Failed,
    /// Completed with an unrecoverable runtime fault
    Error,
}

impl Status {
    /// DONE, FAILED and ERROR are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed | Status::Error)
    }

    /// FAILED or its fatal sub-state ERROR.
    pub fn is_failed(self) -> bool {
        matches!(self, Status::Failed | Status::Error)
    }

    /// Name used in traces and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Initial => "INITIAL",
            Status::InSpace => "INSPACE",
            Status::Provision => "PROVISION",
            Status::Running => "RUNNING",
            Status::Updated => "UPDATED",
            Status::Suspended => "SUSPENDED",
            Status::Done => "DONE",
            Status::Failed => "FAILED",
            Status::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIAL" => Ok(Status::Initial),
            "INSPACE" => Ok(Status::InSpace),
            "PROVISION" => Ok(Status::Provision),
            "RUNNING" => Ok(Status::Running),
            "UPDATED" => Ok(Status::Updated),
            "SUSPENDED" => Ok(Status::Suspended),
            "DONE" => Ok(Status::Done),
            "FAILED" => Ok(Status::Failed),
            "ERROR" => Ok(Status::Error),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}
