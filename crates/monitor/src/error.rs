//! Monitoring errors.

use exertion_core::{SessionId, Status};

/// Result type of monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by the monitoring engine.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A session operation was invoked from a state that does not allow it
    #[error("Session {session}: cannot {operation} from {status}")]
    InvalidTransition {
        /// Session the operation targeted
        session: SessionId,
        /// Operation name
        operation: &'static str,
        /// State the session was in
        status: Status,
    },

    /// Unknown session cookie
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The unit carries no session cookie
    #[error("Unit {0} is not monitored")]
    NotMonitored(String),

    /// The monitoring actor is gone
    #[error("Monitoring engine is not running")]
    Closed,
}
