//! Session store abstraction.

use async_trait::async_trait;
use exertion_core::{SessionId, SessionRecord};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Durable record of monitor session trees.
///
/// Only root sessions are ever written; a record always carries its whole
/// subtree.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Save a root session tree (create or replace).
    async fn save(&self, root: &SessionRecord) -> Result<()>;

    /// Load a root session tree.
    async fn load(&self, cookie: SessionId) -> Result<Option<SessionRecord>>;

    /// List all stored root session trees.
    async fn list(&self) -> Result<Vec<SessionRecord>>;

    /// Delete a stored tree. Deleting an unknown tree is not an error.
    async fn delete(&self, cookie: SessionId) -> Result<()>;
}
