//! Pipes - data edges between sibling units of a job.

use crate::id::ExertionId;
use serde::{Deserialize, Serialize};

/// Copies `out_path` of the producer into `in_path` of the consumer once the
/// producer is DONE.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pipe {
    /// Producing sibling
    pub from: ExertionId,
    /// Output path in the producer's context
    pub out_path: String,
    /// Consuming sibling
    pub to: ExertionId,
    /// Input path in the consumer's context
    pub in_path: String,
}

impl Pipe {
    /// Create a pipe between two siblings.
    pub fn new(
        from: ExertionId,
        out_path: impl Into<String>,
        to: ExertionId,
        in_path: impl Into<String>,
    ) -> Self {
        Self {
            from,
            out_path: out_path.into(),
            to,
            in_path: in_path.into(),
        }
    }
}

impl std::fmt::Display for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.from, self.out_path, self.to, self.in_path)
    }
}
