//! Static executor directory.

use std::sync::Arc;
use async_trait::async_trait;
use exertion_core::Signature;
use tracing::debug;

use crate::traits::{Directory, Executor};

/// A fixed list of executors, each serving one capability.
///
/// A signature naming a provider only matches the executor of that name.
#[derive(Default)]
pub struct StaticDirectory {
    entries: Vec<(String, Arc<dyn Executor>)>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `capability`.
    pub fn with(mut self, capability: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.entries.push((capability.into(), executor));
        self
    }

    /// Number of registered executors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve(&self, signature: &Signature) -> Option<Arc<dyn Executor>> {
        let found = self
            .entries
            .iter()
            .filter(|(capability, _)| *capability == signature.capability)
            .find(|(_, executor)| match &signature.provider {
                Some(provider) => executor.name() == provider,
                None => true,
            })
            .map(|(_, executor)| Arc::clone(executor));
        debug!("Resolved {} -> {:?}", signature, found.as_ref().map(|e| e.name().to_string()));
        found
    }
}
