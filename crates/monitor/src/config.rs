//! Monitoring engine configuration.

use std::time::Duration;

/// Largest notifier pool.
pub const MAX_NOTIFIERS: usize = 5;

/// Configuration for the monitoring engine.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Status event delivery workers (clamped to 1..=5)
    pub notifier_workers: usize,
    /// Pending status events before new ones are dropped
    pub notifier_capacity: usize,
    /// Pending commands before callers wait
    pub command_capacity: usize,
    /// How often the sweeping lease governor checks grants
    pub sweep_interval: Duration,
    /// Drop finished trees from memory once they are persisted
    pub prune_finished: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            notifier_workers: 2,
            notifier_capacity: 256,
            command_capacity: 1024,
            sweep_interval: Duration::from_millis(250),
            prune_finished: false,
        }
    }
}

impl MonitorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the notifier pool size.
    pub fn with_notifier_workers(mut self, workers: usize) -> Self {
        self.notifier_workers = workers;
        self
    }

    /// Set the notifier queue capacity.
    pub fn with_notifier_capacity(mut self, capacity: usize) -> Self {
        self.notifier_capacity = capacity;
        self
    }

    /// Set the lease sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Forget a tree once its root finishes and is persisted.
    ///
    /// Pruned trees are only reachable through the session store.
    pub fn with_prune_finished(mut self, prune: bool) -> Self {
        self.prune_finished = prune;
        self
    }

    /// Notifier pool size within bounds.
    pub fn workers(&self) -> usize {
        self.notifier_workers.clamp(1, MAX_NOTIFIERS)
    }
}
