//! Dispatch engine configuration.

use std::time::Duration;

/// Configuration for the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Running children of a PAR job when the job declares no concurrency
    pub max_concurrency: usize,
    /// How long a waiting dispatch blocks on a workspace result
    pub space_wait: Duration,
    /// Lease granted to monitored sessions
    pub lease: Duration,
    /// Execution timeout of monitored sessions
    pub timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            space_wait: Duration::from_secs(30),
            lease: Duration::from_secs(60),
            timeout: None,
        }
    }
}

impl DispatchConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Reads:
    /// - `EXERTION_MAX_CONCURRENCY`: default PAR concurrency
    /// - `EXERTION_SPACE_WAIT_MS`: workspace result wait
    /// - `EXERTION_LEASE_MS`: session lease
    /// - `EXERTION_TIMEOUT_MS`: session execution timeout
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrency = env_parse::<usize>("EXERTION_MAX_CONCURRENCY")
            .unwrap_or(defaults.max_concurrency);
        let space_wait = env_parse::<u64>("EXERTION_SPACE_WAIT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.space_wait);
        let lease = env_parse::<u64>("EXERTION_LEASE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.lease);
        let timeout = env_parse::<u64>("EXERTION_TIMEOUT_MS")
            .map(Duration::from_millis)
            .or(defaults.timeout);

        Self {
            max_concurrency: max_concurrency.max(1),
            space_wait,
            lease,
            timeout,
        }
    }

    /// Set the default PAR concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the workspace result wait.
    pub fn with_space_wait(mut self, wait: Duration) -> Self {
        self.space_wait = wait;
        self
    }

    /// Set the session lease.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Set the session execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Concurrency for a job declaring `declared` (0 = not declared).
    pub fn concurrency_for(&self, declared: usize) -> usize {
        if declared == 0 {
            self.max_concurrency.max(1)
        } else {
            declared
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_for() {
        let config = DispatchConfig::new().with_max_concurrency(0);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.concurrency_for(0), 1);
        assert_eq!(config.concurrency_for(8), 8);
    }

    #[test]
    fn test_from_env_reads_overrides() {
        std::env::set_var("EXERTION_SPACE_WAIT_MS", "1500");
        std::env::set_var("EXERTION_TIMEOUT_MS", "not a number");
        let config = DispatchConfig::from_env();
        std::env::remove_var("EXERTION_SPACE_WAIT_MS");
        std::env::remove_var("EXERTION_TIMEOUT_MS");

        assert_eq!(config.space_wait, Duration::from_millis(1500));
        assert_eq!(config.timeout, None);
        assert!(config.max_concurrency >= 1);
    }
}
