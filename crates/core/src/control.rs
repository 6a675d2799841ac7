//! Control context - execution strategy and live status of a unit.

use crate::fault::{Fault, FaultKind};
use crate::id::SessionId;
use crate::status::Status;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Order in which a composite runs its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flow {
    /// One child at a time, in declaration order
    #[default]
    Seq,
    /// Independent children concurrently
    Par,
}

/// How a unit reaches its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Access {
    /// Direct call to a resolved executor
    #[default]
    Push,
    /// Hand-off through the workspace queue
    Pull,
}

/// Execution strategy of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    /// Child ordering
    pub flow: Flow,
    /// Dispatch access mode
    pub access: Access,
    /// Provision executors on demand
    pub provision: bool,
    /// Track the unit with a monitor session tree
    pub monitor: bool,
    /// Block on queue hand-off until a result is written back
    pub wait: bool,
    /// Maximum concurrently running children for PAR flow (0 = engine default)
    pub concurrency: usize,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            flow: Flow::Seq,
            access: Access::Push,
            provision: false,
            monitor: false,
            wait: true,
            concurrency: 0,
        }
    }
}

impl Strategy {
    /// Create the default strategy (SEQ, PUSH, waiting, unmonitored).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set flow.
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = flow;
        self
    }

    /// Set access.
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Enable or disable provisioning.
    pub fn with_provision(mut self, provision: bool) -> Self {
        self.provision = provision;
        self
    }

    /// Enable or disable monitoring.
    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    /// Enable or disable waiting on queue hand-off.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Set the declared concurrency of a PAR composite.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Wall-clock execution time of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecClock {
    /// First time the unit went RUNNING
    pub started_at: Option<Time>,
    /// When it reached a terminal state
    pub stopped_at: Option<Time>,
}

impl ExecClock {
    /// Start the clock unless it is already running.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now());
        }
    }

    /// Stop the clock.
    pub fn stop(&mut self) {
        if self.started_at.is_some() && self.stopped_at.is_none() {
            self.stopped_at = Some(chrono::Utc::now());
        }
    }

    /// Elapsed execution time, if started.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.stopped_at.unwrap_or_else(chrono::Utc::now);
        Some(end - start)
    }
}

/// Strategy plus live status, fault log and trace of a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlContext {
    /// Execution strategy
    pub strategy: Strategy,

    /// Current status
    pub status: Status,

    /// Exception log
    pub faults: Vec<Fault>,

    /// Free-form execution trace
    pub trace: Vec<String>,

    /// Monitor session cookie, set when the unit is monitored
    pub session: Option<SessionId>,

    /// Execution clock
    pub clock: ExecClock,
}

impl ControlContext {
    /// Create a control context with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Append a trace line.
    pub fn trace(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    /// Record a fault and mirror it on the trace.
    pub fn record(&mut self, fault: Fault) {
        self.trace.push(fault.to_string());
        self.faults.push(fault);
    }

    /// Whether any fatal fault is recorded.
    pub fn has_fatal_fault(&self) -> bool {
        self.faults.iter().any(|f| f.fatal)
    }

    /// First fatal fault, if any.
    pub fn first_fatal(&self) -> Option<&Fault> {
        self.faults.iter().find(|f| f.fatal)
    }

    /// FAILED, or ERROR when the first fatal fault is a runtime fault.
    pub fn failure_status(&self) -> Status {
        match self.first_fatal() {
            Some(fault) if fault.kind == FaultKind::Runtime => Status::Error,
            _ => Status::Failed,
        }
    }

    /// Record a fatal fault and move to the matching failure status.
    pub fn fail(&mut self, fault: Fault) {
        self.record(fault);
        self.status = self.failure_status();
    }
}
