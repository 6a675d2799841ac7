//! Exertion core data models.
//!
//! Units of work (tasks, jobs, blocks), their signatures, data and control
//! contexts, pipes, faults and the persisted shape of monitor sessions.

#![warn(missing_docs)]

// Identities
mod id;

// Unit of work
mod status;
mod signature;
mod context;
mod control;
mod fault;
mod condition;
mod pipe;
mod exertion;

// Monitoring
mod session;
mod event;

pub use id::*;

pub use status::Status;
pub use signature::{
    Deployment, Fidelity, Locality, Signature, SignatureType, CONCATENATOR, JOBBER, SERVICE_OP,
    SPACER,
};
pub use context::{DataContext, Direction, Entry};
pub use control::{Access, ControlContext, ExecClock, Flow, Strategy};
pub use fault::{Fault, FaultKind};
pub use condition::Condition;
pub use pipe::Pipe;
pub use exertion::{Alt, Block, BlockStep, Exertion, Job, ModelError, Opt, Task, UnitKind};

pub use session::{SessionRecord, UnitSnapshot};
pub use event::StatusEvent;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
