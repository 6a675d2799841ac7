//! Session monitoring for exertions.
//!
//! Mirrors each monitored unit's composition tree with a tree of sessions,
//! drives every session through its lifecycle under a lease, aggregates
//! child states into parents and persists whole trees from the root.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod lease;
pub mod notifier;
pub mod session;

pub use config::{MonitorConfig, MAX_NOTIFIERS};
pub use engine::{MonitorHandle, MonitoringEngine};
pub use error::{MonitorError, Result};
pub use lease::{Grant, LeaseGovernor, NoopGovernor, SweepingGovernor};
pub use notifier::{ChannelSubscriber, EventNotifier, LoggingSubscriber, NotifyError, StatusSubscriber};
pub use session::{aggregate, Effect, SessionNode, SessionTable};
