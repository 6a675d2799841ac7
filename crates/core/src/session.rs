//! Session records - the persisted shape of a monitor session tree.

use crate::context::DataContext;
use crate::control::ControlContext;
use crate::exertion::{Alt, Exertion, UnitKind};
use crate::id::{ExertionId, SessionId};
use crate::status::Status;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Flat view of one unit: everything but its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit identifier
    pub exertion: ExertionId,

    /// Unit name
    pub name: String,

    /// Unit kind
    pub kind: UnitKind,

    /// Data context
    pub context: DataContext,

    /// Control context (status lives here)
    pub control: ControlContext,
}

impl UnitSnapshot {
    /// Snapshot an exertion without its children.
    pub fn of(exertion: &Exertion) -> Self {
        Self {
            exertion: exertion.id(),
            name: exertion.name().to_string(),
            kind: exertion.kind(),
            context: exertion.context().clone(),
            control: exertion.control().clone(),
        }
    }

    /// Snapshot a block alternative.
    pub fn of_alt(alt: &Alt, block_name: &str) -> Self {
        let mut control = ControlContext::default();
        control.status = alt.status;
        control.session = alt.session;
        Self {
            exertion: alt.id,
            name: format!("{}/alt", block_name),
            kind: UnitKind::Alternative,
            context: DataContext::new("alt"),
            control,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.control.status
    }
}

/// A persisted monitor session and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session cookie
    pub cookie: SessionId,

    /// Parent session, absent for the root
    pub parent: Option<SessionId>,

    /// Unit as first registered
    pub initial: UnitSnapshot,

    /// Unit as last reported
    pub runtime: UnitSnapshot,

    /// Lease expiration; absent when unbounded or not granted
    pub expiration: Option<Time>,

    /// Execution timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Child sessions in composition order
    pub children: Vec<SessionRecord>,
}

impl SessionRecord {
    /// Current status.
    pub fn status(&self) -> Status {
        self.runtime.status()
    }

    /// Depth-first search for a session in this subtree.
    pub fn find(&self, cookie: SessionId) -> Option<&SessionRecord> {
        if self.cookie == cookie {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(cookie))
    }

    /// Depth-first search by unit name.
    pub fn find_by_name(&self, name: &str) -> Option<&SessionRecord> {
        if self.runtime.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_name(name))
    }

    /// Number of sessions in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(SessionRecord::size).sum::<usize>()
    }
}
