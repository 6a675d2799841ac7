//! Lease governance for monitored sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use exertion_core::{SessionId, Time};
use tracing::{debug, warn};

use crate::engine::MonitorHandle;

/// A lease handed to a governor.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// Governed session
    pub session: SessionId,
    /// Lease expiration; `None` while the unit waits in the workspace
    pub expiration: Option<Time>,
    /// Execution deadline derived from the session timeout
    pub deadline: Option<Time>,
}

/// Grants, renews and revokes session leases.
///
/// The governor reports back through the monitoring engine: an expired
/// grant becomes `lease_cancelled`, a passed deadline `timed_out`.
pub trait LeaseGovernor: Send + Sync {
    /// Expiration time of a lease of `duration` starting now.
    fn expiration(&self, duration: Duration) -> Time {
        chrono::Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
    }

    /// Start or replace governance of a session.
    fn grant(&self, grant: Grant);

    /// Stop governing a session.
    fn release(&self, session: SessionId);
}

/// Governor that never revokes anything.
#[derive(Debug, Default)]
pub struct NoopGovernor;

impl LeaseGovernor for NoopGovernor {
    fn grant(&self, _grant: Grant) {}

    fn release(&self, _session: SessionId) {}
}

/// Governor that periodically sweeps its grants for passed deadlines and
/// expirations.
pub struct SweepingGovernor {
    grants: Mutex<HashMap<SessionId, Grant>>,
    handle: MonitorHandle,
}

impl SweepingGovernor {
    /// Create a governor reporting to `handle`.
    pub fn new(handle: MonitorHandle) -> Arc<Self> {
        Arc::new(Self {
            grants: Mutex::new(HashMap::new()),
            handle,
        })
    }

    /// Spawn the sweep loop. It stops once the monitoring engine is gone.
    pub fn start(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !governor.sweep().await {
                    debug!("Monitoring engine closed, lease sweep stopped");
                    break;
                }
            }
        })
    }

    /// Check all grants once. Returns false when the engine is gone.
    pub async fn sweep(&self) -> bool {
        let now = chrono::Utc::now();
        let (timed_out, expired) = {
            let Ok(grants) = self.grants.lock() else {
                return false;
            };
            let timed_out: Vec<SessionId> = grants
                .values()
                .filter(|g| g.deadline.is_some_and(|d| d <= now))
                .map(|g| g.session)
                .collect();
            let expired: Vec<SessionId> = grants
                .values()
                .filter(|g| !timed_out.contains(&g.session))
                .filter(|g| g.expiration.is_some_and(|e| e <= now))
                .map(|g| g.session)
                .collect();
            (timed_out, expired)
        };

        for session in timed_out {
            self.forget(session);
            if let Err(e) = self.handle.timed_out(session).await {
                if self.handle.is_closed() {
                    return false;
                }
                warn!("Failed to time out session {}: {}", session, e);
            }
        }
        for session in expired {
            self.forget(session);
            if let Err(e) = self.handle.lease_cancelled(session).await {
                if self.handle.is_closed() {
                    return false;
                }
                warn!("Failed to cancel lease of session {}: {}", session, e);
            }
        }
        !self.handle.is_closed()
    }

    /// Revoke a grant now; the session fails with a lease fault.
    pub async fn cancel(&self, session: SessionId) -> crate::Result<()> {
        self.forget(session);
        self.handle.lease_cancelled(session).await
    }

    /// Current grant of a session.
    pub fn grant_for(&self, session: SessionId) -> Option<Grant> {
        self.grants.lock().ok()?.get(&session).cloned()
    }

    /// Number of governed sessions.
    pub fn len(&self) -> usize {
        self.grants.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Whether nothing is governed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, session: SessionId) {
        if let Ok(mut grants) = self.grants.lock() {
            grants.remove(&session);
        }
    }
}

impl LeaseGovernor for SweepingGovernor {
    fn grant(&self, grant: Grant) {
        debug!("Lease granted to {} until {:?}", grant.session, grant.expiration);
        if let Ok(mut grants) = self.grants.lock() {
            grants.insert(grant.session, grant);
        }
    }

    fn release(&self, session: SessionId) {
        self.forget(session);
    }
}
