//! Session table - the monitoring state machine.
//!
//! Sessions of every monitored tree live in one flat map keyed by cookie.
//! Children are owned by the map and know their parent only by cookie, so
//! upward notification is a lookup, never a back pointer.
//!
//! Operations mutate the table and return the side effects to apply, in
//! order: persist a root, publish an event, grant or release a lease.

use std::collections::HashMap;
use std::time::Duration;
use exertion_core::{
    Alt, BlockStep, ControlContext, DataContext, Exertion, Fault, FaultKind, SessionId,
    SessionRecord, Status, StatusEvent, Time, UnitKind, UnitSnapshot,
};
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::lease::Grant;

/// Side effect requested by a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Write the tree rooted at this session
    Persist(SessionId),
    /// Publish a status event
    Event(StatusEvent),
    /// Hand a grant to the lease governor
    Grant(Grant),
    /// Release a session from lease governance
    Release(SessionId),
}

/// One node of a session tree.
#[derive(Debug, Clone)]
pub struct SessionNode {
    /// Session cookie
    pub cookie: SessionId,

    /// Parent cookie
    pub parent: Option<SessionId>,

    /// Child cookies in composition order
    pub children: Vec<SessionId>,

    /// Unit as registered; never modified
    pub initial: UnitSnapshot,

    /// Unit as last reported
    pub runtime: UnitSnapshot,

    /// Executor name given on init
    pub executor: Option<String>,

    /// Lease duration of the current grant
    pub lease: Option<Duration>,

    /// Lease expiration of the current grant
    pub expiration: Option<Time>,

    /// Execution timeout
    pub timeout: Option<Duration>,
}

impl SessionNode {
    fn new(cookie: SessionId, parent: Option<SessionId>, snapshot: UnitSnapshot) -> Self {
        Self {
            cookie,
            parent,
            children: Vec::new(),
            initial: snapshot.clone(),
            runtime: snapshot,
            executor: None,
            lease: None,
            expiration: None,
            timeout: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.runtime.control.status
    }

    /// Whether this session tracks a block alternative.
    pub fn is_alternative(&self) -> bool {
        self.runtime.kind == UnitKind::Alternative
    }

    /// Expiration reported to the lease governor; unbounded while queued.
    pub fn effective_expiration(&self) -> Option<Time> {
        if self.status() == Status::InSpace {
            None
        } else {
            self.expiration
        }
    }

    fn set_status(&mut self, status: Status) {
        self.runtime.control.status = status;
    }

    // Replace runtime data, keeping the session-owned clock and cookie.
    fn overwrite(&mut self, context: DataContext, control: ControlContext) {
        let clock = self.runtime.control.clock;
        self.runtime.context = context;
        self.runtime.control = control;
        self.runtime.control.clock = clock;
        self.runtime.control.session = Some(self.cookie);
    }

    fn event(&self) -> Effect {
        Effect::Event(StatusEvent::new(self.cookie, self.status(), self.runtime.clone()))
    }

    fn grant(&self, deadline_from: Option<Time>) -> Effect {
        let bounded = self.status() != Status::InSpace;
        let deadline = match (bounded, self.timeout, deadline_from) {
            (true, Some(timeout), Some(start)) => chrono::Duration::from_std(timeout)
                .ok()
                .map(|t| start + t),
            _ => None,
        };
        Effect::Grant(Grant {
            session: self.cookie,
            expiration: self.effective_expiration(),
            deadline,
        })
    }
}

/// Outcome of the state-aggregation rules over a composite's children.
///
/// - alternative: a single DONE child completes it
/// - R1: some FAILED and the rest DONE or SUSPENDED → FAILED
/// - R2: all DONE → DONE
/// - R3: some SUSPENDED and the rest DONE → SUSPENDED
///
/// Children still INITIAL, INSPACE, PROVISION, RUNNING or UPDATED keep the
/// composite unchanged.
pub fn aggregate(children: &[Status], alternative: bool) -> Option<Status> {
    let total = children.len();
    if total == 0 {
        return None;
    }
    let done = children.iter().filter(|s| **s == Status::Done).count();
    let failed = children.iter().filter(|s| s.is_failed()).count();
    let suspended = children.iter().filter(|s| **s == Status::Suspended).count();

    if alternative && done > 0 {
        return Some(Status::Done);
    }
    if failed > 0 && failed + done + suspended == total {
        return Some(Status::Failed);
    }
    if done == total {
        return Some(Status::Done);
    }
    if suspended > 0 && suspended + done == total {
        return Some(Status::Suspended);
    }
    None
}

/// All session trees known to a monitoring engine.
#[derive(Debug, Default)]
pub struct SessionTable {
    nodes: HashMap<SessionId, SessionNode>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions across all trees.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no session is tracked.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A session by cookie.
    pub fn get(&self, cookie: SessionId) -> Option<&SessionNode> {
        self.nodes.get(&cookie)
    }

    fn node(&self, cookie: SessionId) -> Result<&SessionNode> {
        self.nodes.get(&cookie).ok_or(MonitorError::SessionNotFound(cookie))
    }

    fn node_mut(&mut self, cookie: SessionId) -> Result<&mut SessionNode> {
        self.nodes.get_mut(&cookie).ok_or(MonitorError::SessionNotFound(cookie))
    }

    /// Build a session tree mirroring `exertion`, writing each session cookie
    /// into the matching unit. Returns the root cookie.
    pub fn register(&mut self, exertion: &mut Exertion) -> SessionId {
        let root = self.build(exertion, None);
        info!("Registered session tree {} for {} ({} sessions)", root, exertion.name(), self.subtree(root).len());
        root
    }

    fn build(&mut self, exertion: &mut Exertion, parent: Option<SessionId>) -> SessionId {
        let cookie = SessionId::new();
        exertion.control_mut().session = Some(cookie);
        self.nodes.insert(cookie, SessionNode::new(cookie, parent, UnitSnapshot::of(exertion)));

        let mut children = Vec::new();
        match exertion {
            Exertion::Task(_) => {}
            Exertion::Job(job) => {
                for child in job.children.iter_mut() {
                    children.push(self.build(child, Some(cookie)));
                }
            }
            Exertion::Block(block) => {
                let block_name = block.name.clone();
                for step in block.steps.iter_mut() {
                    let child = match step {
                        BlockStep::Unit(unit) => self.build(unit, Some(cookie)),
                        BlockStep::Opt(opt) => self.build(&mut opt.exertion, Some(cookie)),
                        BlockStep::Alt(alt) => self.build_alt(alt, &block_name, cookie),
                    };
                    children.push(child);
                }
            }
        }

        if let Some(node) = self.nodes.get_mut(&cookie) {
            node.children = children;
        }
        cookie
    }

    fn build_alt(&mut self, alt: &mut Alt, block_name: &str, parent: SessionId) -> SessionId {
        let cookie = SessionId::new();
        alt.session = Some(cookie);
        self.nodes.insert(cookie, SessionNode::new(cookie, Some(parent), UnitSnapshot::of_alt(alt, block_name)));

        let mut children = Vec::new();
        for branch in alt.branches.iter_mut() {
            children.push(self.build(&mut branch.exertion, Some(cookie)));
        }
        if let Some(node) = self.nodes.get_mut(&cookie) {
            node.children = children;
        }
        cookie
    }

    /// Move to RUNNING under a fresh grant.
    pub fn init(
        &mut self,
        cookie: SessionId,
        executor: &str,
        lease: Duration,
        timeout: Option<Duration>,
        expiration: Time,
    ) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let status = node.status();
        if !matches!(status, Status::Initial | Status::Updated | Status::Provision) {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "init", status });
        }

        node.set_status(Status::Running);
        node.runtime.control.clock.start();
        node.executor = Some(executor.to_string());
        node.lease = Some(lease);
        node.timeout = timeout;
        node.expiration = Some(expiration);
        debug!("Session {} RUNNING on {}", cookie, executor);

        let grant = node.grant(node.runtime.control.clock.started_at);
        let root = self.root_of(cookie);
        Ok(vec![Effect::Persist(root), grant])
    }

    /// Move to INSPACE under an unbounded grant.
    pub fn init_space(
        &mut self,
        cookie: SessionId,
        lease: Duration,
        timeout: Option<Duration>,
        expiration: Time,
    ) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let status = node.status();
        if matches!(status, Status::Running | Status::InSpace) || status.is_terminal() {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "init_space", status });
        }

        node.set_status(Status::InSpace);
        node.lease = Some(lease);
        node.timeout = timeout;
        node.expiration = Some(expiration);
        debug!("Session {} INSPACE", cookie);

        let grant = node.grant(None);
        let root = self.root_of(cookie);
        Ok(vec![Effect::Persist(root), grant])
    }

    /// Overwrite runtime data and set the status if it changed.
    pub fn update(
        &mut self,
        cookie: SessionId,
        context: DataContext,
        control: ControlContext,
        status: Status,
        expiration: Option<Time>,
    ) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let previous = node.status();
        if previous.is_terminal() && status != previous {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "update", status: previous });
        }
        node.overwrite(context, control);
        node.set_status(status);

        let mut effects = Vec::new();
        if previous != status {
            debug!("Session {} {} -> {}", cookie, previous, status);
            if status == Status::Running {
                node.runtime.control.clock.start();
            }
            if previous == Status::InSpace && !status.is_terminal() {
                // picked up from the workspace: the lease becomes bounded again
                if let Some(expiration) = expiration {
                    node.expiration = Some(expiration);
                }
                effects.push(node.grant(node.runtime.control.clock.started_at));
            }
            if status.is_terminal() {
                node.runtime.control.clock.stop();
            }
            effects.push(node.event());
            effects.extend(self.notify_parent(cookie)?);
            if status.is_terminal() {
                release(&mut effects, cookie);
            }
        }
        effects.push(Effect::Persist(self.root_of(cookie)));
        Ok(effects)
    }

    /// Complete a RUNNING or UPDATED session.
    pub fn done(
        &mut self,
        cookie: SessionId,
        context: DataContext,
        control: ControlContext,
    ) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let status = node.status();
        if !matches!(status, Status::Running | Status::Updated) {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "done", status });
        }

        node.overwrite(context, control);
        node.set_status(Status::Done);
        node.runtime.control.clock.stop();
        info!("Session {} ({}) DONE", cookie, node.runtime.name);

        let mut effects = vec![node.event()];
        effects.extend(self.notify_parent(cookie)?);
        effects.push(Effect::Persist(self.root_of(cookie)));
        release(&mut effects, cookie);
        Ok(effects)
    }

    /// Fail a RUNNING, INSPACE or PROVISION session.
    pub fn failed(
        &mut self,
        cookie: SessionId,
        context: DataContext,
        control: ControlContext,
    ) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let status = node.status();
        if !matches!(status, Status::Running | Status::InSpace | Status::Provision) {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "failed", status });
        }

        node.overwrite(context, control);
        let failure = node.runtime.control.failure_status();
        node.set_status(failure);
        node.runtime.control.clock.stop();
        warn!("Session {} ({}) {}", cookie, node.runtime.name, failure);

        let mut effects = vec![node.event()];
        effects.extend(self.notify_parent(cookie)?);
        effects.push(Effect::Persist(self.root_of(cookie)));
        release(&mut effects, cookie);
        Ok(effects)
    }

    /// The governor revoked the grant.
    pub fn lease_cancelled(&mut self, cookie: SessionId) -> Result<Vec<Effect>> {
        self.force_failed(cookie, "lease cancelled")
    }

    /// Execution exceeded its timeout.
    pub fn timed_out(&mut self, cookie: SessionId) -> Result<Vec<Effect>> {
        self.force_failed(cookie, "execution timed out")
    }

    fn force_failed(&mut self, cookie: SessionId, reason: &str) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        if node.status().is_terminal() {
            debug!("Session {} already {}, ignoring {}", cookie, node.status(), reason);
            return Ok(Vec::new());
        }

        let origin = node.runtime.name.clone();
        node.runtime.control.record(Fault::new(FaultKind::Lease, origin, reason));
        node.set_status(Status::Failed);
        node.runtime.control.clock.stop();
        warn!("Session {} ({}) FAILED: {}", cookie, node.runtime.name, reason);

        let mut effects = vec![node.event()];
        effects.extend(self.notify_parent(cookie)?);
        effects.push(Effect::Persist(self.root_of(cookie)));
        release(&mut effects, cookie);
        Ok(effects)
    }

    /// Renew the grant of a non-terminal session.
    pub fn renew(&mut self, cookie: SessionId, lease: Duration, expiration: Time) -> Result<Vec<Effect>> {
        let node = self.node_mut(cookie)?;
        let status = node.status();
        if status.is_terminal() {
            return Err(MonitorError::InvalidTransition { session: cookie, operation: "renew", status });
        }
        node.lease = Some(lease);
        node.expiration = Some(expiration);
        Ok(vec![node.grant(node.runtime.control.clock.started_at)])
    }

    /// Ask the parent to recompute; a root that is not RUNNING is released.
    pub fn notify_parent(&mut self, cookie: SessionId) -> Result<Vec<Effect>> {
        let node = self.node(cookie)?;
        match node.parent {
            Some(parent) => self.state_changed(parent),
            None if node.status() != Status::Running => Ok(vec![Effect::Release(cookie)]),
            None => Ok(Vec::new()),
        }
    }

    /// Recompute a composite's state from its immediate children.
    pub fn state_changed(&mut self, cookie: SessionId) -> Result<Vec<Effect>> {
        let node = self.node(cookie)?;
        let statuses: Vec<Status> = node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c).map(SessionNode::status))
            .collect();
        let previous = node.status();
        if previous.is_terminal() {
            debug!("Session {} already {}, ignoring late child report", cookie, previous);
            return Ok(Vec::new());
        }

        let Some(next) = aggregate(&statuses, node.is_alternative()) else {
            return Ok(Vec::new());
        };
        if next == previous {
            return Ok(Vec::new());
        }

        let node = self.node_mut(cookie)?;
        node.set_status(next);
        let mut effects = Vec::new();
        if next.is_terminal() {
            node.runtime.control.clock.stop();
        }
        if next == Status::Failed {
            let origin = node.runtime.name.clone();
            node.runtime.control.record(Fault::new(FaultKind::Executor, origin, "a child unit failed"));
        }
        info!("Session {} ({}) {} -> {} by aggregation", cookie, node.runtime.name, previous, next);

        effects.push(node.event());
        effects.extend(self.notify_parent(cookie)?);
        if next.is_terminal() {
            release(&mut effects, cookie);
        }
        effects.push(Effect::Persist(self.root_of(cookie)));
        Ok(effects)
    }

    /// Write request for the whole tree containing `cookie`.
    pub fn persist(&self, cookie: SessionId) -> Result<Effect> {
        self.node(cookie)?;
        Ok(Effect::Persist(self.root_of(cookie)))
    }

    /// Walk parent references up to the root.
    pub fn root_of(&self, cookie: SessionId) -> SessionId {
        let mut current = cookie;
        while let Some(parent) = self.nodes.get(&current).and_then(|n| n.parent) {
            current = parent;
        }
        current
    }

    /// Depth-first search for `target` in the tree below `from`.
    pub fn find(&self, from: SessionId, target: SessionId) -> Option<&SessionNode> {
        let mut stack = vec![from];
        while let Some(cookie) = stack.pop() {
            let node = self.nodes.get(&cookie)?;
            if cookie == target {
                return Some(node);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Cookies of `root` and all its descendants.
    pub fn subtree(&self, root: SessionId) -> Vec<SessionId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(cookie) = stack.pop() {
            if let Some(node) = self.nodes.get(&cookie) {
                out.push(cookie);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Persisted shape of the tree below `cookie`.
    pub fn record(&self, cookie: SessionId) -> Option<SessionRecord> {
        let node = self.nodes.get(&cookie)?;
        Some(SessionRecord {
            cookie,
            parent: node.parent,
            initial: node.initial.clone(),
            runtime: node.runtime.clone(),
            expiration: node.effective_expiration(),
            timeout_ms: node.timeout.map(|t| t.as_millis() as u64),
            children: node.children.iter().filter_map(|c| self.record(*c)).collect(),
        })
    }

    /// Drop a whole tree from the table.
    ///
    /// Trees stay in memory until forgotten, unless the engine prunes
    /// finished trees itself.
    pub fn forget(&mut self, root: SessionId) -> usize {
        let cookies = self.subtree(root);
        for cookie in &cookies {
            self.nodes.remove(cookie);
        }
        cookies.len()
    }
}

// Release a session once per operation.
fn release(effects: &mut Vec<Effect>, cookie: SessionId) {
    if !effects.iter().any(|e| matches!(e, Effect::Release(c) if *c == cookie)) {
        effects.push(Effect::Release(cookie));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exertion_core::{Block, Condition, Job, Opt, Signature, Task};

    fn task(name: &str) -> Task {
        Task::new(name, Signature::local(name, "Arithmetic"))
    }

    fn job3() -> Exertion {
        Job::new("job")
            .with_child(task("t1"))
            .with_child(task("t2"))
            .with_child(task("t3"))
            .into()
    }

    fn later() -> Time {
        chrono::Utc::now() + chrono::Duration::seconds(60)
    }

    fn cookie(unit: &Exertion, name: &str) -> SessionId {
        unit.find_by_name(name).and_then(Exertion::session).unwrap()
    }

    fn run(table: &mut SessionTable, id: SessionId) {
        table.init(id, "test", Duration::from_secs(60), None, later()).unwrap();
    }

    fn finish(table: &mut SessionTable, id: SessionId) -> Vec<Effect> {
        table.done(id, DataContext::default(), ControlContext::default()).unwrap()
    }

    fn fail(table: &mut SessionTable, id: SessionId) -> Vec<Effect> {
        table.failed(id, DataContext::default(), ControlContext::default()).unwrap()
    }

    fn events(effects: &[Effect]) -> usize {
        effects.iter().filter(|e| matches!(e, Effect::Event(_))).count()
    }

    #[test]
    fn test_register_mirrors_composition() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);

        assert_eq!(table.len(), 4);
        assert_eq!(unit.session(), Some(root));
        let t2 = cookie(&unit, "t2");
        assert_eq!(table.get(t2).unwrap().parent, Some(root));
        assert_eq!(table.root_of(t2), root);
    }

    #[test]
    fn test_register_block_with_alternative() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = Block::new("block")
            .with_alt(vec![
                Opt::new(Condition::False, task("b1")),
                Opt::new(Condition::True, task("b2")),
            ])
            .into();
        let root = table.register(&mut unit);

        // block + alt + 2 branches
        assert_eq!(table.len(), 4);
        let alt = table.get(root).unwrap().children[0];
        assert!(table.get(alt).unwrap().is_alternative());
        assert_eq!(table.get(alt).unwrap().children.len(), 2);
    }

    #[test]
    fn test_aggregation_rules() {
        use Status::*;
        assert_eq!(aggregate(&[Done, Done], false), Some(Done));
        assert_eq!(aggregate(&[Done, Failed], false), Some(Failed));
        assert_eq!(aggregate(&[Error, Suspended, Done], false), Some(Failed));
        assert_eq!(aggregate(&[Suspended, Done], false), Some(Suspended));
        assert_eq!(aggregate(&[Failed, Running], false), None);
        assert_eq!(aggregate(&[Done, InSpace], false), None);
        assert_eq!(aggregate(&[Provision, Initial], false), None);
        assert_eq!(aggregate(&[], false), None);
        // alternative: one DONE branch is enough
        assert_eq!(aggregate(&[Initial, Done], true), Some(Done));
        assert_eq!(aggregate(&[Failed, Done], true), Some(Done));
        assert_eq!(aggregate(&[Initial, Done], false), None);
    }

    #[test]
    fn test_init_rejects_running_and_inspace() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);

        run(&mut table, id);
        let err = table.init(id, "again", Duration::from_secs(1), None, later()).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { status: Status::Running, .. }));

        let mut queued: Exertion = task("q").into();
        let q = table.register(&mut queued);
        table.init_space(q, Duration::from_secs(1), None, later()).unwrap();
        assert!(table.init(q, "x", Duration::from_secs(1), None, later()).is_err());
        assert!(table.init_space(q, Duration::from_secs(1), None, later()).is_err());
    }

    #[test]
    fn test_inspace_expiration_is_unbounded() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("q").into();
        let id = table.register(&mut unit);

        let effects = table.init_space(id, Duration::from_secs(1), Some(Duration::from_secs(1)), later()).unwrap();
        let grant = effects.iter().find_map(|e| match e {
            Effect::Grant(g) => Some(g.clone()),
            _ => None,
        });
        assert_eq!(grant.unwrap().expiration, None);
        assert_eq!(table.get(id).unwrap().effective_expiration(), None);

        // picked up
        let effects = table
            .update(id, DataContext::default(), ControlContext::default(), Status::Running, Some(later()))
            .unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::Grant(g) if g.expiration.is_some())));
        assert!(table.get(id).unwrap().effective_expiration().is_some());
    }

    #[test]
    fn test_done_requires_running() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);

        let err = table.done(id, DataContext::default(), ControlContext::default()).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { operation: "done", .. }));
        assert_eq!(table.get(id).unwrap().status(), Status::Initial);
    }

    #[test]
    fn test_failed_with_runtime_fault_is_error() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        run(&mut table, id);

        let mut control = ControlContext::default();
        control.record(Fault::new(FaultKind::Runtime, "t", "overflow"));
        table.failed(id, DataContext::default(), control).unwrap();
        assert_eq!(table.get(id).unwrap().status(), Status::Error);
    }

    #[test]
    fn test_completion_propagates() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);
        run(&mut table, root);

        for name in ["t1", "t2"] {
            let id = cookie(&unit, name);
            run(&mut table, id);
            finish(&mut table, id);
            assert_eq!(table.get(root).unwrap().status(), Status::Running);
        }

        let t3 = cookie(&unit, "t3");
        run(&mut table, t3);
        let effects = finish(&mut table, t3);
        assert_eq!(table.get(root).unwrap().status(), Status::Done);
        // child event + parent event
        assert_eq!(events(&effects), 2);
        assert!(effects.iter().any(|e| matches!(e, Effect::Release(c) if *c == root)));
    }

    #[test]
    fn test_failure_waits_for_siblings() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);
        run(&mut table, root);

        let t1 = cookie(&unit, "t1");
        run(&mut table, t1);
        finish(&mut table, t1);

        let t2 = cookie(&unit, "t2");
        run(&mut table, t2);
        fail(&mut table, t2);
        // t3 never started: no rule fires
        assert_eq!(table.get(root).unwrap().status(), Status::Running);

        let t3 = cookie(&unit, "t3");
        run(&mut table, t3);
        finish(&mut table, t3);
        assert_eq!(table.get(root).unwrap().status(), Status::Failed);
    }

    #[test]
    fn test_aggregation_cascades_upward() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = Job::new("outer")
            .with_child(Job::new("inner").with_child(task("leaf")))
            .into();
        let root = table.register(&mut unit);

        let leaf = cookie(&unit, "leaf");
        run(&mut table, leaf);
        finish(&mut table, leaf);

        assert_eq!(table.get(cookie(&unit, "inner")).unwrap().status(), Status::Done);
        assert_eq!(table.get(root).unwrap().status(), Status::Done);
    }

    #[test]
    fn test_lease_transitions_idempotent_on_terminal() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        run(&mut table, id);
        finish(&mut table, id);

        assert!(table.timed_out(id).unwrap().is_empty());
        assert!(table.lease_cancelled(id).unwrap().is_empty());
        assert_eq!(table.get(id).unwrap().status(), Status::Done);
    }

    fn releases(effects: &[Effect], id: SessionId) -> usize {
        effects.iter().filter(|e| matches!(e, Effect::Release(c) if *c == id)).count()
    }

    #[test]
    fn test_update_cannot_reopen_terminal_session() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        run(&mut table, id);
        finish(&mut table, id);

        let err = table
            .update(id, DataContext::default(), ControlContext::default(), Status::Running, Some(later()))
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { operation: "update", status: Status::Done, .. }));
        assert_eq!(table.get(id).unwrap().status(), Status::Done);

        // refreshing data under the same status is fine and silent
        let context = DataContext::new("t").with_value("result/y", 1);
        let effects = table.update(id, context, ControlContext::default(), Status::Done, None).unwrap();
        assert_eq!(events(&effects), 0);
        assert_eq!(table.get(id).unwrap().runtime.context.get_f64("result/y"), Some(1.0));
        assert_eq!(table.get(id).unwrap().status(), Status::Done);
    }

    #[test]
    fn test_late_child_does_not_move_terminal_parent() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = Job::new("job").with_child(task("t1")).with_child(task("t2")).into();
        let root = table.register(&mut unit);
        run(&mut table, root);

        let t1 = cookie(&unit, "t1");
        run(&mut table, t1);
        finish(&mut table, t1);
        table.timed_out(root).unwrap();
        assert_eq!(table.get(root).unwrap().status(), Status::Failed);

        let t2 = cookie(&unit, "t2");
        run(&mut table, t2);
        let effects = finish(&mut table, t2);
        assert_eq!(table.get(root).unwrap().status(), Status::Failed);
        // only the child's own event
        assert_eq!(events(&effects), 1);
    }

    #[test]
    fn test_failed_from_provision() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        table
            .update(id, DataContext::default(), ControlContext::default(), Status::Provision, None)
            .unwrap();

        let mut control = ControlContext::default();
        control.record(Fault::new(FaultKind::Provision, "t", "not deployed"));
        let effects = table.failed(id, DataContext::default(), control).unwrap();
        assert_eq!(table.get(id).unwrap().status(), Status::Failed);
        assert_eq!(releases(&effects, id), 1);
    }

    #[test]
    fn test_picked_up_unit_finishing_through_update_is_released() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        table.register(&mut unit);
        let t1 = cookie(&unit, "t1");
        table.init_space(t1, Duration::from_secs(1), None, later()).unwrap();

        let effects = table
            .update(t1, DataContext::default(), ControlContext::default(), Status::Done, None)
            .unwrap();
        assert_eq!(releases(&effects, t1), 1);
    }

    #[test]
    fn test_root_released_once() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        run(&mut table, id);
        assert_eq!(releases(&finish(&mut table, id), id), 1);

        let mut other: Exertion = task("u").into();
        let other_id = table.register(&mut other);
        run(&mut table, other_id);
        assert_eq!(releases(&table.timed_out(other_id).unwrap(), other_id), 1);
    }

    #[test]
    fn test_timed_out_forces_failure() {
        let mut table = SessionTable::new();
        let mut unit: Exertion = task("t").into();
        let id = table.register(&mut unit);
        run(&mut table, id);

        let effects = table.timed_out(id).unwrap();
        assert_eq!(events(&effects), 1);
        let node = table.get(id).unwrap();
        assert_eq!(node.status(), Status::Failed);
        assert_eq!(node.runtime.control.faults[0].kind, FaultKind::Lease);

        // second call is a no-op
        assert!(table.lease_cancelled(id).unwrap().is_empty());
    }

    #[test]
    fn test_persist_targets_root() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);

        match table.persist(cookie(&unit, "t3")).unwrap() {
            Effect::Persist(target) => assert_eq!(target, root),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_find_and_record() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);
        let t2 = cookie(&unit, "t2");

        assert_eq!(table.find(root, t2).unwrap().runtime.name, "t2");
        assert!(table.find(t2, root).is_none());
        assert!(table.find(root, SessionId::new()).is_none());

        let record = table.record(root).unwrap();
        assert_eq!(record.size(), 4);
        assert_eq!(record.find(t2).unwrap().runtime.name, "t2");
    }

    #[test]
    fn test_forget_tree() {
        let mut table = SessionTable::new();
        let mut unit = job3();
        let root = table.register(&mut unit);
        assert_eq!(table.forget(root), 4);
        assert!(table.is_empty());
    }
}
