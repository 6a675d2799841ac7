//! Monitoring engine actor.
//!
//! One task owns the session table. Every operation, lease callbacks
//! included, arrives as a command on its channel and is applied in order.

use std::sync::Arc;
use std::time::Duration;
use exertion_core::{
    ControlContext, DataContext, Exertion, SessionId, SessionRecord, Status,
};
use exertion_storage::SessionStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::lease::{LeaseGovernor, NoopGovernor, SweepingGovernor};
use crate::notifier::{EventNotifier, StatusSubscriber};
use crate::session::{Effect, SessionTable};

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Register {
        exertion: Box<Exertion>,
        reply: Reply<Box<Exertion>>,
    },
    Init {
        session: SessionId,
        executor: String,
        lease: Duration,
        timeout: Option<Duration>,
        reply: Reply<Result<()>>,
    },
    InitSpace {
        session: SessionId,
        lease: Duration,
        timeout: Option<Duration>,
        reply: Reply<Result<()>>,
    },
    Update {
        session: SessionId,
        context: DataContext,
        control: Box<ControlContext>,
        status: Status,
        reply: Reply<Result<()>>,
    },
    Done {
        session: SessionId,
        context: DataContext,
        control: Box<ControlContext>,
        reply: Reply<Result<()>>,
    },
    Failed {
        session: SessionId,
        context: DataContext,
        control: Box<ControlContext>,
        reply: Reply<Result<()>>,
    },
    LeaseCancelled {
        session: SessionId,
        reply: Reply<Result<()>>,
    },
    TimedOut {
        session: SessionId,
        reply: Reply<Result<()>>,
    },
    Renew {
        session: SessionId,
        lease: Duration,
        reply: Reply<Result<()>>,
    },
    Persist {
        session: SessionId,
        reply: Reply<Result<()>>,
    },
    Status {
        session: SessionId,
        reply: Reply<Result<Status>>,
    },
    Session {
        root: SessionId,
        target: SessionId,
        reply: Reply<Option<SessionRecord>>,
    },
    Tree {
        session: SessionId,
        reply: Reply<Option<SessionRecord>>,
    },
    Forget {
        root: SessionId,
        reply: Reply<usize>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Cloneable client of a running monitoring engine.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
}

impl MonitorHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| MonitorError::Closed)?;
        rx.await.map_err(|_| MonitorError::Closed)
    }

    /// Whether the engine has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Build the session tree of `exertion`, returning it with every unit's
    /// session cookie set.
    pub async fn register(&self, exertion: Exertion) -> Result<Exertion> {
        let exertion = Box::new(exertion);
        self.call(|reply| Command::Register { exertion, reply }).await.map(|e| *e)
    }

    /// INITIAL/UPDATED/PROVISION → RUNNING under a bounded grant.
    pub async fn init(
        &self,
        session: SessionId,
        executor: impl Into<String>,
        lease: Duration,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let executor = executor.into();
        self.call(|reply| Command::Init { session, executor, lease, timeout, reply }).await?
    }

    /// → INSPACE under an unbounded grant.
    pub async fn init_space(
        &self,
        session: SessionId,
        lease: Duration,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.call(|reply| Command::InitSpace { session, lease, timeout, reply }).await?
    }

    /// Overwrite runtime data and set the status.
    pub async fn update(
        &self,
        session: SessionId,
        context: DataContext,
        control: ControlContext,
        status: Status,
    ) -> Result<()> {
        let control = Box::new(control);
        self.call(|reply| Command::Update { session, context, control, status, reply }).await?
    }

    /// RUNNING/UPDATED → DONE.
    pub async fn done(&self, session: SessionId, context: DataContext, control: ControlContext) -> Result<()> {
        let control = Box::new(control);
        self.call(|reply| Command::Done { session, context, control, reply }).await?
    }

    /// RUNNING/INSPACE/PROVISION → FAILED or ERROR.
    pub async fn failed(&self, session: SessionId, context: DataContext, control: ControlContext) -> Result<()> {
        let control = Box::new(control);
        self.call(|reply| Command::Failed { session, context, control, reply }).await?
    }

    /// Report the runtime state of a monitored unit as DONE.
    pub async fn done_unit(&self, unit: &Exertion) -> Result<()> {
        let session = monitored(unit)?;
        self.done(session, unit.context().clone(), unit.control().clone()).await
    }

    /// Report the runtime state of a monitored unit as failed.
    pub async fn failed_unit(&self, unit: &Exertion) -> Result<()> {
        let session = monitored(unit)?;
        self.failed(session, unit.context().clone(), unit.control().clone()).await
    }

    /// Revoke the grant; no-op on terminal sessions.
    pub async fn lease_cancelled(&self, session: SessionId) -> Result<()> {
        self.call(|reply| Command::LeaseCancelled { session, reply }).await?
    }

    /// Execution exceeded its timeout; no-op on terminal sessions.
    pub async fn timed_out(&self, session: SessionId) -> Result<()> {
        self.call(|reply| Command::TimedOut { session, reply }).await?
    }

    /// Extend the grant of a non-terminal session.
    pub async fn renew(&self, session: SessionId, lease: Duration) -> Result<()> {
        self.call(|reply| Command::Renew { session, lease, reply }).await?
    }

    /// Write the tree containing `session` through the store.
    pub async fn persist(&self, session: SessionId) -> Result<()> {
        self.call(|reply| Command::Persist { session, reply }).await?
    }

    /// Current status of a session.
    pub async fn status(&self, session: SessionId) -> Result<Status> {
        self.call(|reply| Command::Status { session, reply }).await?
    }

    /// Depth-first lookup of `target` in the tree below `root`.
    pub async fn session(&self, root: SessionId, target: SessionId) -> Result<Option<SessionRecord>> {
        self.call(|reply| Command::Session { root, target, reply }).await
    }

    /// Whole tree containing `session`.
    pub async fn tree(&self, session: SessionId) -> Result<Option<SessionRecord>> {
        self.call(|reply| Command::Tree { session, reply }).await
    }

    /// Drop a finished tree from memory. Returns the number of sessions removed.
    pub async fn forget(&self, root: SessionId) -> Result<usize> {
        self.call(|reply| Command::Forget { root, reply }).await
    }

    /// Stop the engine after all queued commands.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}

fn monitored(unit: &Exertion) -> Result<SessionId> {
    unit.session()
        .ok_or_else(|| MonitorError::NotMonitored(unit.name().to_string()))
}

/// The monitoring engine before it is started.
pub struct MonitoringEngine {
    config: MonitorConfig,
    table: SessionTable,
    store: Arc<dyn SessionStore>,
    governor: Arc<dyn LeaseGovernor>,
    subscribers: Vec<Arc<dyn StatusSubscriber>>,
    rx: mpsc::Receiver<Command>,
}

impl MonitoringEngine {
    /// Create an engine and the handle that drives it.
    pub fn new(config: MonitorConfig, store: Arc<dyn SessionStore>) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let engine = Self {
            config,
            table: SessionTable::new(),
            store,
            governor: Arc::new(NoopGovernor),
            subscribers: Vec::new(),
            rx,
        };
        (engine, MonitorHandle { tx })
    }

    /// Use `governor` for lease governance.
    pub fn with_governor(mut self, governor: Arc<dyn LeaseGovernor>) -> Self {
        self.governor = governor;
        self
    }

    /// Add a status subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn StatusSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Start an engine with a sweeping lease governor.
    pub fn spawn(
        config: MonitorConfig,
        store: Arc<dyn SessionStore>,
        subscribers: Vec<Arc<dyn StatusSubscriber>>,
    ) -> (MonitorHandle, Arc<SweepingGovernor>) {
        let interval = config.sweep_interval;
        let (mut engine, handle) = Self::new(config, store);
        let governor = SweepingGovernor::new(handle.clone());
        engine = engine.with_governor(governor.clone());
        for subscriber in subscribers {
            engine = engine.with_subscriber(subscriber);
        }
        engine.start();
        governor.start(interval);
        (handle, governor)
    }

    /// Run the actor loop on the current runtime.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let notifier = EventNotifier::spawn(
            self.config.workers(),
            self.config.notifier_capacity,
            std::mem::take(&mut self.subscribers),
        );
        info!("Monitoring engine started ({} notifier workers)", self.config.workers());

        while let Some(command) = self.rx.recv().await {
            if let Command::Shutdown { reply } = command {
                let _ = reply.send(());
                break;
            }
            self.handle(command, &notifier).await;
        }
        info!("Monitoring engine stopped ({} sessions in memory)", self.table.len());
    }

    async fn handle(&mut self, command: Command, notifier: &EventNotifier) {
        match command {
            Command::Register { mut exertion, reply } => {
                self.table.register(&mut exertion);
                let _ = reply.send(exertion);
            }
            Command::Init { session, executor, lease, timeout, reply } => {
                let expiration = self.governor.expiration(lease);
                let result = self.table.init(session, &executor, lease, timeout, expiration);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::InitSpace { session, lease, timeout, reply } => {
                let expiration = self.governor.expiration(lease);
                let result = self.table.init_space(session, lease, timeout, expiration);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Update { session, context, control, status, reply } => {
                let expiration = self
                    .table
                    .get(session)
                    .and_then(|n| n.lease)
                    .map(|lease| self.governor.expiration(lease));
                let result = self.table.update(session, context, *control, status, expiration);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Done { session, context, control, reply } => {
                let result = self.table.done(session, context, *control);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Failed { session, context, control, reply } => {
                let result = self.table.failed(session, context, *control);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::LeaseCancelled { session, reply } => {
                let result = self.table.lease_cancelled(session);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::TimedOut { session, reply } => {
                let result = self.table.timed_out(session);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Renew { session, lease, reply } => {
                let expiration = self.governor.expiration(lease);
                let result = self.table.renew(session, lease, expiration);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Persist { session, reply } => {
                let result = self.table.persist(session).map(|effect| vec![effect]);
                let _ = reply.send(self.apply(result, notifier).await);
            }
            Command::Status { session, reply } => {
                let status = self
                    .table
                    .get(session)
                    .map(|n| n.status())
                    .ok_or(MonitorError::SessionNotFound(session));
                let _ = reply.send(status);
            }
            Command::Session { root, target, reply } => {
                let found = self.table.find(root, target).and_then(|n| self.table.record(n.cookie));
                let _ = reply.send(found);
            }
            Command::Tree { session, reply } => {
                let _ = reply.send(self.table.record(self.table.root_of(session)));
            }
            Command::Forget { root, reply } => {
                let removed = self.table.forget(root);
                debug!("Forgot {} sessions of tree {}", removed, root);
                let _ = reply.send(removed);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn apply(&mut self, result: Result<Vec<Effect>>, notifier: &EventNotifier) -> Result<()> {
        let effects = match result {
            Ok(effects) => effects,
            Err(e) => {
                warn!("Monitor protocol fault: {}", e);
                return Err(e);
            }
        };

        let mut persisted = Vec::new();
        for effect in effects {
            match effect {
                Effect::Event(event) => notifier.publish(event),
                Effect::Grant(grant) => self.governor.grant(grant),
                Effect::Release(session) => self.governor.release(session),
                Effect::Persist(root) => {
                    // one write per root per operation
                    if persisted.contains(&root) {
                        continue;
                    }
                    persisted.push(root);
                    self.save(root).await;
                }
            }
        }

        if self.config.prune_finished {
            for root in persisted {
                let finished = self.table.get(root).is_some_and(|n| n.status().is_terminal());
                if finished {
                    let removed = self.table.forget(root);
                    debug!("Pruned {} sessions of finished tree {}", removed, root);
                }
            }
        }
        Ok(())
    }

    async fn save(&self, root: SessionId) {
        let Some(record) = self.table.record(root) else {
            warn!("Cannot persist unknown session tree {}", root);
            return;
        };
        if let Err(e) = self.store.save(&record).await {
            error!("Failed to persist session tree {}: {}", root, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exertion_core::{Job, Signature, Task};
    use exertion_storage::MemorySessionStore;
    use crate::notifier::ChannelSubscriber;

    fn task(name: &str) -> Task {
        Task::new(name, Signature::local(name, "Arithmetic"))
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_persist_writes_root_once() {
        let store = Arc::new(MemorySessionStore::new());
        let (engine, handle) = MonitoringEngine::new(MonitorConfig::default(), store.clone());
        engine.start();

        let unit = handle
            .register(Job::new("job").with_child(task("t1")).with_child(task("t2")).into())
            .await
            .unwrap();
        let root = unit.session().unwrap();
        let child = unit.find_by_name("t2").and_then(Exertion::session).unwrap();

        handle.persist(child).await.unwrap();
        assert_eq!(store.writes(), vec![root]);
    }

    #[tokio::test]
    async fn test_protocol_fault_leaves_state() {
        let store = Arc::new(MemorySessionStore::new());
        let (engine, handle) = MonitoringEngine::new(MonitorConfig::default(), store.clone());
        engine.start();

        let unit = handle.register(task("t").into()).await.unwrap();
        let id = unit.session().unwrap();

        let err = handle.done_unit(&unit).await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { .. }));
        assert_eq!(handle.status(id).await.unwrap(), Status::Initial);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_events_and_terminal_idempotence() {
        let store = Arc::new(MemorySessionStore::new());
        let (subscriber, mut events) = ChannelSubscriber::new();
        let (engine, handle) = MonitoringEngine::new(MonitorConfig::default().with_notifier_workers(1), store);
        engine.with_subscriber(Arc::new(subscriber)).start();

        let unit = handle.register(task("t").into()).await.unwrap();
        let id = unit.session().unwrap();
        handle.init(id, "local", LEASE, None).await.unwrap();
        handle.done_unit(&unit).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.status, Status::Done);
        assert_eq!(event.session, id);

        handle.timed_out(id).await.unwrap();
        handle.lease_cancelled(id).await.unwrap();
        assert_eq!(handle.status(id).await.unwrap(), Status::Done);

        // no event for the ignored callbacks
        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finished_tree_pruned_after_persist() {
        let store = Arc::new(MemorySessionStore::new());
        let config = MonitorConfig::default().with_prune_finished(true);
        let (engine, handle) = MonitoringEngine::new(config, store.clone());
        engine.start();

        let unit = handle
            .register(Job::new("job").with_child(task("t1")).into())
            .await
            .unwrap();
        let root = unit.session().unwrap();
        let child = unit.find_by_name("t1").and_then(Exertion::session).unwrap();
        handle.init(root, "local", LEASE, None).await.unwrap();
        handle.init(child, "local", LEASE, None).await.unwrap();
        // a running tree stays in memory
        assert_eq!(handle.status(child).await.unwrap(), Status::Running);

        let t1 = unit.find_by_name("t1").unwrap();
        handle.done(child, t1.context().clone(), t1.control().clone()).await.unwrap();

        assert!(matches!(handle.status(root).await, Err(MonitorError::SessionNotFound(_))));
        assert!(matches!(handle.status(child).await, Err(MonitorError::SessionNotFound(_))));
        let record = store.load(root).await.unwrap().unwrap();
        assert_eq!(record.status(), Status::Done);
    }

    #[tokio::test]
    async fn test_sweeping_governor_times_out() {
        let store = Arc::new(MemorySessionStore::new());
        let config = MonitorConfig::default().with_sweep_interval(Duration::from_millis(10));
        let (handle, governor) = MonitoringEngine::spawn(config, store, Vec::new());

        let unit = handle.register(task("slow").into()).await.unwrap();
        let id = unit.session().unwrap();
        handle.init(id, "local", LEASE, Some(Duration::from_millis(20))).await.unwrap();
        assert!(governor.grant_for(id).is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status(id).await.unwrap(), Status::Failed);
        assert!(governor.is_empty());

        let tree = handle.tree(id).await.unwrap().unwrap();
        assert!(tree.runtime.control.faults[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_and_renew() {
        let store = Arc::new(MemorySessionStore::new());
        let (handle, governor) = MonitoringEngine::spawn(MonitorConfig::default(), store, Vec::new());

        let unit = handle.register(task("t").into()).await.unwrap();
        let id = unit.session().unwrap();
        handle.init(id, "local", LEASE, None).await.unwrap();

        let before = governor.grant_for(id).unwrap().expiration.unwrap();
        handle.renew(id, LEASE * 2).await.unwrap();
        let after = governor.grant_for(id).unwrap().expiration.unwrap();
        assert!(after > before);

        governor.cancel(id).await.unwrap();
        assert_eq!(handle.status(id).await.unwrap(), Status::Failed);
        assert!(handle.renew(id, LEASE).await.is_err());
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let store = Arc::new(MemorySessionStore::new());
        let (engine, handle) = MonitoringEngine::new(MonitorConfig::default(), store);
        engine.start();

        let unit = handle
            .register(Job::new("job").with_child(task("t1")).into())
            .await
            .unwrap();
        let root = unit.session().unwrap();
        let t1 = unit.find_by_name("t1").and_then(Exertion::session).unwrap();

        assert_eq!(handle.session(root, t1).await.unwrap().unwrap().runtime.name, "t1");
        assert!(handle.session(t1, root).await.unwrap().is_none());
        assert_eq!(handle.tree(t1).await.unwrap().unwrap().cookie, root);
        assert_eq!(handle.forget(root).await.unwrap(), 2);
        assert!(handle.status(t1).await.is_err());
    }
}
