//! The dispatch engine - routes units to executors and runs composites.
//!
//! Per unit:
//! ```text
//! Preconditions → Collapse single-child job → Provision → Correct signature
//!   → Local | Workspace | Resolve → Admit → Invoke → Reconcile
//! ```
//! Composites run in-process recurse through [`DispatchEngine::exert`].

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use exertion_core::{
    Alt, Block, BlockStep, ControlContext, DataContext, Exertion, ExertionId, Fault, FaultKind,
    Flow, Job, SessionId, Signature, Status, TxnId, UnitKind, CONCATENATOR, JOBBER,
};
use exertion_monitor::{aggregate, MonitorHandle};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::admission::LocalAdmissionLock;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, ExecutorError, Result};
use crate::pipe::{PipeGraph, Resolution};
use crate::routing::{corrected_signature, route, Route};
use crate::traits::{
    AdmissionLock, Depender, Directory, Executor, OutputPersister, Provisioner, Workspace,
};

/// Dispatches units of work.
///
/// Shared as `Arc<DispatchEngine>`; parallel children run on their own tasks.
pub struct DispatchEngine {
    config: DispatchConfig,
    directory: Arc<dyn Directory>,
    locals: HashMap<String, Arc<dyn Executor>>,
    admission: Arc<dyn AdmissionLock>,
    workspace: Option<Arc<dyn Workspace>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    monitor: Option<MonitorHandle>,
    dependers: HashMap<ExertionId, Vec<Arc<dyn Depender>>>,
    persisters: HashMap<ExertionId, Vec<(String, Arc<dyn OutputPersister>)>>,
}

impl DispatchEngine {
    /// Create an engine resolving remote signatures through `directory`.
    pub fn new(config: DispatchConfig, directory: Arc<dyn Directory>) -> Self {
        Self {
            config,
            directory,
            locals: HashMap::new(),
            admission: Arc::new(LocalAdmissionLock::new()),
            workspace: None,
            provisioner: None,
            monitor: None,
            dependers: HashMap::new(),
            persisters: HashMap::new(),
        }
    }

    /// Serve local signatures of `capability` in-process.
    pub fn with_local(mut self, capability: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.locals.insert(capability.into(), executor);
        self
    }

    /// Use `admission` for mutually exclusive executors.
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionLock>) -> Self {
        self.admission = admission;
        self
    }

    /// Hand PULL units to `workspace`.
    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Provision deployments through `provisioner`.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Report monitored units to a monitoring engine.
    pub fn with_monitor(mut self, monitor: MonitorHandle) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run `depender` before the unit `id` executes.
    pub fn with_depender(mut self, id: ExertionId, depender: Arc<dyn Depender>) -> Self {
        self.dependers.entry(id).or_default().push(depender);
        self
    }

    /// Write `path` of unit `id` back to `persister` after dispatch.
    pub fn with_persister(
        mut self,
        id: ExertionId,
        path: impl Into<String>,
        persister: Arc<dyn OutputPersister>,
    ) -> Self {
        self.persisters.entry(id).or_default().push((path.into(), persister));
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch a unit and return it with its final context and status.
    ///
    /// Faults raised on the way are recorded on the unit, never returned.
    /// The only error is a monitored unit the monitoring engine refused to
    /// register.
    pub async fn dispatch(self: &Arc<Self>, unit: Exertion, txn: Option<TxnId>) -> Result<Exertion> {
        let mut unit = unit;
        if unit.strategy().monitor && unit.session().is_none() {
            match &self.monitor {
                Some(monitor) => unit = monitor.register(unit).await?,
                None => warn!("{} asks for monitoring but no monitor is configured", unit.name()),
            }
        }

        info!("Dispatching {:?} {}", unit.kind(), unit.name());
        let unit = Arc::clone(self).exert(unit, txn).await;
        self.write_back(&unit).await;
        info!("{} finished {}", unit.name(), unit.status());
        Ok(unit)
    }

    /// Dispatch one unit of a tree, recursing into composites.
    pub fn exert(self: Arc<Self>, unit: Exertion, txn: Option<TxnId>) -> BoxFuture<'static, Exertion> {
        Box::pin(async move {
            let mut unit = unit;
            let outcome = match self.realize(&mut unit).await {
                Ok(()) => self.execute(&mut unit, txn).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                fault(&mut unit, e);
            }
            if unit.status().is_terminal() {
                unit.control_mut().clock.stop();
            }
            self.report(&unit).await;
            unit
        })
    }

    async fn realize(&self, unit: &mut Exertion) -> Result<()> {
        let Some(dependers) = self.dependers.get(&unit.id()) else {
            return Ok(());
        };
        let id = unit.id();
        for depender in dependers {
            depender
                .realize(id, unit.context_mut())
                .await
                .map_err(|e| DispatchError::Precondition(e.to_string()))?;
        }
        debug!("Realized {} preconditions of {}", dependers.len(), unit.name());
        Ok(())
    }

    async fn execute(self: &Arc<Self>, unit: &mut Exertion, txn: Option<TxnId>) -> Result<()> {
        if matches!(unit, Exertion::Job(job) if job.children.len() == 1) {
            return self.collapse(unit, txn).await;
        }

        self.provision(unit).await?;

        if unit.is_composite() {
            let correction = unit
                .signature()
                .map(|sig| (sig.clone(), corrected_signature(sig, unit.strategy(), unit.kind())));
            if let Some((original, fixed)) = correction {
                if original != fixed {
                    debug!("Corrected signature of {}: {} -> {}", unit.name(), original, fixed);
                    unit.control_mut().trace(format!("signature corrected to {}", fixed));
                    unit.set_signature(fixed);
                }
            }
        }

        match route(unit) {
            Route::Local => match unit.kind() {
                UnitKind::Task => self.run_batch(unit, txn).await,
                UnitKind::Job => self.run_job(unit, txn).await,
                UnitKind::Block => self.run_block(unit, txn).await,
                UnitKind::Alternative => Ok(()),
            },
            Route::Space => self.run_in_space(unit).await,
            Route::Remote(signature) if unit.is_composite() => {
                let executor = self.resolve(&signature).await?;
                self.begin(unit, executor.name()).await;
                self.invoke(unit, &executor, &signature, txn).await?;
                settle(unit);
                Ok(())
            }
            Route::Remote(_) => self.run_batch(unit, txn).await,
        }
    }

    // A job with a single child takes the child's outcome as its own.
    async fn collapse(self: &Arc<Self>, unit: &mut Exertion, txn: Option<TxnId>) -> Result<()> {
        self.begin(unit, JOBBER).await;
        let Exertion::Job(job) = unit else {
            return Ok(());
        };
        debug!("Job {} has a single child, dispatching it directly", job.name);

        let child = job.children[0].clone();
        let done = Arc::clone(self).exert(child, txn).await;
        let status = done.status();
        job.context = done.context().clone();
        if status.is_failed() {
            job.control.record(Fault::new(FaultKind::Executor, job.name.clone(), failure_message(&done)));
        }
        job.control.status = status;
        job.children[0] = done;
        Ok(())
    }

    async fn provision(&self, unit: &mut Exertion) -> Result<()> {
        if !unit.strategy().provision {
            return Ok(());
        }
        let deployable: Vec<Signature> = match &*unit {
            Exertion::Task(task) => task
                .fidelity()
                .map(|f| f.signatures.clone())
                .unwrap_or_default(),
            other => other.signature().cloned().into_iter().collect(),
        }
        .into_iter()
        .filter(|s| s.deployment.is_some())
        .collect();
        if deployable.is_empty() {
            return Ok(());
        }

        let Some(provisioner) = &self.provisioner else {
            return Err(DispatchError::NotDeployed(format!("{} (no provisioner)", unit.name())));
        };
        unit.set_status(Status::Provision);
        if let Some(session) = unit.session() {
            self.sync(session, unit.context().clone(), unit.control().clone(), Status::Provision)
                .await;
        }

        info!("Provisioning {} signatures for {}", deployable.len(), unit.name());
        if provisioner.ensure_deployed(&deployable).await {
            Ok(())
        } else {
            let names: Vec<String> = deployable.iter().map(ToString::to_string).collect();
            Err(DispatchError::NotDeployed(names.join(", ")))
        }
    }

    async fn resolve(&self, signature: &Signature) -> Result<Arc<dyn Executor>> {
        let found = if signature.is_local() {
            self.locals.get(&signature.capability).cloned()
        } else {
            self.directory.resolve(signature).await
        };
        found.ok_or_else(|| DispatchError::NoExecutor(signature.to_string()))
    }

    // PRE, PROCESS and POST signatures of a task, on the same context.
    async fn run_batch(&self, unit: &mut Exertion, txn: Option<TxnId>) -> Result<()> {
        let Exertion::Task(task) = &*unit else {
            return Ok(());
        };
        let steps: Vec<Signature> = task
            .fidelity()
            .map(|f| f.in_batch_order().into_iter().cloned().collect())
            .unwrap_or_default();
        if steps.is_empty() {
            return Err(DispatchError::NoExecutor(format!("{} has no signature", task.name)));
        }

        for signature in &steps {
            let executor = self.resolve(signature).await?;
            if unit.status() != Status::Running {
                self.begin(unit, executor.name()).await;
            }
            self.invoke(unit, &executor, signature, txn).await?;
            if unit.control().has_fatal_fault() {
                break;
            }
        }
        settle(unit);
        Ok(())
    }

    async fn invoke(
        &self,
        unit: &mut Exertion,
        executor: &Arc<dyn Executor>,
        signature: &Signature,
        txn: Option<TxnId>,
    ) -> Result<()> {
        let admitted = if executor.requires_mutual_exclusion() {
            let txn = txn.unwrap_or_else(TxnId::new);
            let key = format!("{}:{}", signature.capability, executor.name());
            self.admit(&key, txn).await?;
            Some(txn)
        } else {
            None
        };

        debug!("Invoking {} on {}", signature, executor.name());
        unit.control_mut().trace(format!("{} on {}", signature, executor.name()));
        let result = executor.invoke(unit.clone(), admitted.or(txn)).await;

        if let Some(txn) = admitted {
            let released = match &result {
                Ok(_) => self.admission.commit(txn).await,
                Err(_) => self.admission.abort(txn).await,
            };
            if let Err(e) = released {
                warn!("Failed to release admission {}: {}", txn, e);
            }
        }

        match result {
            Ok(Some(done)) => Ok(unit.reconcile(done)?),
            Ok(None) => Err(DispatchError::NoResult(executor.name().to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn admit(&self, key: &str, txn: TxnId) -> Result<()> {
        let denied = match self.admission.acquire(key, txn).await {
            Ok(true) => return Ok(()),
            Ok(false) => DispatchError::AdmissionDenied(key.to_string()),
            Err(e) => e.into(),
        };
        if let Err(e) = self.admission.abort(txn).await {
            warn!("Failed to abort admission {}: {}", txn, e);
        }
        Err(denied)
    }

    async fn run_in_space(&self, unit: &mut Exertion) -> Result<()> {
        let Some(space) = &self.workspace else {
            return Err(DispatchError::NoExecutor(format!("{} (no workspace)", unit.name())));
        };

        if let (Some(monitor), Some(session)) = (&self.monitor, unit.session()) {
            let current = monitor.status(session).await;
            let queueable = matches!(&current, Ok(s) if !s.is_terminal() && *s != Status::Running && *s != Status::InSpace);
            if queueable {
                if let Err(e) = monitor.init_space(session, self.config.lease, self.config.timeout).await {
                    warn!("Monitor refused to queue {}: {}", unit.name(), e);
                }
            }
        }

        unit.set_status(Status::InSpace);
        unit.control_mut().trace("deposited in workspace");
        space.deposit(unit.clone()).await?;
        if !unit.strategy().wait {
            info!("{} left in workspace", unit.name());
            return Ok(());
        }

        match space.take(unit.id(), self.config.space_wait).await? {
            Some(done) => {
                unit.reconcile(done)?;
                settle(unit);
                Ok(())
            }
            None => Err(DispatchError::NoResult(format!(
                "workspace within {:?}",
                self.config.space_wait
            ))),
        }
    }

    async fn run_job(self: &Arc<Self>, unit: &mut Exertion, txn: Option<TxnId>) -> Result<()> {
        self.begin(unit, JOBBER).await;
        let Exertion::Job(job) = unit else {
            return Ok(());
        };
        let graph = PipeGraph::new(job)?;

        match job.control.strategy.flow {
            Flow::Seq => self.run_seq(job, &graph, txn).await?,
            Flow::Par => self.run_par(job, &graph, txn).await?,
        }

        if job.control.has_fatal_fault() {
            job.control.status = job.control.failure_status();
        } else {
            let statuses: Vec<Status> = job.children.iter().map(Exertion::status).collect();
            job.control.status = aggregate(&statuses, false).unwrap_or(Status::Running);
        }
        Ok(())
    }

    async fn run_seq(self: &Arc<Self>, job: &mut Job, graph: &PipeGraph, txn: Option<TxnId>) -> Result<()> {
        for id in graph.resolve_order(Flow::Seq)?.into_iter().flatten() {
            let Some(index) = job.position(id) else {
                continue;
            };
            let child = job.children[index].clone();
            let done = Arc::clone(self).exert(child, txn).await;
            let status = done.status();
            job.children[index] = done;

            if status.is_failed() {
                return Err(DispatchError::ChildFailed(failure_message(&job.children[index])));
            }
            if status == Status::Done {
                let producer = job.children[index].clone();
                graph.propagate(&producer, &mut job.children)?;
            } else if graph.feeds(id) {
                // consumers only start after a DONE producer
                debug!("{} is {}, holding the rest of {}", job.children[index].name(), status, job.name);
                break;
            }
        }
        Ok(())
    }

    async fn run_par(self: &Arc<Self>, job: &mut Job, graph: &PipeGraph, txn: Option<TxnId>) -> Result<()> {
        if let Some(cycle) = graph.find_cycle() {
            let names: Vec<&str> = cycle
                .iter()
                .filter_map(|id| job.child(*id).map(Exertion::name))
                .collect();
            return Err(DispatchError::Propagation(format!("pipe cycle: {}", names.join(" -> "))));
        }

        let stages = graph.resolve_order(Flow::Par)?;
        let permits = self.config.concurrency_for(job.control.strategy.concurrency);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks: JoinSet<(usize, Exertion)> = JoinSet::new();
        let mut started: HashSet<ExertionId> = HashSet::new();
        let mut done: HashSet<ExertionId> = HashSet::new();
        let mut halted = false;
        debug!(
            "Running {} children of {} in {} stages with {} permits",
            job.children.len(),
            job.name,
            stages.len(),
            permits
        );

        loop {
            if !halted {
                for (index, child) in job.children.iter().enumerate() {
                    let id = child.id();
                    if started.contains(&id) || graph.check(id, &done) != Resolution::Ready {
                        continue;
                    }
                    started.insert(id);

                    let engine = Arc::clone(self);
                    let semaphore = Arc::clone(&semaphore);
                    let child = child.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        let snapshot = child.clone();
                        let finished = match AssertUnwindSafe(Arc::clone(&engine).exert(child, txn))
                            .catch_unwind()
                            .await
                        {
                            Ok(finished) => finished,
                            Err(_) => engine.abandon(snapshot).await,
                        };
                        (index, finished)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((index, finished)) => {
                    let status = finished.status();
                    job.children[index] = finished;
                    if status == Status::Done {
                        let producer = job.children[index].clone();
                        match graph.propagate(&producer, &mut job.children) {
                            Ok(_) => {
                                done.insert(producer.id());
                            }
                            Err(e) => {
                                warn!("Job {}: {}", job.name, e);
                                job.control.record(Fault::new(e.fault_kind(), job.name.clone(), e.to_string()));
                            }
                        }
                    } else if status.is_failed() {
                        let message = failure_message(&job.children[index]);
                        job.control.record(Fault::new(FaultKind::Executor, job.name.clone(), message));
                    }
                }
                Err(e) => {
                    warn!("Child task of {} did not complete: {}", job.name, e);
                    job.control.record(Fault::new(
                        FaultKind::Dispatch,
                        job.name.clone(),
                        format!("child task did not complete: {}", e),
                    ));
                    halted = true;
                }
            }
        }

        let blocked = job.children.len() - started.len();
        if blocked > 0 {
            debug!("{} children of {} never became ready", blocked, job.name);
        }
        Ok(())
    }

    async fn run_block(self: &Arc<Self>, unit: &mut Exertion, txn: Option<TxnId>) -> Result<()> {
        self.begin(unit, CONCATENATOR).await;
        let Exertion::Block(block) = unit else {
            return Ok(());
        };

        let mut scope = block.context.clone();
        let outcome = self.run_steps(block, &mut scope, txn).await;
        block.context = scope;
        let statuses = outcome?;

        block.control.status = if statuses.contains(&Status::Suspended) {
            Status::Suspended
        } else if statuses.iter().any(|s| !s.is_terminal()) {
            Status::Running
        } else {
            Status::Done
        };
        Ok(())
    }

    // Steps run in order; guards see the block scope as left by earlier steps.
    async fn run_steps(
        self: &Arc<Self>,
        block: &mut Block,
        scope: &mut DataContext,
        txn: Option<TxnId>,
    ) -> Result<Vec<Status>> {
        let mut statuses = Vec::new();
        for index in 0..block.steps.len() {
            let status = match &mut block.steps[index] {
                BlockStep::Unit(step) => Some(self.run_step(step, scope, txn).await?),
                BlockStep::Opt(opt) => {
                    if opt.condition.evaluate(scope) {
                        Some(self.run_step(&mut opt.exertion, scope, txn).await?)
                    } else {
                        debug!("Block {}: skipping {}", block.name, opt.exertion.name());
                        block.control.trace(format!("skipped {}", opt.exertion.name()));
                        None
                    }
                }
                BlockStep::Alt(alt) => self.run_alt(alt, scope, txn).await?,
            };
            statuses.extend(status);
        }
        Ok(statuses)
    }

    async fn run_step(
        self: &Arc<Self>,
        step: &mut Exertion,
        scope: &mut DataContext,
        txn: Option<TxnId>,
    ) -> Result<Status> {
        let missing: Vec<String> = step
            .context()
            .input_paths()
            .into_iter()
            .filter(|path| !step.context().contains(path))
            .map(str::to_string)
            .collect();
        for path in missing {
            if let Some(value) = scope.get(&path).cloned() {
                step.context_mut().put(path, value);
            }
        }

        let done = Arc::clone(self).exert(step.clone(), txn).await;
        *step = done;

        for path in step.context().output_paths() {
            if let Some(value) = step.context().get(path) {
                scope.put(path, value.clone());
            }
        }

        let status = step.status();
        if status.is_failed() {
            return Err(DispatchError::ChildFailed(failure_message(step)));
        }
        Ok(status)
    }

    async fn run_alt(
        self: &Arc<Self>,
        alt: &mut Alt,
        scope: &mut DataContext,
        txn: Option<TxnId>,
    ) -> Result<Option<Status>> {
        let Some(index) = alt.branches.iter().position(|b| b.condition.evaluate(scope)) else {
            debug!("No branch of alternative {} applies", alt.id);
            return Ok(None);
        };
        alt.taken = Some(index);
        alt.status = Status::Running;
        if let Some(session) = alt.session {
            self.begin_session(session, CONCATENATOR).await;
        }

        let outcome = self.run_step(&mut alt.branches[index].exertion, scope, txn).await;
        alt.status = alt.branches[index].exertion.status();
        if let Some(session) = alt.session {
            let mut control = ControlContext::default();
            control.status = alt.status;
            control.session = Some(session);
            self.sync(session, DataContext::new("alt"), control, alt.status).await;
        }
        outcome.map(Some)
    }

    // Mark a unit RUNNING and move its session out of INITIAL if it is there.
    async fn begin(&self, unit: &mut Exertion, executor: &str) {
        unit.set_status(Status::Running);
        unit.control_mut().clock.start();
        if let Some(session) = unit.session() {
            self.begin_session(session, executor).await;
        }
    }

    async fn begin_session(&self, session: SessionId, executor: &str) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        match monitor.status(session).await {
            Ok(Status::Initial | Status::Updated | Status::Provision) => {
                if let Err(e) = monitor
                    .init(session, executor, self.config.lease, self.config.timeout)
                    .await
                {
                    warn!("Monitor refused to start session {}: {}", session, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Session {} unavailable: {}", session, e),
        }
    }

    // A child whose task panicked ends in ERROR, and so does its session.
    async fn abandon(&self, mut unit: Exertion) -> Exertion {
        let reason = format!("{} panicked", unit.name());
        fault(&mut unit, DispatchError::Executor(ExecutorError::Runtime(reason)));
        self.report(&unit).await;
        unit
    }

    async fn report(&self, unit: &Exertion) {
        if let Some(session) = unit.session() {
            self.sync(session, unit.context().clone(), unit.control().clone(), unit.status())
                .await;
        }
    }

    // Bring a session in line with the engine's view of its unit. Sessions
    // already terminal (through aggregation or a worker) keep their status.
    async fn sync(&self, session: SessionId, context: DataContext, control: ControlContext, status: Status) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        let current = match monitor.status(session).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Session {} unavailable: {}", session, e);
                return;
            }
        };

        let result = if current.is_terminal() {
            monitor.update(session, context, control, current).await
        } else if status == Status::Done && matches!(current, Status::Running | Status::Updated) {
            monitor.done(session, context, control).await
        } else if status.is_failed()
            && matches!(current, Status::Running | Status::InSpace | Status::Provision)
        {
            monitor.failed(session, context, control).await
        } else {
            monitor.update(session, context, control, status).await
        };
        if let Err(e) = result {
            warn!("Failed to report session {}: {}", session, e);
        }
    }

    async fn write_back(&self, unit: &Exertion) {
        if self.persisters.is_empty() {
            return;
        }
        let mut watched = Vec::new();
        unit.visit(&mut |u| {
            for (path, persister) in self.persisters.get(&u.id()).into_iter().flatten() {
                if let Some(value) = u.context().get(path) {
                    watched.push((u.id(), path.clone(), value.clone(), Arc::clone(persister)));
                }
            }
        });
        for (id, path, value, persister) in watched {
            if let Err(e) = persister.write(id, &path, &value).await {
                warn!("Failed to write back {} of {}: {}", path, id, e);
            }
        }
    }
}

fn fault(unit: &mut Exertion, error: DispatchError) {
    let origin = unit.name().to_string();
    warn!("{} faulted: {}", origin, error);
    unit.control_mut().fail(Fault::new(error.fault_kind(), origin, error.to_string()));
}

// Status after an executor or worker handed a unit back.
fn settle(unit: &mut Exertion) {
    let control = unit.control();
    let status = if control.has_fatal_fault() {
        control.failure_status()
    } else {
        match control.status {
            Status::Initial | Status::InSpace | Status::Provision | Status::Running | Status::Updated => {
                Status::Done
            }
            other => other,
        }
    };
    unit.set_status(status);
}

fn failure_message(child: &Exertion) -> String {
    let cause = child
        .control()
        .first_fatal()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "no fault recorded".to_string());
    format!("{} {}: {}", child.name(), child.status(), cause)
}
