//! Exertion model - tasks, jobs and blocks.

use crate::condition::Condition;
use crate::context::DataContext;
use crate::control::{ControlContext, Strategy};
use crate::id::{ExertionId, SessionId};
use crate::pipe::Pipe;
use crate::signature::{Fidelity, Signature};
use crate::status::Status;
use serde::{Deserialize, Serialize};

/// Errors raised while building or editing exertions.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// No fidelity with this name
    #[error("Fidelity not found: {0}")]
    FidelityNotFound(String),

    /// A pipe names a unit that is not a child of the job
    #[error("Pipe endpoint {0} is not a child of job {1}")]
    UnknownPipeEndpoint(ExertionId, String),

    /// A reconciled unit does not match the original
    #[error("Cannot reconcile {expected} with {actual}")]
    IdentityMismatch {
        /// Submitted unit
        expected: ExertionId,
        /// Returned unit
        actual: ExertionId,
    },
}

/// Kind of a unit, also used to tag monitor sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Leaf
    Task,
    /// Ordered or parallel composite
    Job,
    /// Composite with conditional steps
    Block,
    /// Alternative inside a block
    Alternative,
}

/// A leaf unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: ExertionId,

    /// Task name
    pub name: String,

    /// Named alternative signature sets
    pub fidelities: Vec<Fidelity>,

    /// Index of the selected fidelity
    pub selected: usize,

    /// Input and output data
    pub context: DataContext,

    /// Strategy and status
    pub control: ControlContext,
}

impl Task {
    /// Create a task with a single default fidelity.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let name = name.into();
        Self {
            id: ExertionId::new(),
            context: DataContext::new(name.clone()),
            name,
            fidelities: vec![Fidelity::new("default", signature)],
            selected: 0,
            control: ControlContext::default(),
        }
    }

    /// Set the data context.
    pub fn with_context(mut self, context: DataContext) -> Self {
        self.context = context;
        self
    }

    /// Set the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.control.strategy = strategy;
        self
    }

    /// Add an alternative fidelity.
    pub fn with_fidelity(mut self, fidelity: Fidelity) -> Self {
        self.fidelities.push(fidelity);
        self
    }

    /// Add a batch step to the selected fidelity.
    pub fn with_batch_step(mut self, signature: Signature) -> Self {
        if let Some(fidelity) = self.fidelities.get_mut(self.selected) {
            fidelity.signatures.push(signature);
        }
        self
    }

    /// Select a fidelity by name.
    pub fn select_fidelity(&mut self, name: &str) -> Result<(), ModelError> {
        let index = self
            .fidelities
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| ModelError::FidelityNotFound(name.to_string()))?;
        self.selected = index;
        Ok(())
    }

    /// The selected fidelity.
    pub fn fidelity(&self) -> Option<&Fidelity> {
        self.fidelities.get(self.selected)
    }

    /// Process signature of the selected fidelity.
    pub fn signature(&self) -> Option<&Signature> {
        self.fidelity().and_then(Fidelity::process)
    }
}

/// A composite of ordered (or parallel) children connected by pipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: ExertionId,

    /// Job name
    pub name: String,

    /// Composite dispatcher signature
    pub signature: Signature,

    /// Children in declaration order
    pub children: Vec<Exertion>,

    /// Data edges between children
    pub pipes: Vec<Pipe>,

    /// Job-level data
    pub context: DataContext,

    /// Strategy and status
    pub control: ControlContext,
}

impl Job {
    /// Create an empty job dispatched in-process.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ExertionId::new(),
            context: DataContext::new(name.clone()),
            name,
            signature: Signature::jobber(),
            children: Vec::new(),
            pipes: Vec::new(),
            control: ControlContext::default(),
        }
    }

    /// Append a child.
    pub fn with_child(mut self, child: impl Into<Exertion>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Add a pipe between two children.
    pub fn with_pipe(mut self, pipe: Pipe) -> Self {
        self.pipes.push(pipe);
        self
    }

    /// Set the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.control.strategy = strategy;
        self
    }

    /// Set the composite signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Index of a direct child.
    pub fn position(&self, id: ExertionId) -> Option<usize> {
        self.children.iter().position(|c| c.id() == id)
    }

    /// A direct child by id.
    pub fn child(&self, id: ExertionId) -> Option<&Exertion> {
        self.children.iter().find(|c| c.id() == id)
    }

    /// Check that every pipe connects two children of this job.
    pub fn validate_pipes(&self) -> Result<(), ModelError> {
        for pipe in &self.pipes {
            for end in [pipe.from, pipe.to] {
                if self.position(end).is_none() {
                    return Err(ModelError::UnknownPipeEndpoint(end, self.name.clone()));
                }
            }
        }
        Ok(())
    }
}

/// An exertion executed only when its guard holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opt {
    /// Guard
    pub condition: Condition,
    /// Guarded unit
    pub exertion: Exertion,
}

impl Opt {
    /// Create a guarded unit.
    pub fn new(condition: Condition, exertion: impl Into<Exertion>) -> Self {
        Self {
            condition,
            exertion: exertion.into(),
        }
    }
}

/// A set of guarded branches; the first branch whose guard holds runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alt {
    /// Identifier of the alternative itself
    pub id: ExertionId,

    /// Branches in evaluation order
    pub branches: Vec<Opt>,

    /// Index of the branch taken
    pub taken: Option<usize>,

    /// Status of the alternative
    pub status: Status,

    /// Monitor session cookie
    pub session: Option<SessionId>,
}

impl Alt {
    /// Create an alternative.
    pub fn new(branches: Vec<Opt>) -> Self {
        Self {
            id: ExertionId::new(),
            branches,
            taken: None,
            status: Status::Initial,
            session: None,
        }
    }
}

/// A block step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BlockStep {
    /// Always executed
    Unit(Exertion),
    /// Executed when the guard holds
    Opt(Opt),
    /// Exactly one branch executed
    Alt(Alt),
}

impl BlockStep {
    /// Units reachable from this step, every branch included.
    pub fn exertions(&self) -> Vec<&Exertion> {
        match self {
            BlockStep::Unit(e) => vec![e],
            BlockStep::Opt(opt) => vec![&opt.exertion],
            BlockStep::Alt(alt) => alt.branches.iter().map(|b| &b.exertion).collect(),
        }
    }

    /// Mutable units reachable from this step.
    pub fn exertions_mut(&mut self) -> Vec<&mut Exertion> {
        match self {
            BlockStep::Unit(e) => vec![e],
            BlockStep::Opt(opt) => vec![&mut opt.exertion],
            BlockStep::Alt(alt) => alt.branches.iter_mut().map(|b| &mut b.exertion).collect(),
        }
    }
}

/// A composite whose steps may be conditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Unique identifier
    pub id: ExertionId,

    /// Block name
    pub name: String,

    /// Composite dispatcher signature
    pub signature: Signature,

    /// Steps in order
    pub steps: Vec<BlockStep>,

    /// Block scope shared with the steps
    pub context: DataContext,

    /// Strategy and status
    pub control: ControlContext,
}

impl Block {
    /// Create an empty block dispatched in-process.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ExertionId::new(),
            context: DataContext::new(name.clone()),
            name,
            signature: Signature::concatenator(),
            steps: Vec::new(),
            control: ControlContext::default(),
        }
    }

    /// Append an unconditional step.
    pub fn with_step(mut self, exertion: impl Into<Exertion>) -> Self {
        self.steps.push(BlockStep::Unit(exertion.into()));
        self
    }

    /// Append a guarded step.
    pub fn with_opt(mut self, opt: Opt) -> Self {
        self.steps.push(BlockStep::Opt(opt));
        self
    }

    /// Append an alternative.
    pub fn with_alt(mut self, branches: Vec<Opt>) -> Self {
        self.steps.push(BlockStep::Alt(Alt::new(branches)));
        self
    }

    /// Set the block scope.
    pub fn with_context(mut self, context: DataContext) -> Self {
        self.context = context;
        self
    }

    /// Set the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.control.strategy = strategy;
        self
    }

    /// Set the composite signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }
}

/// A unit of work: task, job or block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Exertion {
    /// Leaf
    Task(Task),
    /// Ordered or parallel composite
    Job(Job),
    /// Conditional composite
    Block(Block),
}

impl From<Task> for Exertion {
    fn from(task: Task) -> Self {
        Exertion::Task(task)
    }
}

impl From<Job> for Exertion {
    fn from(job: Job) -> Self {
        Exertion::Job(job)
    }
}

impl From<Block> for Exertion {
    fn from(block: Block) -> Self {
        Exertion::Block(block)
    }
}

impl Exertion {
    /// Identifier.
    pub fn id(&self) -> ExertionId {
        match self {
            Exertion::Task(t) => t.id,
            Exertion::Job(j) => j.id,
            Exertion::Block(b) => b.id,
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        match self {
            Exertion::Task(t) => &t.name,
            Exertion::Job(j) => &j.name,
            Exertion::Block(b) => &b.name,
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> UnitKind {
        match self {
            Exertion::Task(_) => UnitKind::Task,
            Exertion::Job(_) => UnitKind::Job,
            Exertion::Block(_) => UnitKind::Block,
        }
    }

    /// Whether this is a job or a block.
    pub fn is_composite(&self) -> bool {
        !matches!(self, Exertion::Task(_))
    }

    /// Selected signature (process signature for tasks).
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Exertion::Task(t) => t.signature(),
            Exertion::Job(j) => Some(&j.signature),
            Exertion::Block(b) => Some(&b.signature),
        }
    }

    /// Replace the composite signature; tasks are left untouched.
    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Exertion::Task(_) => {}
            Exertion::Job(j) => j.signature = signature,
            Exertion::Block(b) => b.signature = signature,
        }
    }

    /// Data context.
    pub fn context(&self) -> &DataContext {
        match self {
            Exertion::Task(t) => &t.context,
            Exertion::Job(j) => &j.context,
            Exertion::Block(b) => &b.context,
        }
    }

    /// Mutable data context.
    pub fn context_mut(&mut self) -> &mut DataContext {
        match self {
            Exertion::Task(t) => &mut t.context,
            Exertion::Job(j) => &mut j.context,
            Exertion::Block(b) => &mut b.context,
        }
    }

    /// Control context.
    pub fn control(&self) -> &ControlContext {
        match self {
            Exertion::Task(t) => &t.control,
            Exertion::Job(j) => &j.control,
            Exertion::Block(b) => &b.control,
        }
    }

    /// Mutable control context.
    pub fn control_mut(&mut self) -> &mut ControlContext {
        match self {
            Exertion::Task(t) => &mut t.control,
            Exertion::Job(j) => &mut j.control,
            Exertion::Block(b) => &mut b.control,
        }
    }

    /// Execution strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.control().strategy
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.control().status
    }

    /// Set the status.
    pub fn set_status(&mut self, status: Status) {
        self.control_mut().status = status;
    }

    /// Monitor session cookie.
    pub fn session(&self) -> Option<SessionId> {
        self.control().session
    }

    /// Direct children; blocks yield every step unit including all branches.
    pub fn children(&self) -> Vec<&Exertion> {
        match self {
            Exertion::Task(_) => Vec::new(),
            Exertion::Job(j) => j.children.iter().collect(),
            Exertion::Block(b) => b.steps.iter().flat_map(BlockStep::exertions).collect(),
        }
    }

    /// Mutable direct children.
    pub fn children_mut(&mut self) -> Vec<&mut Exertion> {
        match self {
            Exertion::Task(_) => Vec::new(),
            Exertion::Job(j) => j.children.iter_mut().collect(),
            Exertion::Block(b) => b.steps.iter_mut().flat_map(BlockStep::exertions_mut).collect(),
        }
    }

    /// Visit this unit and every descendant, depth first.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Exertion)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Visit this unit and every descendant mutably, depth first.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Exertion)) {
        f(self);
        for child in self.children_mut() {
            child.visit_mut(f);
        }
    }

    /// Find a unit in this tree.
    pub fn find(&self, id: ExertionId) -> Option<&Exertion> {
        if self.id() == id {
            return Some(self);
        }
        self.children().into_iter().find_map(|c| c.find(id))
    }

    /// Find a unit in this tree by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Exertion> {
        if self.name() == name {
            return Some(self);
        }
        self.children().into_iter().find_map(|c| c.find_by_name(name))
    }

    /// Copy the results of an executed copy of this unit back onto it.
    ///
    /// Context, control context and children are taken from `executed`;
    /// identity, name and signatures stay as submitted.
    pub fn reconcile(&mut self, executed: Exertion) -> Result<(), ModelError> {
        if executed.id() != self.id() {
            return Err(ModelError::IdentityMismatch {
                expected: self.id(),
                actual: executed.id(),
            });
        }
        match (self, executed) {
            (Exertion::Task(mine), Exertion::Task(theirs)) => {
                mine.context = theirs.context;
                mine.control = theirs.control;
            }
            (Exertion::Job(mine), Exertion::Job(theirs)) => {
                mine.context = theirs.context;
                mine.control = theirs.control;
                mine.children = theirs.children;
            }
            (Exertion::Block(mine), Exertion::Block(theirs)) => {
                mine.context = theirs.context;
                mine.control = theirs.control;
                mine.steps = theirs.steps;
            }
            (mine, theirs) => {
                *mine.context_mut() = theirs.context().clone();
                *mine.control_mut() = theirs.control().clone();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureType;

    fn task(name: &str) -> Task {
        Task::new(name, Signature::local(name, "Arithmetic"))
    }

    #[test]
    fn test_select_fidelity() {
        let mut t = task("add").with_fidelity(Fidelity::new("remote", Signature::new("add", "Adder")));
        assert!(t.signature().unwrap().is_local());

        t.select_fidelity("remote").unwrap();
        assert!(!t.signature().unwrap().is_local());
        assert!(matches!(t.select_fidelity("nope"), Err(ModelError::FidelityNotFound(_))));
    }

    #[test]
    fn test_batch_step_keeps_process_signature() {
        let t = task("add").with_batch_step(Signature::local("log", "Audit").with_kind(SignatureType::Pre));
        assert_eq!(t.signature().unwrap().operation, "add");
        assert_eq!(t.fidelity().unwrap().in_batch_order().len(), 2);
    }

    #[test]
    fn test_validate_pipes() {
        let t1 = task("t1");
        let t2 = task("t2");
        let stranger = task("x");
        let job = Job::new("j")
            .with_pipe(Pipe::new(t1.id, "result/y", t2.id, "arg/x1"))
            .with_child(t1.clone())
            .with_child(t2.clone());
        assert!(job.validate_pipes().is_ok());

        let bad = job.with_pipe(Pipe::new(stranger.id, "result/y", t2.id, "arg/x2"));
        assert!(matches!(bad.validate_pipes(), Err(ModelError::UnknownPipeEndpoint(..))));
    }

    #[test]
    fn test_block_children_include_branches() {
        let block: Exertion = Block::new("b")
            .with_step(task("a"))
            .with_alt(vec![
                Opt::new(Condition::False, task("b1")),
                Opt::new(Condition::True, task("b2")),
            ])
            .into();

        let names: Vec<_> = block.children().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b1", "b2"]);
        assert!(block.find_by_name("b2").is_some());
    }

    #[test]
    fn test_reconcile() {
        let mut original: Exertion = task("t1").into();
        let mut executed = original.clone();
        executed.context_mut().put("result/y", 42);
        executed.set_status(Status::Done);

        original.reconcile(executed).unwrap();
        assert_eq!(original.status(), Status::Done);
        assert_eq!(original.context().get_f64("result/y"), Some(42.0));

        let other: Exertion = task("t2").into();
        assert!(original.reconcile(other).is_err());
    }

    #[test]
    fn test_serde_roundtrip_tagged() {
        let job: Exertion = Job::new("j").with_child(task("t1")).into();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "job");
        let back: Exertion = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
