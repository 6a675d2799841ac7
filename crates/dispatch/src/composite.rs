//! Executor serving remote composite signatures with a local engine.

use std::sync::Arc;
use async_trait::async_trait;
use exertion_core::{Exertion, Signature, TxnId, UnitKind};
use tracing::debug;

use crate::engine::DispatchEngine;
use crate::error::ExecutorError;
use crate::traits::Executor;

/// Runs jobs and blocks handed over by another engine.
///
/// Register it in a directory under the `Jobber` or `Concatenator`
/// capability.
pub struct CompositeExecutor {
    name: String,
    engine: Arc<DispatchEngine>,
}

impl CompositeExecutor {
    /// Create an executor named `name` running composites on `engine`.
    pub fn new(name: impl Into<String>, engine: Arc<DispatchEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }
}

#[async_trait]
impl Executor for CompositeExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, mut unit: Exertion, txn: Option<TxnId>) -> Result<Option<Exertion>, ExecutorError> {
        let local = match unit.kind() {
            UnitKind::Job => Signature::jobber(),
            UnitKind::Block => Signature::concatenator(),
            kind => return Err(ExecutorError::Failed(format!("{} cannot run a {:?}", self.name, kind))),
        };
        let kind = unit.signature().map(|s| s.kind).unwrap_or_default();
        unit.set_signature(local.with_kind(kind));

        debug!("{} running {} locally", self.name, unit.name());
        let done = self
            .engine
            .dispatch(unit, txn)
            .await
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        Ok(Some(done))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::directory::StaticDirectory;
    use exertion_core::{Job, Status, Task, JOBBER, SERVICE_OP};

    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, mut unit: Exertion, _txn: Option<TxnId>) -> Result<Option<Exertion>, ExecutorError> {
            unit.context_mut().put("out", "echoed");
            Ok(Some(unit))
        }
    }

    #[tokio::test]
    async fn test_remote_job_runs_on_other_engine() {
        let worker = Arc::new(
            DispatchEngine::new(DispatchConfig::default(), Arc::new(StaticDirectory::new()))
                .with_local("Echo", Arc::new(Echo)),
        );
        let directory = StaticDirectory::new().with(JOBBER, Arc::new(CompositeExecutor::new("jobber-1", worker)));
        let engine = Arc::new(DispatchEngine::new(DispatchConfig::default(), Arc::new(directory)));

        let first = Task::new("first", Signature::local("echo", "Echo"));
        let second = Task::new("second", Signature::local("echo", "Echo"));
        let job = Job::new("remote")
            .with_signature(Signature::new(SERVICE_OP, JOBBER))
            .with_child(first)
            .with_child(second);

        let done = engine.dispatch(job.into(), None).await.unwrap();
        assert_eq!(done.status(), Status::Done);
        assert_eq!(done.children().len(), 2);
        for child in done.children() {
            assert_eq!(child.status(), Status::Done);
            assert_eq!(child.context().get("out").and_then(|v| v.as_str()), Some("echoed"));
        }
        // the caller keeps its own signature
        assert!(!done.signature().unwrap().is_local());
    }

    #[tokio::test]
    async fn test_rejects_tasks() {
        let worker = Arc::new(DispatchEngine::new(DispatchConfig::default(), Arc::new(StaticDirectory::new())));
        let executor = CompositeExecutor::new("jobber-1", worker);
        let task: Exertion = Task::new("t", Signature::new("x", "X")).into();
        assert!(matches!(executor.invoke(task, None).await, Err(ExecutorError::Failed(_))));
    }
}
