//! Arithmetic executors used by the demos.

use std::sync::Arc;
use async_trait::async_trait;
use exertion_core::{Exertion, TxnId};
use exertion_dispatch::{Executor, ExecutorError, StaticDirectory};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum Op {
    Multiply,
    Add,
    Subtract,
    Average,
}

/// Reads `arg/x1` and `arg/x2` and writes `result/y`.
struct Arithmetic {
    name: &'static str,
    op: Op,
}

#[async_trait]
impl Executor for Arithmetic {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, mut unit: Exertion, _txn: Option<TxnId>) -> Result<Option<Exertion>, ExecutorError> {
        let context = unit.context();
        let (Some(x1), Some(x2)) = (context.get_f64("arg/x1"), context.get_f64("arg/x2")) else {
            return Err(ExecutorError::Failed(format!("{} needs arg/x1 and arg/x2", unit.name())));
        };
        let y = match self.op {
            Op::Multiply => x1 * x2,
            Op::Add => x1 + x2,
            Op::Subtract => x1 - x2,
            Op::Average => (x1 + x2) / 2.0,
        };
        if !y.is_finite() {
            return Err(ExecutorError::Runtime(format!("{:?} overflowed", self.op)));
        }
        debug!("{} {:?}({}, {}) = {}", self.name, self.op, x1, x2, y);
        unit.context_mut().put("result/y", y);
        Ok(Some(unit))
    }
}

/// Directory serving the four arithmetic capabilities.
pub fn arithmetic() -> StaticDirectory {
    StaticDirectory::new()
        .with("Multiplier", Arc::new(Arithmetic { name: "multiplier", op: Op::Multiply }))
        .with("Adder", Arc::new(Arithmetic { name: "adder", op: Op::Add }))
        .with("Subtractor", Arc::new(Arithmetic { name: "subtractor", op: Op::Subtract }))
        .with("Averager", Arc::new(Arithmetic { name: "averager", op: Op::Average }))
}
