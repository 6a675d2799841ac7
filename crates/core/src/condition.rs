//! Guards for optional and alternative block steps.

use crate::context::DataContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A guard evaluated against a block's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Always holds
    True,
    /// Never holds
    False,
    /// A value is present at the path
    Exists { path: String },
    /// The value at the path equals the given one
    Equals { path: String, value: Value },
    /// The numeric value at the path is greater than the bound
    GreaterThan { path: String, bound: f64 },
    /// The numeric value at the path is less than the bound
    LessThan { path: String, bound: f64 },
}

impl Condition {
    /// Guard on path presence.
    pub fn exists(path: impl Into<String>) -> Self {
        Condition::Exists { path: path.into() }
    }

    /// Guard on value equality.
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Guard `value > bound`.
    pub fn greater_than(path: impl Into<String>, bound: f64) -> Self {
        Condition::GreaterThan {
            path: path.into(),
            bound,
        }
    }

    /// Guard `value < bound`.
    pub fn less_than(path: impl Into<String>, bound: f64) -> Self {
        Condition::LessThan {
            path: path.into(),
            bound,
        }
    }

    /// Evaluate against a context. Missing or non-numeric values make
    /// comparisons false.
    pub fn evaluate(&self, context: &DataContext) -> bool {
        match self {
            Condition::True => true,
            Condition::False => false,
            Condition::Exists { path } => context.contains(path),
            Condition::Equals { path, value } => context.get(path) == Some(value),
            Condition::GreaterThan { path, bound } => {
                context.get_f64(path).map(|v| v > *bound).unwrap_or(false)
            }
            Condition::LessThan { path, bound } => {
                context.get_f64(path).map(|v| v < *bound).unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate() {
        let ctx = DataContext::new("block").with_value("result/y", 400.0);

        assert!(Condition::True.evaluate(&ctx));
        assert!(!Condition::False.evaluate(&ctx));
        assert!(Condition::exists("result/y").evaluate(&ctx));
        assert!(!Condition::exists("result/z").evaluate(&ctx));
        assert!(Condition::greater_than("result/y", 100.0).evaluate(&ctx));
        assert!(!Condition::less_than("result/y", 100.0).evaluate(&ctx));
        assert!(Condition::equals("result/y", 400.0).evaluate(&ctx));
        assert!(!Condition::greater_than("missing", 0.0).evaluate(&ctx));
    }
}
