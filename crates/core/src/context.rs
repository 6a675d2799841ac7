//! Data contexts - named input/output values of a unit of work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Direction marker of a context path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Input consumed by the operation
    In,
    /// Output produced by the operation
    Out,
    /// Both
    InOut,
}

impl Direction {
    /// Whether the path is read by the operation.
    pub fn is_input(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// Whether the path is written by the operation.
    pub fn is_output(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// A single context slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Current value (`null` until produced)
    pub value: Value,

    /// Direction marker, if declared
    pub direction: Option<Direction>,
}

/// Ordered mapping from slash-delimited paths to values.
///
/// A context belongs to exactly one unit; pipes copy values between
/// contexts and never share them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataContext {
    /// Context name
    pub name: String,

    entries: BTreeMap<String, Entry>,
}

impl DataContext {
    /// Create an empty context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Declare an input path with its value.
    pub fn with_in(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put_in(path, value);
        self
    }

    /// Declare an output path with no value yet.
    pub fn with_out(mut self, path: impl Into<String>) -> Self {
        self.put_out(path);
        self
    }

    /// Put a value without a direction marker.
    pub fn with_value(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(path, value);
        self
    }

    /// Declare an input path.
    pub fn put_in(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        self.insert(path.into(), value.into(), Some(Direction::In));
    }

    /// Declare an output path.
    pub fn put_out(&mut self, path: impl Into<String>) {
        self.insert(path.into(), Value::Null, Some(Direction::Out));
    }

    /// Declare an in/out path.
    pub fn put_in_out(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        self.insert(path.into(), value.into(), Some(Direction::InOut));
    }

    /// Set a value, keeping the existing direction marker.
    pub fn put(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        let path = path.into();
        let value = value.into();
        match self.entries.get_mut(&path) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(path, Entry { value, direction: None });
            }
        }
    }

    fn insert(&mut self, path: String, value: Value, direction: Option<Direction>) {
        self.entries.insert(path, Entry { value, direction });
    }

    /// Get a value. Paths holding `null` count as absent.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path).map(|e| &e.value).filter(|v| !v.is_null())
    }

    /// Get a numeric value.
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Whether a non-null value is present at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Whether `path` is declared at all, even without a value.
    pub fn is_declared(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Direction marker of a path.
    pub fn direction(&self, path: &str) -> Option<Direction> {
        self.entries.get(path).and_then(|e| e.direction)
    }

    /// Remove a path.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.entries.remove(path).map(|e| e.value)
    }

    /// All paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Paths marked IN or INOUT.
    pub fn input_paths(&self) -> Vec<&str> {
        self.paths_where(Direction::is_input)
    }

    /// Paths marked OUT or INOUT.
    pub fn output_paths(&self) -> Vec<&str> {
        self.paths_where(Direction::is_output)
    }

    fn paths_where(&self, pred: fn(Direction) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.direction.map(pred).unwrap_or(false))
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Values found under `prefix` (path equal to it or below it).
    pub fn subtree(&self, prefix: &str) -> Vec<(&str, &Value)> {
        let nested = format!("{}/", prefix.trim_end_matches('/'));
        self.entries
            .iter()
            .filter(|(p, _)| p.as_str() == prefix || p.starts_with(&nested))
            .map(|(p, e)| (p.as_str(), &e.value))
            .collect()
    }

    /// Number of declared paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no path is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directions() {
        let ctx = DataContext::new("multiply")
            .with_in("arg/x1", 10.0)
            .with_in("arg/x2", 50.0)
            .with_out("result/y");

        assert_eq!(ctx.input_paths(), vec!["arg/x1", "arg/x2"]);
        assert_eq!(ctx.output_paths(), vec!["result/y"]);
        assert!(ctx.is_declared("result/y"));
        assert!(!ctx.contains("result/y"));
    }

    #[test]
    fn test_put_keeps_direction() {
        let mut ctx = DataContext::new("t").with_out("result/y");
        ctx.put("result/y", 400.0);

        assert_eq!(ctx.get_f64("result/y"), Some(400.0));
        assert_eq!(ctx.direction("result/y"), Some(Direction::Out));
    }

    #[test]
    fn test_subtree() {
        let ctx = DataContext::new("t")
            .with_value("arg/x1", 1)
            .with_value("arg/x2", 2)
            .with_value("argument", 3);

        let sub = ctx.subtree("arg");
        assert_eq!(sub.len(), 2);
        assert_eq!(sub[0], ("arg/x1", &json!(1)));
    }

    #[test]
    fn test_clone_is_a_copy() {
        let original = DataContext::new("t").with_in("arg/x1", 1);
        let mut copy = original.clone();
        copy.put("arg/x1", 2);
        assert_eq!(original.get("arg/x1"), Some(&json!(1)));
    }
}
