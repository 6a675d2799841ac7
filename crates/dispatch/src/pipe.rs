//! Pipe resolution for job children.

use std::collections::{HashMap, HashSet};
use exertion_core::{Exertion, ExertionId, Flow, Job, Pipe};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Whether a child may start.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Every producer feeding it is DONE
    Ready,
    /// Waiting on these producers
    Blocked(Vec<ExertionId>),
}

/// Pipe graph of one job.
#[derive(Debug, Clone)]
pub struct PipeGraph {
    /// Children in declaration order
    order: Vec<ExertionId>,
    /// consumer -> incoming pipes
    incoming: HashMap<ExertionId, Vec<Pipe>>,
    /// producer -> outgoing pipes
    outgoing: HashMap<ExertionId, Vec<Pipe>>,
}

impl PipeGraph {
    /// Build the graph, rejecting pipes whose endpoints are not children.
    pub fn new(job: &Job) -> Result<Self> {
        job.validate_pipes()
            .map_err(|e| DispatchError::Propagation(e.to_string()))?;

        let mut incoming: HashMap<ExertionId, Vec<Pipe>> = HashMap::new();
        let mut outgoing: HashMap<ExertionId, Vec<Pipe>> = HashMap::new();
        for pipe in &job.pipes {
            incoming.entry(pipe.to).or_default().push(pipe.clone());
            outgoing.entry(pipe.from).or_default().push(pipe.clone());
        }

        Ok(Self {
            order: job.children.iter().map(Exertion::id).collect(),
            incoming,
            outgoing,
        })
    }

    /// Producers feeding `id`, without duplicates.
    pub fn producers(&self, id: ExertionId) -> Vec<ExertionId> {
        let mut seen = HashSet::new();
        self.incoming
            .get(&id)
            .map(|pipes| pipes.iter().map(|p| p.from).filter(|p| seen.insert(*p)).collect())
            .unwrap_or_default()
    }

    /// Whether `id` produces values for another child.
    pub fn feeds(&self, id: ExertionId) -> bool {
        self.outgoing.get(&id).is_some_and(|pipes| !pipes.is_empty())
    }

    /// Check `id` against the set of DONE children.
    pub fn check(&self, id: ExertionId, done: &HashSet<ExertionId>) -> Resolution {
        let blocked: Vec<_> = self
            .producers(id)
            .into_iter()
            .filter(|p| !done.contains(p))
            .collect();
        if blocked.is_empty() {
            Resolution::Ready
        } else {
            Resolution::Blocked(blocked)
        }
    }

    /// A dependency cycle among the children, if any.
    pub fn find_cycle(&self) -> Option<Vec<ExertionId>> {
        // 0 = unvisited, 1 = on stack, 2 = finished
        let mut state: HashMap<ExertionId, u8> = HashMap::new();
        let mut path = Vec::new();
        for id in &self.order {
            if let Some(cycle) = self.visit(*id, &mut state, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        id: ExertionId,
        state: &mut HashMap<ExertionId, u8>,
        path: &mut Vec<ExertionId>,
    ) -> Option<Vec<ExertionId>> {
        match state.get(&id).copied().unwrap_or(0) {
            2 => return None,
            1 => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                return Some(path[start..].to_vec());
            }
            _ => {}
        }
        state.insert(id, 1);
        path.push(id);
        for producer in self.producers(id) {
            if let Some(cycle) = self.visit(producer, state, path) {
                return Some(cycle);
            }
        }
        path.pop();
        state.insert(id, 2);
        None
    }

    /// Execution order of the children.
    ///
    /// SEQ yields one child per group in declaration order. PAR groups
    /// children into waves: every child in a wave only depends on children
    /// of earlier waves.
    pub fn resolve_order(&self, flow: Flow) -> Result<Vec<Vec<ExertionId>>> {
        if flow == Flow::Seq {
            return Ok(self.order.iter().map(|id| vec![*id]).collect());
        }
        if let Some(cycle) = self.find_cycle() {
            return Err(DispatchError::Propagation(format!("pipe cycle through {} units", cycle.len())));
        }

        let mut done = HashSet::new();
        let mut waves = Vec::new();
        while done.len() < self.order.len() {
            let wave: Vec<ExertionId> = self
                .order
                .iter()
                .filter(|id| !done.contains(*id))
                .filter(|id| self.check(**id, &done) == Resolution::Ready)
                .copied()
                .collect();
            if wave.is_empty() {
                break;
            }
            done.extend(wave.iter().copied());
            waves.push(wave);
        }
        Ok(waves)
    }

    /// Copy the outputs of a DONE producer into its consumers.
    ///
    /// A pipe naming a path absent from the producer's context fails the
    /// whole propagation and leaves the consumers untouched.
    pub fn propagate(&self, producer: &Exertion, children: &mut [Exertion]) -> Result<usize> {
        let Some(pipes) = self.outgoing.get(&producer.id()) else {
            return Ok(0);
        };

        let mut values = Vec::with_capacity(pipes.len());
        for pipe in pipes {
            let value = producer.context().get(&pipe.out_path).cloned().ok_or_else(|| {
                DispatchError::Propagation(format!(
                    "missing path {} in {} for pipe into {}",
                    pipe.out_path,
                    producer.name(),
                    pipe.in_path
                ))
            })?;
            values.push((pipe, value));
        }

        for (pipe, value) in values {
            if let Some(consumer) = children.iter_mut().find(|c| c.id() == pipe.to) {
                debug!("Pipe {}:{} -> {}:{}", producer.name(), pipe.out_path, consumer.name(), pipe.in_path);
                let context = consumer.context_mut();
                if context.is_declared(&pipe.in_path) {
                    context.put(pipe.in_path.clone(), value);
                } else {
                    context.put_in(pipe.in_path.clone(), value);
                }
            }
        }
        Ok(pipes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exertion_core::{DataContext, Direction, Signature, Task};

    fn task(name: &str) -> Task {
        Task::new(name, Signature::local(name, "Arithmetic"))
    }

    fn diamond() -> (Job, [ExertionId; 4]) {
        let (a, b, c, d) = (task("a"), task("b"), task("c"), task("d"));
        let ids = [a.id, b.id, c.id, d.id];
        let job = Job::new("diamond")
            .with_child(a)
            .with_child(b)
            .with_child(c)
            .with_child(d)
            .with_pipe(Pipe::new(ids[0], "out", ids[1], "in"))
            .with_pipe(Pipe::new(ids[0], "out", ids[2], "in"))
            .with_pipe(Pipe::new(ids[1], "out", ids[3], "x1"))
            .with_pipe(Pipe::new(ids[2], "out", ids[3], "x2"));
        (job, ids)
    }

    #[test]
    fn test_seq_order_ignores_pipes() {
        let (job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        let order = graph.resolve_order(Flow::Seq).unwrap();
        assert_eq!(order, ids.iter().map(|id| vec![*id]).collect::<Vec<_>>());
    }

    #[test]
    fn test_par_waves() {
        let (job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        let waves = graph.resolve_order(Flow::Par).unwrap();
        assert_eq!(waves, vec![vec![ids[0]], vec![ids[1], ids[2]], vec![ids[3]]]);
    }

    #[test]
    fn test_feeds_only_producers() {
        let (job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        assert!(graph.feeds(ids[0]));
        assert!(graph.feeds(ids[2]));
        assert!(!graph.feeds(ids[3]));
    }

    #[test]
    fn test_check_blocked_until_done() {
        let (job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        let mut done = HashSet::new();
        assert_eq!(graph.check(ids[3], &done), Resolution::Blocked(vec![ids[1], ids[2]]));
        done.insert(ids[1]);
        done.insert(ids[2]);
        assert_eq!(graph.check(ids[3], &done), Resolution::Ready);
    }

    #[test]
    fn test_cycle_detected() {
        let (a, b) = (task("a"), task("b"));
        let (ia, ib) = (a.id, b.id);
        let job = Job::new("loop")
            .with_child(a)
            .with_child(b)
            .with_pipe(Pipe::new(ia, "out", ib, "in"))
            .with_pipe(Pipe::new(ib, "out", ia, "in"));
        let graph = PipeGraph::new(&job).unwrap();
        assert_eq!(graph.find_cycle().map(|c| c.len()), Some(2));
        assert!(matches!(graph.resolve_order(Flow::Par), Err(DispatchError::Propagation(_))));
    }

    #[test]
    fn test_propagate_copies_values() {
        let (mut job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        let mut producer = job.children[0].clone();
        *producer.context_mut() = DataContext::new("a").with_value("out", 500);
        assert_eq!(graph.propagate(&producer, &mut job.children).unwrap(), 2);

        // d consumes from b and c only
        let leaf = job.children[3].clone();
        assert_eq!(graph.propagate(&leaf, &mut job.children).unwrap(), 0);

        let b = job.children.iter().find(|c| c.id() == ids[1]).unwrap();
        assert_eq!(b.context().get_f64("in"), Some(500.0));
        assert_eq!(b.context().direction("in"), Some(Direction::In));
    }

    #[test]
    fn test_propagate_missing_path() {
        let (mut job, ids) = diamond();
        let graph = PipeGraph::new(&job).unwrap();
        let producer = job.children[0].clone();

        let err = graph.propagate(&producer, &mut job.children).unwrap_err();
        assert!(err.to_string().contains("missing path out"));
        let b = job.children.iter().find(|c| c.id() == ids[1]).unwrap();
        assert!(!b.context().contains("in"));
    }
}
