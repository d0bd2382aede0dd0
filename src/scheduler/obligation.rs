// src/scheduler/obligation.rs

//! Explicit record of in-flight scheduler obligations
//!
//! Every unpack, configure or remove the scheduler starts is pushed here
//! and popped when it returns. The stack answers "is this package already
//! being worked on further up?", which is how dependency cycles are broken,
//! and it bounds the work: nesting depth, a total step budget, and the
//! cancellation token, which is observed at every push.

use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, PackageId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What an obligation is trying to achieve for its package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Unpack,
    Configure,
    Remove,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Unpack => "unpack",
            Phase::Configure => "configure",
            Phase::Remove => "remove",
        };
        write!(f, "{}", text)
    }
}

/// One frame of scheduler work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Obligation {
    pub package: PackageId,
    pub phase: Phase,
}

#[derive(Debug)]
pub struct ObligationStack {
    frames: Vec<Obligation>,
    in_flight: HashSet<(PackageId, Phase)>,
    steps: u64,
    budget: u64,
    max_depth: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl ObligationStack {
    pub fn new(max_depth: usize, budget: u64) -> Self {
        Self {
            frames: Vec::new(),
            in_flight: HashSet::new(),
            steps: 0,
            budget,
            max_depth,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Start an obligation
    ///
    /// Returns `Ok(false)` when the same obligation is already in flight;
    /// the caller must then treat it as transiently satisfied and not pop.
    pub fn push(&mut self, graph: &DependencyGraph, package: PackageId, phase: Phase) -> Result<bool> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(format!("{} of {}", phase, graph.display(package))));
        }
        if self.in_flight.contains(&(package, phase)) {
            return Ok(false);
        }
        if self.frames.len() >= self.max_depth {
            return Err(Error::DepthLimit {
                package: graph.full_name(package),
                limit: self.max_depth,
            });
        }

        self.steps += 1;
        if self.steps > self.budget {
            return Err(Error::LoopLimit {
                package: graph.full_name(package),
                phase: phase.to_string(),
                limit: self.budget,
            });
        }

        self.in_flight.insert((package, phase));
        self.frames.push(Obligation { package, phase });
        Ok(true)
    }

    /// Finish the innermost obligation
    pub fn pop(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.in_flight.remove(&(frame.package, frame.phase));
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Any obligation for this package is in flight
    pub fn is_in_flight(&self, package: PackageId) -> bool {
        self.frames.iter().any(|f| f.package == package)
    }

    pub fn is_phase_in_flight(&self, package: PackageId, phase: Phase) -> bool {
        self.in_flight.contains(&(package, phase))
    }

    pub fn frames(&self) -> &[Obligation] {
        &self.frames
    }
}

/// Indentation for the recursion trace
pub(crate) fn indent(depth: usize) -> String {
    " ".repeat(depth * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> (DependencyGraph, PackageId, PackageId) {
        let mut graph = DependencyGraph::new("amd64");
        let a = graph.add_package("a", "amd64");
        let b = graph.add_package("b", "amd64");
        (graph, a, b)
    }

    #[test]
    fn test_push_pop_in_flight() {
        let (graph, a, b) = graph();
        let mut stack = ObligationStack::new(10, 100);

        assert!(stack.push(&graph, a, Phase::Unpack).unwrap());
        assert!(stack.push(&graph, b, Phase::Configure).unwrap());
        assert!(!stack.push(&graph, a, Phase::Unpack).unwrap());
        assert!(stack.push(&graph, a, Phase::Configure).unwrap());
        assert_eq!(stack.depth(), 3);
        assert!(stack.is_phase_in_flight(a, Phase::Unpack));

        stack.pop();
        stack.pop();
        assert!(!stack.is_in_flight(b));
        assert!(stack.is_in_flight(a));
        stack.pop();
        assert_eq!(stack.depth(), 0);
        assert!(!stack.is_in_flight(a));
    }

    #[test]
    fn test_depth_limit() {
        let (graph, a, b) = graph();
        let mut stack = ObligationStack::new(1, 100);
        stack.push(&graph, a, Phase::Unpack).unwrap();
        let err = stack.push(&graph, b, Phase::Unpack).unwrap_err();
        assert!(matches!(err, Error::DepthLimit { limit: 1, .. }));
    }

    #[test]
    fn test_step_budget() {
        let (graph, a, _) = graph();
        let mut stack = ObligationStack::new(10, 2);
        for _ in 0..2 {
            stack.push(&graph, a, Phase::Unpack).unwrap();
            stack.pop();
        }
        let err = stack.push(&graph, a, Phase::Unpack).unwrap_err();
        assert!(matches!(err, Error::LoopLimit { limit: 2, .. }));
    }

    #[test]
    fn test_cancellation_observed_on_push() {
        let (graph, a, _) = graph();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stack = ObligationStack::new(10, 100).with_cancel(Some(cancel.clone()));

        assert!(stack.push(&graph, a, Phase::Unpack).unwrap());
        cancel.store(true, Ordering::Relaxed);
        let err = stack.push(&graph, a, Phase::Configure).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
