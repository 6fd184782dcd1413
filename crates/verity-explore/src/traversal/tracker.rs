//! Coverage and novelty bookkeeping shared by the explorer and the committer.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use verity_compiler::graph::{FlowGraph, NodeId};
use verity_compiler::signature::{PathSignature, RaiseSite, Terminal};
use verity_model::Value;

use crate::solver::domain::boundary_literals;

/// Why exploration of a function ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every reachable path within the bounds was explored.
    Exhausted,
    /// The path budget was spent.
    PathLimit,
    /// Too many consecutive paths produced nothing new.
    Plateau,
    WallTime,
}

#[derive(Debug)]
pub struct Tracker {
    symbolic: DashSet<PathSignature>,
    concrete: DashSet<PathSignature>,
    covered: DashSet<(NodeId, bool)>,
    error_sites: DashSet<RaiseSite>,
    /// `(parameter, literal)` pairs some kept case exercises.
    boundaries: DashSet<(usize, Value)>,
    total_edges: usize,
    max_paths: usize,
    novelty_patience: usize,
    committed: AtomicUsize,
    stale: AtomicUsize,
}

impl Tracker {
    pub fn new(graph: &FlowGraph, max_paths: usize, novelty_patience: usize) -> Self {
        Self {
            symbolic: DashSet::new(),
            concrete: DashSet::new(),
            covered: DashSet::new(),
            error_sites: DashSet::new(),
            boundaries: DashSet::new(),
            total_edges: graph.decision_edges().len(),
            max_paths,
            novelty_patience,
            committed: AtomicUsize::new(0),
            stale: AtomicUsize::new(0),
        }
    }

    /// Insert a predicted signature; false when it was already explored.
    pub fn admit_prediction(&self, signature: &PathSignature) -> bool {
        self.symbolic.insert(signature.clone())
    }

    /// Insert a concrete signature; false when some kept case already has it.
    pub fn admit_concrete(&self, signature: &PathSignature) -> bool {
        if !self.concrete.insert(signature.clone()) {
            return false;
        }
        for edge in signature.branch_edges() {
            self.covered.insert(edge);
        }
        if let Some(Terminal::Raise { site, .. }) = &signature.terminal {
            self.error_sites.insert(*site);
        }
        true
    }

    /// Whether `args` puts a boundary literal in a parameter position no kept
    /// case has used it in yet.
    pub fn exercises_new_boundary(&self, args: &[Value]) -> bool {
        let literals = boundary_literals();
        args.iter()
            .enumerate()
            .any(|(i, v)| literals.contains(v) && !self.boundaries.contains(&(i, v.clone())))
    }

    pub fn mark_boundaries(&self, args: &[Value]) {
        let literals = boundary_literals();
        for (i, v) in args.iter().enumerate() {
            if literals.contains(v) {
                self.boundaries.insert((i, v.clone()));
            }
        }
    }

    /// Count one committed path; `novel` when it kept at least one case.
    /// Returns the budget that ran out, if any.
    pub fn record_attempt(&self, novel: bool) -> Option<StopReason> {
        let committed = self.committed.fetch_add(1, Ordering::SeqCst) + 1;
        let stale = if novel {
            self.stale.store(0, Ordering::SeqCst);
            0
        } else {
            self.stale.fetch_add(1, Ordering::SeqCst) + 1
        };
        if committed >= self.max_paths {
            Some(StopReason::PathLimit)
        } else if self.novelty_patience > 0 && stale >= self.novelty_patience {
            Some(StopReason::Plateau)
        } else {
            None
        }
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn covered_edges(&self) -> usize {
        self.covered.len()
    }

    pub fn total_edges(&self) -> usize {
        self.total_edges
    }

    /// Covered over total branch edges; 1.0 for functions without branches.
    pub fn coverage(&self) -> f64 {
        if self.total_edges == 0 {
            1.0
        } else {
            self.covered.len() as f64 / self.total_edges as f64
        }
    }

    pub fn error_sites_hit(&self) -> Vec<RaiseSite> {
        let mut sites: Vec<RaiseSite> = self.error_sites.iter().map(|s| *s).collect();
        sites.sort();
        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_compiler::signature::SigEntry;

    fn signature(taken: bool) -> PathSignature {
        let mut s = PathSignature::new();
        s.push(SigEntry::Branch { node: 2, taken });
        s.terminate(Terminal::Return);
        s
    }

    #[test]
    fn test_signature_sets_insert_once() {
        let t = Tracker::new(&FlowGraph::new(), 10, 3);
        assert!(t.admit_prediction(&signature(true)));
        assert!(!t.admit_prediction(&signature(true)));
        assert!(t.admit_concrete(&signature(false)));
        assert!(!t.admit_concrete(&signature(false)));
        assert_eq!(t.covered_edges(), 1);
    }

    #[test]
    fn test_plateau_and_path_limit() {
        let t = Tracker::new(&FlowGraph::new(), 10, 3);
        assert_eq!(t.record_attempt(true), None);
        assert_eq!(t.record_attempt(false), None);
        assert_eq!(t.record_attempt(false), None);
        assert_eq!(t.record_attempt(false), Some(StopReason::Plateau));

        let t = Tracker::new(&FlowGraph::new(), 2, 0);
        assert_eq!(t.record_attempt(false), None);
        assert_eq!(t.record_attempt(false), Some(StopReason::PathLimit));
    }

    #[test]
    fn test_boundaries_are_tracked_per_position() {
        let t = Tracker::new(&FlowGraph::new(), 10, 3);
        let args = [Value::int(0), Value::str("x")];
        assert!(t.exercises_new_boundary(&args));
        t.mark_boundaries(&args);
        assert!(!t.exercises_new_boundary(&args));
        assert!(t.exercises_new_boundary(&[Value::str("x"), Value::int(0)]));
    }
}
