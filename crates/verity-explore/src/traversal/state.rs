use std::collections::{BTreeMap, VecDeque};

use verity_compiler::graph::NodeId;
use verity_compiler::signature::{PathSignature, SigEntry};
use verity_compiler::CompiledFunction;
use verity_model::TypeTag;

use crate::solver::constraint::{Constraint, Outcome, SymExpr, SymbolId};

/// One recorded choice at a fork point inside a flow node.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub outcome: Outcome,
    /// Whether the choice constrains the inputs (other outcomes were feasible).
    pub atom: bool,
    /// Whether siblings were forked off at this point.
    pub forked: bool,
}

/// Progress of a `for` loop.
#[derive(Debug, Clone, PartialEq)]
pub enum IterState {
    /// Items are known terms.
    Known(VecDeque<SymExpr>),
    /// Iterating a symbolic term; `pos` items have been taken.
    Symbolic { seq: SymExpr, pos: usize },
}

/// Symbolic state of one path.
#[derive(Debug, Clone)]
pub struct PathState {
    pub node: NodeId,
    pub locals: BTreeMap<String, SymExpr>,
    pub globals: BTreeMap<String, SymExpr>,
    pub iters: BTreeMap<u32, IterState>,
    pub constraint: Constraint,
    /// Predicted signature so far.
    pub signature: PathSignature,
    /// Times each guarded loop condition was taken.
    pub loop_counts: BTreeMap<NodeId, u32>,
    pub steps: usize,
    /// Forking decisions taken.
    pub decisions: usize,
    pub next_opaque: SymbolId,
    /// Choices to replay when re-entering the current node.
    pub script: Vec<Choice>,
}

impl PathState {
    /// Entry state with parameter `i` bound to symbol `i` of type `domains[i]`.
    pub fn entry(
        function: &CompiledFunction,
        globals: &BTreeMap<String, verity_model::Value>,
        domains: Vec<TypeTag>,
    ) -> Self {
        let mut signature = PathSignature::new();
        for (i, tag) in domains.iter().enumerate() {
            signature.push(SigEntry::Domain {
                param: i as u32,
                tag: *tag,
            });
        }
        Self {
            node: function.graph.entry,
            locals: function
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| (p.name.clone(), SymExpr::Input(i as SymbolId)))
                .collect(),
            globals: globals
                .iter()
                .map(|(k, v)| (k.clone(), SymExpr::Const(v.clone())))
                .collect(),
            iters: BTreeMap::new(),
            constraint: Constraint::new(domains),
            signature,
            loop_counts: BTreeMap::new(),
            steps: 0,
            decisions: 0,
            next_opaque: 0,
            script: Vec::new(),
        }
    }

    pub fn fresh_opaque(&mut self) -> SymExpr {
        let id = self.next_opaque;
        self.next_opaque += 1;
        SymExpr::Opaque(id)
    }
}

/// A terminated, not yet solved path handed to the worker pool.
#[derive(Debug, Clone)]
pub struct PathJob {
    /// Position in exploration order.
    pub seq: u64,
    pub constraint: Constraint,
    pub predicted: PathSignature,
}
