//! SAT-based search over one-hot candidate encodings.
//!
//! Atoms over one symbol filter that symbol's candidates before encoding.
//! Atoms over two symbols become pairwise exclusion clauses. Atoms over three
//! or more symbols are checked lazily against each model and refuted with a
//! blocking clause when violated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use varisat::{solver::Solver, ExtendFormula, Lit};
use verity_model::Value;

use super::constraint::{Atom, Constraint};
use super::domain::EncodedSpace;
use super::SolveError;

/// Number of leading candidates tried per symbol when preferring boundary values.
const PREFERENCE_WINDOW: usize = 12;

/// A constraint lowered to candidates and clauses.
pub struct Problem<'c> {
    pub space: EncodedSpace,
    pairwise: Vec<Vec<Lit>>,
    lazy: Vec<&'c Atom>,
}

fn placeholder_inputs(n: usize) -> Vec<Value> {
    vec![Value::None; n]
}

impl<'c> Problem<'c> {
    /// Lower `constraint` over the given per-parameter candidate lists.
    /// `None` when some symbol has no candidate left.
    pub fn build(constraint: &'c Constraint, mut tables: Vec<Vec<Value>>) -> Option<Problem<'c>> {
        let n = tables.len();
        let mut binary = Vec::new();
        let mut lazy = Vec::new();
        for atom in &constraint.atoms {
            match atom.symbols() {
                [] => {
                    if !atom.holds(&placeholder_inputs(n)) {
                        return None;
                    }
                }
                [s] => {
                    let s = *s as usize;
                    let mut inputs = placeholder_inputs(n);
                    tables.get_mut(s)?.retain(|v| {
                        inputs[s] = v.clone();
                        atom.holds(&inputs)
                    });
                }
                [_, _] => binary.push(atom),
                _ => lazy.push(atom),
            }
        }
        if tables.iter().any(|t| t.is_empty()) {
            return None;
        }
        let space = EncodedSpace::encode(tables);
        let mut pairwise = Vec::new();
        for atom in binary {
            let (a, b) = (atom.symbols()[0] as usize, atom.symbols()[1] as usize);
            let (sa, sb) = (&space.symbols[a], &space.symbols[b]);
            let mut inputs = placeholder_inputs(n);
            for (ia, va) in sa.values.iter().enumerate() {
                inputs[a] = va.clone();
                for (ib, vb) in sb.values.iter().enumerate() {
                    inputs[b] = vb.clone();
                    if !atom.holds(&inputs) {
                        pairwise.push(vec![sa.vars[ia].negative(), sb.vars[ib].negative()]);
                    }
                }
            }
        }
        Some(Problem {
            space,
            pairwise,
            lazy,
        })
    }

    pub fn symbol_count(&self) -> usize {
        self.space.symbols.len()
    }

    pub fn lit(&self, symbol: usize, index: usize) -> Option<Lit> {
        self.space.symbols.get(symbol).and_then(|s| s.lit(index))
    }

    pub fn values(&self, choices: &[usize]) -> Vec<Value> {
        self.space
            .symbols
            .iter()
            .zip(choices)
            .map(|(s, i)| s.values.get(*i).cloned().unwrap_or(Value::None))
            .collect()
    }
}

/// Incremental search over one problem under a SAT-call budget and a
/// wall-clock deadline. A shared flag cancels it.
pub struct Search<'p, 'c> {
    problem: &'p Problem<'c>,
    solver: Solver<'static>,
    max_calls: u64,
    deadline: Instant,
    timeout_ms: u64,
    cancel: &'p AtomicBool,
    /// Number of SAT calls made.
    pub calls: u64,
}

impl<'p, 'c> Search<'p, 'c> {
    pub fn new(
        problem: &'p Problem<'c>,
        max_calls: u64,
        deadline: Instant,
        timeout_ms: u64,
        cancel: &'p AtomicBool,
    ) -> Self {
        let mut solver = Solver::new();
        for clause in &problem.space.structural_clauses {
            solver.add_clause(clause);
        }
        for clause in &problem.pairwise {
            solver.add_clause(clause);
        }
        Self {
            problem,
            solver,
            max_calls,
            deadline,
            timeout_ms,
            cancel,
            calls: 0,
        }
    }

    fn check_budget(&self) -> Result<(), SolveError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SolveError::Cancelled);
        }
        if self.calls >= self.max_calls {
            return Err(SolveError::Exhausted(self.max_calls));
        }
        if Instant::now() >= self.deadline {
            return Err(SolveError::Timeout(self.timeout_ms));
        }
        Ok(())
    }

    /// Exclude one combination of candidate choices from every later model.
    pub fn block(&mut self, choices: &[(usize, usize)]) {
        let clause: Vec<Lit> = self.problem.space.lits(choices).into_iter().map(|l| !l).collect();
        if !clause.is_empty() {
            self.solver.add_clause(&clause);
        }
    }

    /// A model satisfying every atom under `assumptions`, as candidate indices.
    pub fn solve_under(&mut self, assumptions: &[Lit]) -> Result<Option<Vec<usize>>, SolveError> {
        loop {
            self.check_budget()?;
            self.calls += 1;
            self.solver.assume(assumptions);
            match self.solver.solve() {
                Ok(true) => {
                    let model = self
                        .solver
                        .model()
                        .ok_or_else(|| {
                            SolveError::Solver("SAT but no model returned".to_string())
                        })?;
                    let choices = self
                        .problem
                        .space
                        .choices(&model)
                        .ok_or_else(|| {
                            SolveError::Solver("model leaves a symbol unassigned".to_string())
                        })?;
                    let inputs = self.problem.values(&choices);
                    match self.problem.lazy.iter().find(|a| !a.holds(&inputs)) {
                        Some(atom) => {
                            let refuted: Vec<(usize, usize)> = atom
                                .symbols()
                                .iter()
                                .map(|s| (*s as usize, choices[*s as usize]))
                                .collect();
                            self.block(&refuted);
                        }
                        None => return Ok(Some(choices)),
                    }
                }
                Ok(false) => return Ok(None),
                Err(e) => return Err(SolveError::Solver(e.to_string())),
            }
        }
    }

    /// Starting from a model, move each symbol (in order) to its earliest
    /// candidate that keeps the problem satisfiable.
    pub fn prefer(
        &mut self,
        mut fixed: Vec<Lit>,
        start: Vec<usize>,
    ) -> Result<Vec<usize>, SolveError> {
        let mut current = start;
        for sym in 0..self.problem.symbol_count() {
            let chosen = current[sym];
            let mut pick = chosen;
            for idx in 0..chosen.min(PREFERENCE_WINDOW) {
                let Some(lit) = self.problem.lit(sym, idx) else {
                    continue;
                };
                if fixed.contains(&!lit) {
                    continue;
                }
                let mut trial = fixed.clone();
                trial.push(lit);
                if let Some(found) = self.solve_under(&trial)? {
                    current = found;
                    pick = idx;
                    break;
                }
            }
            if let Some(lit) = self.problem.lit(sym, pick) {
                if !fixed.contains(&lit) {
                    fixed.push(lit);
                }
            }
        }
        Ok(current)
    }
}
