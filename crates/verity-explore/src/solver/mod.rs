pub mod constraint;
pub mod domain;
pub mod rng;
pub mod search;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use verity_compiler::CompiledFunction;
use verity_model::{TypeTag, Value};

use constraint::{Constraint, Outcome, Probe, SymExpr};
use domain::{boundary_literals, candidates};
use search::{Problem, Search};

/// Solver limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// SAT calls one query may make. Running out discards the query the
    /// same way on every machine.
    pub max_sat_calls: u64,
    /// Wall-clock backstop for one query, in milliseconds. Hitting it ends
    /// the whole exploration instead of discarding a single path.
    pub timeout_ms: u64,
    /// Candidates considered per parameter and type tag.
    pub max_candidates: usize,
    /// Models enumerated when listing the outcomes of a term over three or
    /// more symbols.
    pub max_models: usize,
    /// Extra solutions kept per path to reach unused boundary literals.
    pub max_boundary_extras: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_sat_calls: 20_000,
            timeout_ms: 10_000,
            max_candidates: 48,
            max_models: 96,
            max_boundary_extras: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("solver exhausted its budget of {0} SAT calls")]
    Exhausted(u64),
    #[error("solver timed out after {0} ms")]
    Timeout(u64),
    #[error("solver cancelled")]
    Cancelled,
    #[error("solver failure: {0}")]
    Solver(String),
}

/// Satisfying inputs for one path constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// The preferred input vector: earliest candidate per parameter.
    pub primary: Vec<Value>,
    /// Further distinct vectors, tried when the primary does not realize
    /// the predicted path.
    pub alternatives: Vec<Vec<Value>>,
    /// Vectors that put a boundary literal into a parameter where the
    /// primary has some other value.
    pub boundary: Vec<Vec<Value>>,
}

/// Per-function constraint solver over finite candidate domains.
pub struct Solver {
    config: SolverConfig,
    /// Candidate table per parameter and tag.
    tables: Vec<BTreeMap<TypeTag, Vec<Value>>>,
    cancel: Arc<AtomicBool>,
}

impl Solver {
    pub fn for_function(function: &CompiledFunction, config: &SolverConfig, seed: u64) -> Self {
        let tables = (0..function.arity())
            .map(|i| {
                let mut constants: Vec<Value> = function.hints.constants(i).to_vec();
                for c in &function.constants {
                    if !constants.contains(c) {
                        constants.push(c.clone());
                    }
                }
                if let Some(default) = &function.params[i].default {
                    if !constants.contains(default) {
                        constants.insert(0, default.clone());
                    }
                }
                TypeTag::ALL
                    .iter()
                    .map(|tag| {
                        (
                            *tag,
                            candidates(*tag, &constants, seed, i as u32, config.max_candidates),
                        )
                    })
                    .collect()
            })
            .collect();
        Self {
            config: config.clone(),
            tables,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag; queries in flight return `Cancelled` once it is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Candidates for parameter `param` under `tag`.
    pub fn candidates(&self, param: usize, tag: TypeTag) -> &[Value] {
        self.tables
            .get(param)
            .and_then(|t| t.get(&tag))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn tables_for(&self, constraint: &Constraint) -> Vec<Vec<Value>> {
        constraint
            .domains
            .iter()
            .enumerate()
            .map(|(i, tag)| self.candidates(i, *tag).to_vec())
            .collect()
    }

    fn search<'p, 'c>(&'p self, problem: &'p Problem<'c>) -> Search<'p, 'c> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        Search::new(
            problem,
            self.config.max_sat_calls,
            deadline,
            self.config.timeout_ms,
            &self.cancel,
        )
    }

    /// Whether any input vector satisfies `constraint`.
    pub fn check(&self, constraint: &Constraint) -> Result<bool, SolveError> {
        let Some(problem) = Problem::build(constraint, self.tables_for(constraint)) else {
            return Ok(false);
        };
        let mut search = self.search(&problem);
        Ok(search.solve_under(&[])?.is_some())
    }

    /// Every outcome `probe` can observe on `expr` among inputs satisfying
    /// `constraint`, in ascending order.
    pub fn outcomes(
        &self,
        constraint: &Constraint,
        expr: &SymExpr,
        probe: Probe,
    ) -> Result<Vec<Outcome>, SolveError> {
        let Some(problem) = Problem::build(constraint, self.tables_for(constraint)) else {
            return Ok(Vec::new());
        };
        let mut search = self.search(&problem);
        let relevant: Vec<usize> = expr.symbols().iter().map(|s| *s as usize).collect();
        let mut found: Vec<Outcome> = Vec::new();

        if relevant.len() <= 2 {
            // Small projections are enumerated exhaustively, then each
            // distinct outcome is confirmed against the full constraint.
            let mut groups: BTreeMap<Outcome, Vec<Vec<(usize, usize)>>> = BTreeMap::new();
            let mut inputs = vec![Value::None; problem.symbol_count()];
            for combo in combinations(&problem, &relevant) {
                for (sym, idx) in &combo {
                    inputs[*sym] = problem.space.symbols[*sym].values[*idx].clone();
                }
                if let Some(outcome) = probe.observe(expr, &inputs) {
                    let witnesses = groups.entry(outcome).or_default();
                    if witnesses.len() < 64 {
                        witnesses.push(combo);
                    }
                }
            }
            for (outcome, witnesses) in groups {
                for combo in witnesses {
                    let lits = problem.space.lits(&combo);
                    if search.solve_under(&lits)?.is_some() {
                        found.push(outcome);
                        break;
                    }
                }
            }
            return Ok(found);
        }

        for _ in 0..self.config.max_models {
            let Some(choices) = search.solve_under(&[])? else {
                break;
            };
            let inputs = problem.values(&choices);
            if let Some(outcome) = probe.observe(expr, &inputs) {
                if !found.contains(&outcome) {
                    found.push(outcome);
                }
            }
            let projection: Vec<(usize, usize)> =
                relevant.iter().map(|s| (*s, choices[*s])).collect();
            search.block(&projection);
        }
        found.sort();
        Ok(found)
    }

    /// Up to `max_solutions` distinct input vectors satisfying `constraint`,
    /// plus boundary extras. `None` when the constraint is infeasible.
    pub fn solve(
        &self,
        constraint: &Constraint,
        max_solutions: usize,
    ) -> Result<Option<Solution>, SolveError> {
        let Some(problem) = Problem::build(constraint, self.tables_for(constraint)) else {
            return Ok(None);
        };
        let mut search = self.search(&problem);
        let Some(start) = search.solve_under(&[])? else {
            return Ok(None);
        };
        let primary = search.prefer(Vec::new(), start)?;
        let n = problem.symbol_count();

        // Boundary sweep first: alternatives below are blocked once found.
        let literals = boundary_literals();
        let mut boundary: Vec<Vec<usize>> = Vec::new();
        'sweep: for sym in 0..n {
            let values = &problem.space.symbols[sym].values;
            for (idx, value) in values.iter().enumerate() {
                if boundary.len() >= self.config.max_boundary_extras {
                    break 'sweep;
                }
                if !literals.contains(value)
                    || primary[sym] == idx
                    || boundary.iter().any(|b| b[sym] == idx)
                {
                    continue;
                }
                let Some(lit) = problem.lit(sym, idx) else {
                    continue;
                };
                let attempt = search
                    .solve_under(&[lit])
                    .and_then(|start| start.map(|s| search.prefer(vec![lit], s)).transpose());
                match attempt {
                    Ok(Some(extra)) => {
                        if extra != primary && !boundary.contains(&extra) {
                            boundary.push(extra);
                        }
                    }
                    Ok(None) => {}
                    // The sweep is best effort: keep what the main search found.
                    Err(SolveError::Exhausted(_)) => break 'sweep,
                    Err(e) => return Err(e),
                }
            }
        }

        let mut found = vec![primary];
        if n > 0 {
            while found.len() < max_solutions.max(1) {
                let last: Vec<(usize, usize)> =
                    found[found.len() - 1].iter().copied().enumerate().collect();
                search.block(&last);
                match search.solve_under(&[]) {
                    Ok(Some(start)) => found.push(search.prefer(Vec::new(), start)?),
                    Ok(None) | Err(SolveError::Exhausted(_)) => break,
                    Err(e) => return Err(e),
                }
            }
        }

        let mut vectors = found.into_iter().map(|choices| problem.values(&choices));
        let primary = vectors.next().unwrap_or_default();
        Ok(Some(Solution {
            primary,
            alternatives: vectors.collect(),
            boundary: boundary.iter().map(|choices| problem.values(choices)).collect(),
        }))
    }
}

/// Cartesian product of candidate indices over `symbols`.
fn combinations(problem: &Problem<'_>, symbols: &[usize]) -> Vec<Vec<(usize, usize)>> {
    let mut out: Vec<Vec<(usize, usize)>> = vec![Vec::new()];
    for sym in symbols {
        let count = problem.space.symbols[*sym].values.len();
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..count).map(move |idx| {
                    let mut next = prefix.clone();
                    next.push((*sym, idx));
                    next
                })
            })
            .collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use constraint::Atom;
    use verity_compiler::analyze;
    use verity_model::{CmpOp, ErrorKind};

    const SOURCE: &str = "\
TABLE = {'en': 'hello', 'fr': 'bonjour'}

def greet(lang, n):
    if n > 3:
        return TABLE[lang]
    return None
";

    fn solver() -> Solver {
        let module = analyze(SOURCE);
        Solver::for_function(module.function("greet").unwrap(), &SolverConfig::default(), 42)
    }

    fn lookup() -> SymExpr {
        SymExpr::Subscript(
            SymExpr::Const(Value::Dict(vec![
                (Value::str("en"), Value::str("hello")),
                (Value::str("fr"), Value::str("bonjour")),
            ]))
            .boxed(),
            SymExpr::Input(0).boxed(),
        )
    }

    #[test]
    fn test_outcomes_cover_every_entry_and_the_miss() {
        let s = solver();
        let c = Constraint::new(vec![TypeTag::Text, TypeTag::Integer]);
        let outcomes = s.outcomes(&c, &lookup(), Probe::Select).unwrap();
        assert_eq!(
            outcomes,
            vec![
                Outcome::Selects(0),
                Outcome::Selects(1),
                Outcome::Raises(ErrorKind::KeyError)
            ]
        );
    }

    #[test]
    fn test_solve_respects_atoms_and_prefers_boundaries() {
        let s = solver();
        let mut c = Constraint::new(vec![TypeTag::Text, TypeTag::Integer]);
        c.push(Atom::new(
            SymExpr::Compare(
                CmpOp::Gt,
                SymExpr::Input(1).boxed(),
                SymExpr::Const(Value::int(3)).boxed(),
            ),
            Probe::Truthy,
            Outcome::Holds(true),
        ));
        c.push(Atom::new(lookup(), Probe::Select, Outcome::Raises(ErrorKind::KeyError)));
        let solution = s.solve(&c, 3).unwrap().unwrap();
        assert!(c.holds_for(&solution.primary));
        assert_eq!(solution.primary[0], Value::str(""));
        assert_eq!(solution.primary[1], Value::int(4));
        for alt in &solution.alternatives {
            assert!(c.holds_for(alt));
            assert_ne!(alt, &solution.primary);
        }
        for extra in &solution.boundary {
            assert!(c.holds_for(extra));
        }
        // -1 cannot exceed 3, but the empty string is already in the primary.
        assert!(solution.boundary.iter().all(|b| b[1] != Value::int(-1)));
    }

    #[test]
    fn test_infeasible_constraint_has_no_solution() {
        let s = solver();
        let mut c = Constraint::new(vec![TypeTag::Text, TypeTag::Integer]);
        let gt = |k: i64| {
            SymExpr::Compare(
                CmpOp::Gt,
                SymExpr::Input(1).boxed(),
                SymExpr::Const(Value::int(k)).boxed(),
            )
        };
        c.push(Atom::new(gt(3), Probe::Truthy, Outcome::Holds(true)));
        c.push(Atom::new(gt(2), Probe::Truthy, Outcome::Holds(false)));
        assert!(!s.check(&c).unwrap());
        assert_eq!(s.solve(&c, 3).unwrap(), None);
    }

    #[test]
    fn test_cancelled_solver_reports_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let s = solver().with_cancel(flag);
        let c = Constraint::new(vec![TypeTag::Text, TypeTag::Integer]);
        assert_eq!(s.check(&c), Err(SolveError::Cancelled));
    }
}
