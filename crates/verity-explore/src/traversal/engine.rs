//! Depth-first symbolic exploration of one function's flow graph.
//!
//! Each path state is advanced node by node. When an operation on a symbolic
//! term has several feasible outcomes, the state continues with the first one
//! and the others become sibling states that replay the node with a different
//! choice. Every choice that excludes a feasible alternative adds an atom to
//! the path constraint, so the constraint of a terminated path describes
//! exactly the inputs that follow it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use verity_compiler::compile::raised_class;
use verity_compiler::graph::{FlowNode, LoopGuard, NodeId, RaiseSpec};
use verity_compiler::signature::{RaiseSite, SigEntry, Terminal};
use verity_compiler::{AnalyzedModule, CompiledFunction};
use verity_ir::ast::BoolOp;
use verity_ir::{Expr, ExprId, ExprKind, Stmt, StmtKind, Target};
use verity_model::{ops, CmpOp, ErrorKind, OpError, TypeTag, Value};
use verity_sandbox::builtins;

use super::runner::ExploreConfig;
use super::state::{Choice, IterState, PathJob, PathState};
use super::tracker::Tracker;
use crate::solver::constraint::{Atom, Outcome, Probe, SymExpr};
use crate::solver::{SolveError, Solver};

/// Counters kept by the explorer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Terminated paths handed to the pool.
    pub emitted: u64,
    /// Sibling states created at fork points.
    pub forks: u64,
    /// Terminated paths whose predicted signature was already explored.
    pub duplicates: u64,
    pub unanalyzable: u64,
    /// Paths that reached behaviour without a symbolic model.
    pub unmodelled: u64,
    pub step_limited: u64,
    pub depth_limited: u64,
    /// Paths cut where a loop would exceed its bound.
    pub loop_limited: u64,
    pub infeasible: u64,
    /// Forks abandoned because a query ran out of SAT calls.
    pub solver_timeouts: u64,
    pub solver_errors: u64,
    /// A query hit the solver's wall-clock backstop and exploration stopped.
    pub deadline_reached: bool,
}

#[derive(Debug, Clone, Copy)]
enum Dropped {
    Unanalyzable,
    Unmodelled,
    StepLimit,
    DepthLimit,
    LoopBound,
    Infeasible,
    SolverBudget,
    SolverError,
    SolverDeadline,
    Cancelled,
}

/// Why evaluation of a path stopped before reaching its next node.
enum Stop {
    /// The path raises `kind` at `site`.
    Raise(ErrorKind, RaiseSite),
    Drop(Dropped),
}

fn unmodelled<T>() -> Result<T, Stop> {
    Err(Stop::Drop(Dropped::Unmodelled))
}

fn unbound_local(site: RaiseSite) -> Stop {
    Stop::Raise(ErrorKind::Other("UnboundLocalError".to_string()), site)
}

/// How the outcomes of a fork point are filtered and ordered.
enum Plan {
    /// A recorded decision edge; not yet covered edges first.
    Edge { node: NodeId, forced: Option<bool> },
    /// An unrecorded truth test (`and`/`or`, conditional expressions).
    Cond,
    Eval,
    Select,
}

impl Plan {
    /// Outcomes assumed for terms over opaque values.
    fn blind(&self) -> Vec<Outcome> {
        match self {
            Plan::Edge { .. } | Plan::Cond => vec![Outcome::Holds(true), Outcome::Holds(false)],
            Plan::Eval | Plan::Select => vec![Outcome::Completes],
        }
    }
}

/// Replay cursor over the choices made inside the current node.
struct Ctx {
    script: Vec<Choice>,
    pos: usize,
    forks: Vec<Vec<Choice>>,
}

impl Ctx {
    fn new(script: Vec<Choice>) -> Self {
        Self {
            script,
            pos: 0,
            forks: Vec::new(),
        }
    }

    fn replay(&mut self) -> Option<Choice> {
        let choice = self.script.get(self.pos).cloned();
        if choice.is_some() {
            self.pos += 1;
        }
        choice
    }

    fn fork(&mut self, alternative: Choice) {
        let mut script = self.script[..self.pos].to_vec();
        script.push(alternative);
        self.forks.push(script);
    }

    fn record(&mut self, choice: Choice) -> Choice {
        self.script.push(choice.clone());
        self.pos += 1;
        choice
    }
}

/// Parameter type-tag combinations in priority order: hinted tags first,
/// combinations with a smaller total rank before larger ones, so every
/// parameter leaves its first tag early.
struct DomainCursor {
    orders: Vec<Vec<TypeTag>>,
    /// Rank of the current tag per parameter; `None` once exhausted.
    ranks: Option<Vec<usize>>,
}

impl DomainCursor {
    fn new(function: &CompiledFunction, explore_unhinted: bool) -> Self {
        let orders: Vec<Vec<TypeTag>> = (0..function.arity())
            .map(|i| {
                let mut order: Vec<TypeTag> = Vec::new();
                for tag in function.hints.tags(i) {
                    if !order.contains(tag) {
                        order.push(*tag);
                    }
                }
                if explore_unhinted || order.is_empty() {
                    for tag in TypeTag::ALL {
                        if !order.contains(&tag) {
                            order.push(tag);
                        }
                    }
                }
                order
            })
            .collect();
        Self {
            ranks: Some(vec![0; orders.len()]),
            orders,
        }
    }

    /// Fill `ranks[from..]` with the lexicographically smallest ranks summing to `total`.
    fn fill(&self, ranks: &mut [usize], from: usize, mut total: usize) -> bool {
        for i in (from..ranks.len()).rev() {
            let top = self.orders[i].len() - 1;
            ranks[i] = top.min(total);
            total -= ranks[i];
        }
        total == 0
    }

    /// Successor of `ranks`: same total rank if possible, else the next total.
    fn successor(&self, mut ranks: Vec<usize>) -> Option<Vec<usize>> {
        let n = ranks.len();
        let mut suffix = 0;
        for i in (0..n).rev() {
            if i + 1 < n {
                suffix += ranks[i + 1];
            }
            if suffix > 0 && ranks[i] + 1 < self.orders[i].len() {
                ranks[i] += 1;
                if self.fill(&mut ranks, i + 1, suffix - 1) {
                    return Some(ranks);
                }
            }
        }
        let total: usize = ranks.iter().sum::<usize>() + 1;
        self.fill(&mut ranks, 0, total).then_some(ranks)
    }

    fn next(&mut self) -> Option<Vec<TypeTag>> {
        let ranks = self.ranks.take()?;
        let tags = ranks
            .iter()
            .zip(&self.orders)
            .map(|(r, order)| order[*r])
            .collect();
        self.ranks = self.successor(ranks);
        Some(tags)
    }
}

/// The assignable place an expression denotes, if any.
fn place_of(expr: &Expr) -> Option<Target> {
    match &expr.kind {
        ExprKind::Name(n) => Some(Target::Name(n.clone())),
        ExprKind::Subscript { value, index } => Some(Target::Subscript {
            id: expr.id,
            base: Box::new(place_of(value)?),
            index: (**index).clone(),
        }),
        _ => None,
    }
}

/// Fold a term that cannot raise on any path reaching it.
fn settle(term: SymExpr) -> Result<SymExpr, Stop> {
    if !term.is_concrete() {
        return Ok(term);
    }
    term.eval(&[])
        .map(SymExpr::Const)
        .map_err(|_| Stop::Drop(Dropped::Unmodelled))
}

fn sequence(items: Vec<SymExpr>, tuple: bool) -> SymExpr {
    match items.iter().map(SymExpr::as_const).collect::<Option<Vec<_>>>() {
        Some(values) => {
            let values = values.into_iter().cloned().collect();
            SymExpr::Const(if tuple { Value::Tuple(values) } else { Value::List(values) })
        }
        None if tuple => SymExpr::Tuple(items),
        None => SymExpr::List(items),
    }
}

pub struct Engine<'a> {
    module: &'a AnalyzedModule,
    function: &'a CompiledFunction,
    solver: &'a Solver,
    tracker: &'a Tracker,
    config: &'a ExploreConfig,
    cancel: &'a AtomicBool,
    stack: Vec<PathState>,
    domains: DomainCursor,
    /// Decision edges of every path emitted so far.
    emitted_edges: BTreeSet<(NodeId, bool)>,
    next_seq: u64,
    stats: EngineStats,
}

impl<'a> Engine<'a> {
    pub fn new(
        module: &'a AnalyzedModule,
        function: &'a CompiledFunction,
        solver: &'a Solver,
        tracker: &'a Tracker,
        config: &'a ExploreConfig,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            module,
            function,
            solver,
            tracker,
            config,
            cancel,
            stack: Vec::new(),
            domains: DomainCursor::new(function, config.explore_unhinted_domains),
            emitted_edges: BTreeSet::new(),
            next_seq: 0,
            stats: EngineStats::default(),
        }
    }

    /// Explore until every path is done or `emit` returns false. The
    /// cancellation flag and the solver's wall-clock backstop end it early.
    pub fn run(&mut self, mut emit: impl FnMut(PathJob) -> bool) -> EngineStats {
        loop {
            if self.cancel.load(Ordering::Relaxed) || self.stats.deadline_reached {
                break;
            }
            let state = match self.stack.pop() {
                Some(state) => state,
                None => match self.domains.next() {
                    Some(domains) => PathState::entry(self.function, &self.module.globals, domains),
                    None => break,
                },
            };
            if let Some(job) = self.advance(state) {
                if !emit(job) {
                    break;
                }
            }
        }
        debug!(
            function = %self.function.name,
            emitted = self.stats.emitted,
            forks = self.stats.forks,
            duplicates = self.stats.duplicates,
            "exploration finished"
        );
        self.stats.clone()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    fn advance(&mut self, mut state: PathState) -> Option<PathJob> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let before = state.clone();
            let mut ctx = Ctx::new(std::mem::take(&mut state.script));
            let step = self.step(&mut state, &mut ctx);
            for script in ctx.forks.into_iter().rev() {
                let mut sibling = before.clone();
                sibling.script = script;
                self.stats.forks += 1;
                self.stack.push(sibling);
            }
            match step {
                Ok(Some(next)) => state.node = next,
                Ok(None) => return self.finish(state, Terminal::Return),
                Err(Stop::Raise(kind, site)) => {
                    return self.finish(state, Terminal::Raise { kind, site });
                }
                Err(Stop::Drop(reason)) => {
                    self.note_drop(reason);
                    return None;
                }
            }
        }
    }

    fn finish(&mut self, mut state: PathState, terminal: Terminal) -> Option<PathJob> {
        state.signature.terminate(terminal);
        if !self.tracker.admit_prediction(&state.signature) {
            self.stats.duplicates += 1;
            return None;
        }
        self.emitted_edges.extend(state.signature.branch_edges());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.emitted += 1;
        debug!(
            function = %self.function.name,
            seq,
            atoms = state.constraint.len(),
            signature = %state.signature,
            "path emitted"
        );
        Some(PathJob {
            seq,
            constraint: state.constraint,
            predicted: state.signature,
        })
    }

    fn note_drop(&mut self, reason: Dropped) {
        let counter = match reason {
            Dropped::Unanalyzable => &mut self.stats.unanalyzable,
            Dropped::Unmodelled => &mut self.stats.unmodelled,
            Dropped::StepLimit => &mut self.stats.step_limited,
            Dropped::DepthLimit => &mut self.stats.depth_limited,
            Dropped::LoopBound => &mut self.stats.loop_limited,
            Dropped::Infeasible => &mut self.stats.infeasible,
            Dropped::SolverBudget => &mut self.stats.solver_timeouts,
            Dropped::SolverError => &mut self.stats.solver_errors,
            Dropped::SolverDeadline => {
                self.stats.deadline_reached = true;
                return;
            }
            Dropped::Cancelled => return,
        };
        *counter += 1;
    }

    fn tick(&self, state: &mut PathState) -> Result<(), Stop> {
        state.steps += 1;
        if state.steps > self.config.max_path_steps {
            return Err(Stop::Drop(Dropped::StepLimit));
        }
        Ok(())
    }

    fn order(&self, plan: &Plan, mut outcomes: Vec<Outcome>) -> Vec<Outcome> {
        match plan {
            Plan::Edge { node, forced } => {
                outcomes.retain(|o| {
                    matches!(o, Outcome::Holds(b) if forced.map_or(true, |f| f == *b))
                });
                outcomes.sort_by_key(|o| {
                    let taken = *o == Outcome::Holds(true);
                    (self.emitted_edges.contains(&(*node, taken)), !taken)
                });
                outcomes
            }
            Plan::Cond => {
                outcomes.sort_by_key(|o| match o {
                    Outcome::Holds(true) => 0,
                    Outcome::Holds(false) => 1,
                    _ => 2,
                });
                outcomes
            }
            Plan::Eval => {
                outcomes.retain(|o| matches!(o, Outcome::Completes | Outcome::Raises(_)));
                outcomes
            }
            Plan::Select => {
                let (mut picks, misses): (Vec<Outcome>, Vec<Outcome>) = outcomes
                    .into_iter()
                    .filter(|o| matches!(o, Outcome::Selects(_) | Outcome::Raises(_)))
                    .partition(|o| matches!(o, Outcome::Selects(_)));
                picks.truncate(self.config.max_select_fanout.max(1));
                picks.extend(misses);
                picks
            }
        }
    }

    /// Pick (or replay) the outcome of `probe` on `term` for this path.
    fn choose(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        term: &SymExpr,
        probe: Probe,
        plan: Plan,
    ) -> Result<Outcome, Stop> {
        let choice = match ctx.replay() {
            Some(choice) => choice,
            None => {
                let opaque = term.has_opaque();
                let feasible = if opaque {
                    plan.blind()
                } else {
                    self.solver
                        .outcomes(&state.constraint, term, probe)
                        .map_err(|e| self.solver_stop(e))?
                };
                if feasible.is_empty() {
                    return Err(Stop::Drop(Dropped::Infeasible));
                }
                let atom = !opaque && feasible.len() > 1;
                let ordered = self.order(&plan, feasible);
                let Some((first, rest)) = ordered.split_first() else {
                    return Err(Stop::Drop(Dropped::LoopBound));
                };
                let forked = !rest.is_empty();
                for alternative in rest {
                    ctx.fork(Choice {
                        outcome: alternative.clone(),
                        atom,
                        forked,
                    });
                }
                ctx.record(Choice {
                    outcome: first.clone(),
                    atom,
                    forked,
                })
            }
        };
        if choice.atom {
            state
                .constraint
                .push(Atom::new(term.clone(), probe, choice.outcome.clone()));
        }
        if choice.forked {
            state.decisions += 1;
            if state.decisions > self.config.max_depth {
                return Err(Stop::Drop(Dropped::DepthLimit));
            }
        }
        Ok(choice.outcome)
    }

    fn solver_stop(&self, error: SolveError) -> Stop {
        match error {
            SolveError::Exhausted(_) => Stop::Drop(Dropped::SolverBudget),
            SolveError::Timeout(ms) => {
                warn!(
                    function = %self.function.name,
                    ms,
                    "solver deadline reached, stopping exploration"
                );
                Stop::Drop(Dropped::SolverDeadline)
            }
            SolveError::Cancelled => Stop::Drop(Dropped::Cancelled),
            SolveError::Solver(message) => {
                warn!(function = %self.function.name, %message, "solver failure while forking");
                Stop::Drop(Dropped::SolverError)
            }
        }
    }

    /// Result of a pure operation, forking on whether it raises.
    fn apply(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        term: SymExpr,
        site: RaiseSite,
    ) -> Result<SymExpr, Stop> {
        if term.is_concrete() {
            return match term.eval(&[]) {
                Ok(v) => Ok(SymExpr::Const(v)),
                Err(OpError::Raised(e)) => Err(Stop::Raise(e.kind, site)),
                Err(OpError::Fault(_)) => unmodelled(),
            };
        }
        if term.has_opaque() {
            return Ok(state.fresh_opaque());
        }
        match self.choose(state, ctx, &term, Probe::Evaluates, Plan::Eval)? {
            Outcome::Raises(kind) => Err(Stop::Raise(kind, site)),
            _ => Ok(term),
        }
    }

    fn truth(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        value: &SymExpr,
    ) -> Result<bool, Stop> {
        if let Some(v) = value.as_const() {
            return Ok(v.is_truthy());
        }
        match self.choose(state, ctx, value, Probe::Truthy, Plan::Cond)? {
            Outcome::Holds(b) => Ok(b),
            _ => unmodelled(),
        }
    }

    fn step(&mut self, state: &mut PathState, ctx: &mut Ctx) -> Result<Option<NodeId>, Stop> {
        self.tick(state)?;
        let node = state.node;
        let function = self.function;
        let Some(current) = function.graph.node(node) else {
            return unmodelled();
        };
        match current {
            FlowNode::Start { next } | FlowNode::Join { next } => Ok(Some(*next)),
            FlowNode::End => Ok(None),
            FlowNode::Stmt { stmt, next } => {
                self.exec(state, ctx, stmt, node)?;
                Ok(Some(*next))
            }
            FlowNode::Branch {
                cond,
                on_true,
                on_false,
                guard,
            } => {
                let value = self.eval(state, ctx, cond)?;
                let taken = self.branch(state, ctx, node, &value, *on_true, guard.as_ref())?;
                state.signature.push(SigEntry::Branch { node, taken });
                Ok(Some(if taken { *on_true } else { *on_false }))
            }
            FlowNode::ForInit { iter, slot, next } => {
                let value = self.eval(state, ctx, iter)?;
                let progress = self.start_iteration(state, ctx, value, iter.id)?;
                state.iters.insert(*slot, progress);
                Ok(Some(*next))
            }
            FlowNode::ForNext {
                slot,
                target,
                body,
                exit,
                bound,
            } => {
                let item = self.next_item(state, ctx, node, *slot, *bound)?;
                state.signature.push(SigEntry::Branch {
                    node,
                    taken: item.is_some(),
                });
                match item {
                    Some(value) => {
                        self.assign(state, ctx, target, value, node)?;
                        Ok(Some(*body))
                    }
                    None => Ok(Some(*exit)),
                }
            }
            FlowNode::Return { value } => {
                if let Some(e) = value {
                    self.eval(state, ctx, e)?;
                }
                Ok(None)
            }
            FlowNode::Raise(spec) => Err(self.raise_statement(state, ctx, spec, node)),
            FlowNode::Unanalyzable { .. } => Err(Stop::Drop(Dropped::Unanalyzable)),
        }
    }

    fn branch(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        node: NodeId,
        value: &SymExpr,
        on_true: NodeId,
        guard: Option<&LoopGuard>,
    ) -> Result<bool, Stop> {
        if let Some(v) = value.as_const() {
            return Ok(v.is_truthy());
        }
        let forced = guard.and_then(|g| {
            let count = state.loop_counts.get(&node).copied().unwrap_or(0);
            (count >= g.bound).then_some(on_true == g.exit)
        });
        let plan = Plan::Edge { node, forced };
        let Outcome::Holds(taken) = self.choose(state, ctx, value, Probe::Truthy, plan)? else {
            return unmodelled();
        };
        if let Some(g) = guard {
            if taken != (on_true == g.exit) {
                *state.loop_counts.entry(node).or_insert(0) += 1;
            }
        }
        Ok(taken)
    }

    fn start_iteration(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        value: SymExpr,
        iter: ExprId,
    ) -> Result<IterState, Stop> {
        let site = RaiseSite::Expr(iter);
        match &value {
            SymExpr::Const(v) => match ops::iterate(v) {
                Ok(items) => Ok(IterState::Known(items.into_iter().map(SymExpr::Const).collect())),
                Err(OpError::Raised(e)) => Err(Stop::Raise(e.kind, site)),
                Err(OpError::Fault(_)) => unmodelled(),
            },
            SymExpr::List(items) | SymExpr::Tuple(items) => {
                Ok(IterState::Known(items.iter().cloned().collect()))
            }
            _ => {
                if !value.has_opaque() {
                    let outcome = self.choose(state, ctx, &value, Probe::Iterates, Plan::Eval)?;
                    if let Outcome::Raises(kind) = outcome {
                        return Err(Stop::Raise(kind, site));
                    }
                }
                Ok(IterState::Symbolic { seq: value, pos: 0 })
            }
        }
    }

    fn next_item(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        node: NodeId,
        slot: u32,
        bound: u32,
    ) -> Result<Option<SymExpr>, Stop> {
        let (seq, pos) = match state.iters.get_mut(&slot) {
            None => return unmodelled(),
            Some(IterState::Known(items)) => return Ok(items.pop_front()),
            Some(IterState::Symbolic { seq, pos }) => (seq.clone(), *pos),
        };
        let forced = (pos >= bound as usize).then_some(false);
        let plan = Plan::Edge { node, forced };
        let outcome = self.choose(state, ctx, &seq, Probe::HasItem(pos), plan)?;
        match outcome {
            Outcome::Holds(true) => {
                if let Some(IterState::Symbolic { pos: p, .. }) = state.iters.get_mut(&slot) {
                    *p += 1;
                }
                Ok(Some(if seq.has_opaque() {
                    state.fresh_opaque()
                } else {
                    SymExpr::Item(seq.boxed(), pos)
                }))
            }
            Outcome::Holds(false) => Ok(None),
            _ => unmodelled(),
        }
    }

    fn raise_statement(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        spec: &RaiseSpec,
        node: NodeId,
    ) -> Stop {
        let site = RaiseSite::Node(node);
        match spec {
            RaiseSpec::Expr(e) => {
                let Some(class) = raised_class(e) else {
                    return Stop::Drop(Dropped::Unmodelled);
                };
                let Some(kind) = ErrorKind::from_class_name(class) else {
                    if self.function.is_local(class)
                        || state.globals.contains_key(class)
                        || self.module.opaque_names.contains(class)
                    {
                        return Stop::Drop(Dropped::Unmodelled);
                    }
                    return Stop::Raise(ErrorKind::NameError, site);
                };
                if let ExprKind::Call { args, .. } = &e.kind {
                    if let Err(stop) = self.eval_all(state, ctx, args) {
                        return stop;
                    }
                }
                Stop::Raise(kind, site)
            }
            RaiseSpec::Reraise => Stop::Raise(ErrorKind::RuntimeError, site),
            RaiseSpec::Assertion(msg) => {
                if let Some(m) = msg {
                    if let Err(stop) = self.eval(state, ctx, m) {
                        return stop;
                    }
                }
                Stop::Raise(ErrorKind::AssertionError, site)
            }
        }
    }

    fn exec(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        stmt: &Stmt,
        node: NodeId,
    ) -> Result<(), Stop> {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let v = self.eval(state, ctx, value)?;
                for t in targets {
                    self.assign(state, ctx, t, v.clone(), node)?;
                }
                Ok(())
            }
            StmtKind::Expr(e) => self.eval(state, ctx, e).map(|_| ()),
            StmtKind::Del(targets) => {
                for t in targets {
                    self.delete(state, ctx, t, node)?;
                }
                Ok(())
            }
            StmtKind::Global(_) | StmtKind::Pass => Ok(()),
            _ => unmodelled(),
        }
    }

    fn bind(&self, state: &mut PathState, name: &str, value: SymExpr) {
        if self.function.declared_globals.contains(name) {
            state.globals.insert(name.to_string(), value);
        } else {
            state.locals.insert(name.to_string(), value);
        }
    }

    fn assign(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        target: &Target,
        value: SymExpr,
        node: NodeId,
    ) -> Result<(), Stop> {
        let site = RaiseSite::Node(node);
        match target {
            Target::Name(n) => {
                self.bind(state, n, value);
                Ok(())
            }
            Target::Tuple(items) => {
                let parts = self.unpack(state, ctx, value, items.len(), site)?;
                for (t, v) in items.iter().zip(parts) {
                    self.assign(state, ctx, t, v, node)?;
                }
                Ok(())
            }
            Target::Subscript { .. } => {
                let (root, keys) = self.place(state, ctx, target)?;
                let Some((last, path)) = keys.split_last() else {
                    return unmodelled();
                };
                let chain = self.descend(state, ctx, &root, path, site)?;
                let leaf = chain.last().cloned().unwrap_or(SymExpr::Const(Value::None));
                let updated = self.apply(
                    state,
                    ctx,
                    SymExpr::SetItem(leaf.boxed(), last.clone().boxed(), value.boxed()),
                    site,
                )?;
                self.write_back(state, &root, path, &chain, updated)
            }
        }
    }

    fn delete(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        target: &Target,
        node: NodeId,
    ) -> Result<(), Stop> {
        let site = RaiseSite::Node(node);
        match target {
            Target::Name(n) => {
                let removed = if self.function.is_local(n) {
                    state.locals.remove(n)
                } else {
                    state.globals.remove(n)
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(Stop::Raise(ErrorKind::NameError, site)),
                }
            }
            Target::Tuple(items) => {
                for t in items {
                    self.delete(state, ctx, t, node)?;
                }
                Ok(())
            }
            Target::Subscript { .. } => {
                let (root, keys) = self.place(state, ctx, target)?;
                let Some((last, path)) = keys.split_last() else {
                    return unmodelled();
                };
                let chain = self.descend(state, ctx, &root, path, site)?;
                let leaf = chain.last().cloned().unwrap_or(SymExpr::Const(Value::None));
                let term = SymExpr::DelItem(leaf.boxed(), last.clone().boxed());
                let updated = self.apply(state, ctx, term, site)?;
                self.write_back(state, &root, path, &chain, updated)
            }
        }
    }

    /// Split `value` into exactly `n` parts for a tuple target.
    fn unpack(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        value: SymExpr,
        n: usize,
        site: RaiseSite,
    ) -> Result<Vec<SymExpr>, Stop> {
        match &value {
            SymExpr::Const(v) => {
                let items = ops::iterate(v).map_err(|_| Stop::Raise(ErrorKind::TypeError, site))?;
                if items.len() != n {
                    return Err(Stop::Raise(ErrorKind::ValueError, site));
                }
                Ok(items.into_iter().map(SymExpr::Const).collect())
            }
            SymExpr::List(items) | SymExpr::Tuple(items) => {
                if items.len() != n {
                    return Err(Stop::Raise(ErrorKind::ValueError, site));
                }
                Ok(items.clone())
            }
            _ if value.has_opaque() => Ok((0..n).map(|_| state.fresh_opaque()).collect()),
            _ => {
                let fits = SymExpr::Compare(
                    CmpOp::Eq,
                    SymExpr::Call("len".to_string(), vec![value.clone()]).boxed(),
                    SymExpr::Const(Value::int(n as i64)).boxed(),
                );
                match self.choose(state, ctx, &fits, Probe::Truthy, Plan::Cond)? {
                    Outcome::Holds(true) => {
                        Ok((0..n).map(|i| SymExpr::Item(value.clone().boxed(), i)).collect())
                    }
                    Outcome::Holds(false) => Err(Stop::Raise(ErrorKind::ValueError, site)),
                    _ => Err(Stop::Raise(ErrorKind::TypeError, site)),
                }
            }
        }
    }

    /// Root variable and key terms of a subscript place.
    fn place(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        target: &Target,
    ) -> Result<(String, Vec<SymExpr>), Stop> {
        match target {
            Target::Name(n) => Ok((n.clone(), Vec::new())),
            Target::Subscript { base, index, .. } => {
                let (root, mut keys) = self.place(state, ctx, base)?;
                keys.push(self.eval(state, ctx, index)?);
                Ok((root, keys))
            }
            Target::Tuple(_) => unmodelled(),
        }
    }

    /// The value of a variable about to be updated in place.
    fn variable(&self, state: &PathState, name: &str, site: RaiseSite) -> Result<SymExpr, Stop> {
        if self.function.is_local(name) {
            return state.locals.get(name).cloned().ok_or_else(|| unbound_local(site));
        }
        if self.module.opaque_names.contains(name) {
            return unmodelled();
        }
        state
            .globals
            .get(name)
            .cloned()
            .ok_or(Stop::Raise(ErrorKind::NameError, site))
    }

    /// Values along a place: the root variable, then each selected entry.
    fn descend(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        root: &str,
        keys: &[SymExpr],
        site: RaiseSite,
    ) -> Result<Vec<SymExpr>, Stop> {
        let mut chain = vec![self.variable(state, root, site)?];
        for key in keys {
            let current = chain[chain.len() - 1].clone();
            let term = SymExpr::Subscript(current.boxed(), key.clone().boxed());
            let entry = self.apply(state, ctx, term, site)?;
            chain.push(entry);
        }
        Ok(chain)
    }

    /// Store an updated entry back through the containers it was reached by.
    fn write_back(
        &mut self,
        state: &mut PathState,
        root: &str,
        keys: &[SymExpr],
        chain: &[SymExpr],
        updated: SymExpr,
    ) -> Result<(), Stop> {
        let mut value = updated;
        for (container, key) in chain.iter().zip(keys).rev() {
            value = settle(SymExpr::Replace(
                container.clone().boxed(),
                key.clone().boxed(),
                value.boxed(),
            ))?;
        }
        if self.function.is_local(root) {
            state.locals.insert(root.to_string(), value);
        } else {
            state.globals.insert(root.to_string(), value);
        }
        Ok(())
    }

    fn load(&self, state: &PathState, name: &str, site: RaiseSite) -> Result<SymExpr, Stop> {
        if self.function.is_local(name) {
            return state.locals.get(name).cloned().ok_or_else(|| unbound_local(site));
        }
        if let Some(v) = state.globals.get(name) {
            return Ok(v.clone());
        }
        if self.module.opaque_names.contains(name)
            || builtins::is_builtin(name)
            || self.module.function(name).is_some()
            || ErrorKind::from_class_name(name).is_some()
        {
            return unmodelled();
        }
        Err(Stop::Raise(ErrorKind::NameError, site))
    }

    fn eval_all(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        exprs: &[Expr],
    ) -> Result<Vec<SymExpr>, Stop> {
        exprs.iter().map(|e| self.eval(state, ctx, e)).collect()
    }

    fn eval_opt(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        expr: &Option<Box<Expr>>,
    ) -> Result<Option<Box<SymExpr>>, Stop> {
        match expr {
            Some(e) => Ok(Some(self.eval(state, ctx, e)?.boxed())),
            None => Ok(None),
        }
    }

    fn eval(&mut self, state: &mut PathState, ctx: &mut Ctx, e: &Expr) -> Result<SymExpr, Stop> {
        self.tick(state)?;
        let site = RaiseSite::Expr(e.id);
        match &e.kind {
            ExprKind::Literal(v) => Ok(SymExpr::Const(v.clone())),
            ExprKind::Name(n) => self.load(state, n, site),
            ExprKind::List(items) => Ok(sequence(self.eval_all(state, ctx, items)?, false)),
            ExprKind::Tuple(items) => Ok(sequence(self.eval_all(state, ctx, items)?, true)),
            ExprKind::Dict(pairs) => {
                let mut terms = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(state, ctx, k)?;
                    let value = self.eval(state, ctx, v)?;
                    terms.push((key, value));
                }
                self.apply(state, ctx, SymExpr::Dict(terms), site)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(state, ctx, operand)?;
                self.apply(state, ctx, SymExpr::Unary(*op, v.boxed()), site)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(state, ctx, left)?;
                let r = self.eval(state, ctx, right)?;
                self.apply(state, ctx, SymExpr::Binary(*op, l.boxed(), r.boxed()), site)
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.eval(state, ctx, left)?;
                let r = self.eval(state, ctx, right)?;
                self.apply(state, ctx, SymExpr::Compare(*op, l.boxed(), r.boxed()), site)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(state, ctx, left)?;
                match (op, self.truth(state, ctx, &l)?) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(state, ctx, right),
                }
            }
            ExprKind::IfElse { test, body, orelse } => {
                let t = self.eval(state, ctx, test)?;
                if self.truth(state, ctx, &t)? {
                    self.eval(state, ctx, body)
                } else {
                    self.eval(state, ctx, orelse)
                }
            }
            ExprKind::Call { func, args } => self.call(state, ctx, e, func, args),
            ExprKind::Attribute { value, attr } => {
                let v = self.eval(state, ctx, value)?;
                self.apply(state, ctx, SymExpr::Attr(v.boxed(), attr.clone()), site)
            }
            ExprKind::Subscript { value, index } => {
                let base = self.eval(state, ctx, value)?;
                let key = self.eval(state, ctx, index)?;
                self.subscript(state, ctx, e.id, base, key)
            }
            ExprKind::Slice { value, lower, upper } => {
                let base = self.eval(state, ctx, value)?;
                let lo = self.eval_opt(state, ctx, lower)?;
                let hi = self.eval_opt(state, ctx, upper)?;
                self.apply(state, ctx, SymExpr::Slice(base.boxed(), lo, hi), site)
            }
            ExprKind::Unsupported(_) => Err(Stop::Drop(Dropped::Unanalyzable)),
        }
    }

    /// `base[key]`. Lookups in a concrete container fork per selected entry
    /// and record the selection.
    fn subscript(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        id: ExprId,
        base: SymExpr,
        key: SymExpr,
    ) -> Result<SymExpr, Stop> {
        let site = RaiseSite::Expr(id);
        let container = base
            .as_const()
            .filter(|b| matches!(b, Value::Dict(_) | Value::List(_) | Value::Tuple(_)))
            .cloned();
        let Some(container) = container else {
            return self.apply(state, ctx, SymExpr::Subscript(base.boxed(), key.boxed()), site);
        };
        if key.has_opaque() {
            return Ok(state.fresh_opaque());
        }
        let index = match key.as_const() {
            Some(k) => match ops::select_index(&container, k) {
                Ok(i) => i,
                Err(OpError::Raised(e)) => return Err(Stop::Raise(e.kind, site)),
                Err(OpError::Fault(_)) => return unmodelled(),
            },
            None => {
                let lookup =
                    SymExpr::Subscript(SymExpr::Const(container.clone()).boxed(), key.boxed());
                match self.choose(state, ctx, &lookup, Probe::Select, Plan::Select)? {
                    Outcome::Selects(i) => i,
                    Outcome::Raises(kind) => return Err(Stop::Raise(kind, site)),
                    _ => return unmodelled(),
                }
            }
        };
        state.signature.push(SigEntry::Select { site: id, index });
        match ops::entry_at(&container, index) {
            Some(v) => Ok(SymExpr::Const(v)),
            None => unmodelled(),
        }
    }

    fn call(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        call: &Expr,
        func: &Expr,
        args: &[Expr],
    ) -> Result<SymExpr, Stop> {
        let site = RaiseSite::Expr(call.id);
        match &func.kind {
            ExprKind::Name(name) => self.call_named(state, ctx, name, args, site),
            ExprKind::Attribute { value, attr } => {
                self.call_method(state, ctx, value, attr, args, site)
            }
            _ => unmodelled(),
        }
    }

    fn call_named(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        name: &str,
        args: &[Expr],
        site: RaiseSite,
    ) -> Result<SymExpr, Stop> {
        if self.function.is_local(name)
            || state.globals.contains_key(name)
            || self.module.opaque_names.contains(name)
        {
            return unmodelled();
        }
        if name == "isinstance" {
            let [subject, types] = args else {
                return Err(Stop::Raise(ErrorKind::TypeError, site));
            };
            let Some(names) = types.type_names() else {
                return unmodelled();
            };
            let v = self.eval(state, ctx, subject)?;
            return self.apply(state, ctx, SymExpr::InstanceOf(v.boxed(), names), site);
        }
        let values = self.eval_all(state, ctx, args)?;
        // Other user functions and impure built-ins produce fresh opaque values.
        if self.module.function(name).is_some() {
            return Ok(state.fresh_opaque());
        }
        if builtins::is_impure(name) {
            if values.len() != 1 {
                return Err(Stop::Raise(ErrorKind::TypeError, site));
            }
            return Ok(state.fresh_opaque());
        }
        if builtins::is_builtin(name) {
            return self.apply(state, ctx, SymExpr::Call(name.to_string(), values), site);
        }
        if ErrorKind::from_class_name(name).is_some() {
            return unmodelled();
        }
        Err(Stop::Raise(ErrorKind::NameError, site))
    }

    fn call_method(
        &mut self,
        state: &mut PathState,
        ctx: &mut Ctx,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        site: RaiseSite,
    ) -> Result<SymExpr, Stop> {
        let mutating = builtins::is_mutating(method);
        if mutating {
            if let Some(target) = place_of(receiver) {
                let receiver_site = RaiseSite::Expr(receiver.id);
                let (root, keys) = self.place(state, ctx, &target)?;
                let values = self.eval_all(state, ctx, args)?;
                let chain = self.descend(state, ctx, &root, &keys, receiver_site)?;
                let current = chain.last().cloned().unwrap_or(SymExpr::Const(Value::None));
                let result = self.apply(
                    state,
                    ctx,
                    SymExpr::Mutate {
                        receiver: current.clone().boxed(),
                        method: method.to_string(),
                        args: values.clone(),
                        result: true,
                    },
                    site,
                )?;
                let updated = settle(SymExpr::Mutate {
                    receiver: current.boxed(),
                    method: method.to_string(),
                    args: values,
                    result: false,
                })?;
                self.write_back(state, &root, &keys, &chain, updated)?;
                return Ok(result);
            }
        }
        let recv = self.eval(state, ctx, receiver)?.boxed();
        let args = self.eval_all(state, ctx, args)?;
        let method = method.to_string();
        let term = if mutating {
            SymExpr::Mutate {
                receiver: recv,
                method,
                args,
                result: true,
            }
        } else {
            SymExpr::Method {
                receiver: recv,
                method,
                args,
            }
        };
        self.apply(state, ctx, term, site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverConfig;
    use verity_compiler::analyze;

    fn explore(source: &str, name: &str, config: &ExploreConfig) -> (Vec<PathJob>, EngineStats) {
        let module = analyze(source);
        let function = module.function(name).unwrap();
        let solver = Solver::for_function(function, &SolverConfig::default(), config.seed);
        let tracker = Tracker::new(&function.graph, config.max_paths, config.novelty_patience);
        let cancel = AtomicBool::new(false);
        let mut engine = Engine::new(&module, function, &solver, &tracker, config, &cancel);
        let mut jobs = Vec::new();
        let stats = engine.run(|job| {
            jobs.push(job);
            true
        });
        (jobs, stats)
    }

    const LOOKUP: &str = "\
PRIMARY = {'en': 'hello', 'fr': None}
FALLBACK = {'de': 'hallo'}

def greet(lang):
    if lang in PRIMARY:
        return PRIMARY[lang]
    return FALLBACK[lang]
";

    #[test]
    fn test_lookup_forks_per_entry_and_miss() {
        let config = ExploreConfig {
            explore_unhinted_domains: false,
            ..ExploreConfig::default()
        };
        let (jobs, _) = explore(LOOKUP, "greet", &config);
        let raises: Vec<_> = jobs.iter().filter_map(|j| j.predicted.raised()).collect();
        assert_eq!(raises, vec![&ErrorKind::KeyError]);
        let selects = jobs
            .iter()
            .filter(|j| j.predicted.entries.iter().any(|e| matches!(e, SigEntry::Select { .. })))
            .count();
        // 'en', 'fr' and 'de'.
        assert_eq!(selects, 3);
        for job in &jobs {
            assert_eq!(
                job.predicted.entries[0],
                SigEntry::Domain {
                    param: 0,
                    tag: TypeTag::Text
                }
            );
        }
    }

    #[test]
    fn test_unhinted_domains_are_explored_after_hinted_ones() {
        let (jobs, _) = explore(LOOKUP, "greet", &ExploreConfig::default());
        assert_eq!(
            jobs[0].predicted.entries[0],
            SigEntry::Domain {
                param: 0,
                tag: TypeTag::Text
            }
        );
        // Unhashable containers raise from the membership test.
        assert!(jobs.iter().any(|j| {
            j.predicted.entries[0]
                == SigEntry::Domain {
                    param: 0,
                    tag: TypeTag::Container,
                }
                && j.predicted.raised() == Some(&ErrorKind::TypeError)
        }));
    }

    #[test]
    fn test_domain_combinations_interleave_parameters() {
        let module = analyze("def f(a, b, c):\n    return a\n");
        let mut cursor = DomainCursor::new(module.function("f").unwrap(), true);
        let orders = cursor.orders.clone();
        let mut seen = Vec::new();
        while let Some(tags) = cursor.next() {
            seen.push(tags);
        }
        assert_eq!(seen.len(), orders.iter().map(Vec::len).product::<usize>());
        assert_eq!(seen.iter().collect::<BTreeSet<_>>().len(), seen.len());
        assert_eq!(seen[0], vec![orders[0][0], orders[1][0], orders[2][0]]);
        // Each parameter reaches its second tag within the first four combinations.
        for p in 0..3 {
            assert!(seen[..4].iter().any(|tags| tags[p] == orders[p][1]));
        }
    }

    #[test]
    fn test_symbolic_loops_respect_their_bound() {
        let source = "\
def total(xs):
    t = 0
    for x in xs:
        t = t + x
    return t
";
        let config = ExploreConfig {
            explore_unhinted_domains: false,
            ..ExploreConfig::default()
        };
        let (jobs, _) = explore(source, "total", &config);
        assert!(!jobs.is_empty());
        let module = analyze(source);
        let bound = module.function("total").unwrap().loop_bounds[0].bound as usize;
        for job in &jobs {
            let taken = job
                .predicted
                .entries
                .iter()
                .filter(|e| matches!(e, SigEntry::Branch { taken: true, .. }))
                .count();
            assert!(taken <= bound);
        }
    }

    #[test]
    fn test_predicted_signatures_are_unique() {
        let (jobs, _) = explore(LOOKUP, "greet", &ExploreConfig::default());
        let mut seen = std::collections::HashSet::new();
        for job in &jobs {
            assert!(seen.insert(job.predicted.clone()));
        }
        let seqs: Vec<u64> = jobs.iter().map(|j| j.seq).collect();
        assert_eq!(seqs, (0..jobs.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_impure_calls_are_opaque() {
        let source = "\
def tag(x):
    if id(x) > 0:
        return 1
    return 2
";
        let config = ExploreConfig {
            explore_unhinted_domains: false,
            ..ExploreConfig::default()
        };
        let (jobs, _) = explore(source, "tag", &config);
        // Both outcomes of the opaque comparison are explored without constraining x.
        assert!(jobs.len() >= 2);
        assert!(jobs.iter().all(|j| j.constraint.is_empty()));
    }
}
