//! Parallel solving and concrete confirmation of explored paths.
//!
//! The explorer thread emits terminated paths into a bounded job channel.
//! Worker threads solve each path's constraint and run the solutions in their
//! own sandbox instance. The committer receives results out of order, buffers
//! them, and commits strictly in exploration order, so the kept cases and the
//! stop decision depend only on the committed prefix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use verity_compiler::signature::{PathSignature, RaiseSite};
use verity_compiler::AnalyzedModule;
use verity_model::Value;
use verity_sandbox::{
    Budget, Execution, RunOutcome, Sandbox, SandboxConfig, SandboxError, SandboxInstance,
};

use super::engine::{Engine, EngineStats};
use super::state::PathJob;
use super::tracker::{StopReason, Tracker};
use crate::solver::{SolveError, Solver, SolverConfig};

/// How long the committer waits for a result before rechecking the wall clock.
const COMMIT_POLL_MS: u64 = 50;

/// Configuration for exploring one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploreConfig {
    /// Maximum number of paths committed before stopping.
    pub max_paths: usize,
    /// Maximum number of forking decisions along one path.
    pub max_depth: usize,
    /// Consecutive committed paths without a new case before stopping (0 disables).
    pub novelty_patience: usize,
    /// Number of solver/runner worker threads.
    pub workers: usize,
    /// Capacity of the job channel between the explorer and the workers.
    pub queue_capacity: usize,
    /// Solutions tried per path when the first does not realize the prediction.
    pub max_solutions_per_path: usize,
    /// Seed for candidate ordering.
    pub seed: u64,
    /// Whether to explore type domains the hints do not mention.
    pub explore_unhinted_domains: bool,
    /// Maximum container entries forked per symbolic lookup.
    pub max_select_fanout: usize,
    /// Maximum flow nodes plus evaluated expressions per path.
    pub max_path_steps: usize,
    /// Wall-clock budget for the whole function in milliseconds (0 disables).
    pub max_wall_ms: u64,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            max_paths: 256,
            max_depth: 64,
            novelty_patience: 32,
            workers: 4,
            queue_capacity: 16,
            max_solutions_per_path: 3,
            seed: 42,
            explore_unhinted_domains: true,
            max_select_fanout: 8,
            max_path_steps: 2_000,
            max_wall_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExploreError {
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },
}

/// A concrete execution kept because it reached something new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedCase {
    pub args: Vec<Value>,
    pub outcome: RunOutcome,
    /// The path the symbolic executor predicted for these arguments.
    pub predicted: PathSignature,
    /// The path the concrete run actually took.
    pub concrete: PathSignature,
    pub realized: bool,
    /// Whether the arguments came from the boundary sweep.
    pub boundary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStats {
    pub committed: u64,
    /// Paths whose constraint turned out unsatisfiable after all.
    pub infeasible: u64,
    /// Paths whose query ran out of SAT calls.
    pub solver_timeouts: u64,
    pub solver_errors: u64,
    pub runs: u64,
    /// Runs that ran out of fuel.
    pub run_timeouts: u64,
    pub run_faults: u64,
    /// Paths where no solution took the predicted path.
    pub unrealized: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationReport {
    pub function: String,
    pub cases: Vec<ConfirmedCase>,
    pub engine: EngineStats,
    pub runner: RunnerStats,
    pub stop: StopReason,
    pub covered_edges: usize,
    pub total_edges: usize,
    pub coverage: f64,
    pub error_sites_hit: Vec<RaiseSite>,
}

struct Run {
    args: Vec<Value>,
    execution: Execution,
    realized: bool,
    boundary: bool,
}

enum JobStatus {
    Solved,
    Infeasible,
    SolverBudget,
    SolverError(String),
    /// A wall-clock backstop fired while solving or running this path.
    Deadline,
    Cancelled,
}

struct PathResult {
    seq: u64,
    predicted: PathSignature,
    status: JobStatus,
    runs: Vec<Run>,
    run_timeouts: u64,
    run_faults: u64,
}

/// Explore function `name` of `module` and return every confirmed case.
pub fn explore_function(
    module: Arc<AnalyzedModule>,
    name: &str,
    config: &ExploreConfig,
    solver_config: &SolverConfig,
    sandbox_config: &SandboxConfig,
) -> Result<ExplorationReport, ExploreError> {
    let function = module
        .function(name)
        .ok_or_else(|| ExploreError::UnknownFunction {
            name: name.to_string(),
        })?;
    let started = Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    let solver =
        Solver::for_function(function, solver_config, config.seed).with_cancel(Arc::clone(&cancel));
    let tracker = Tracker::new(&function.graph, config.max_paths, config.novelty_patience);
    let sandbox = Sandbox::new(sandbox_config, Arc::clone(&module));
    let deadline =
        (config.max_wall_ms > 0).then(|| started + Duration::from_millis(config.max_wall_ms));

    let (job_tx, job_rx) = channel::bounded::<PathJob>(config.queue_capacity.max(1));
    let (result_tx, result_rx) = channel::unbounded::<PathResult>();

    let mut committer = Committer::new(&tracker);
    let engine_stats = thread::scope(|s| {
        for _ in 0..config.workers.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let (solver, sandbox, cancel) = (&solver, &sandbox, &cancel);
            s.spawn(move || {
                let mut instance = sandbox.instantiate();
                for job in jobs.iter() {
                    if cancel.load(Ordering::Relaxed) {
                        continue;
                    }
                    let result = process(job, name, solver, &mut instance, config);
                    if results.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        let explorer = {
            let (module, solver, tracker, cancel) = (&*module, &solver, &tracker, &*cancel);
            s.spawn(move || {
                let mut engine = Engine::new(module, function, solver, tracker, config, cancel);
                engine.run(|job| !cancel.load(Ordering::Relaxed) && job_tx.send(job).is_ok())
            })
        };

        loop {
            match result_rx.recv_timeout(Duration::from_millis(COMMIT_POLL_MS)) {
                Ok(result) => committer.receive(result),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if committer.stop.is_none() && deadline.is_some_and(|d| Instant::now() >= d) {
                committer.stop = Some(StopReason::WallTime);
            }
            if committer.stop.is_some() {
                cancel.store(true, Ordering::SeqCst);
            }
        }
        explorer.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    });

    let stop = match committer.stop {
        Some(reason) => reason,
        None if engine_stats.deadline_reached => StopReason::WallTime,
        None => StopReason::Exhausted,
    };
    let report = ExplorationReport {
        function: name.to_string(),
        cases: committer.cases,
        engine: engine_stats,
        runner: committer.stats,
        stop,
        covered_edges: tracker.covered_edges(),
        total_edges: tracker.total_edges(),
        coverage: tracker.coverage(),
        error_sites_hit: tracker.error_sites_hit(),
    };
    info!(
        function = name,
        cases = report.cases.len(),
        committed = report.runner.committed,
        coverage = report.coverage,
        stop = ?report.stop,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "function explored"
    );
    Ok(report)
}

fn process(
    job: PathJob,
    name: &str,
    solver: &Solver,
    instance: &mut SandboxInstance,
    config: &ExploreConfig,
) -> PathResult {
    let mut result = PathResult {
        seq: job.seq,
        predicted: job.predicted,
        status: JobStatus::Solved,
        runs: Vec::new(),
        run_timeouts: 0,
        run_faults: 0,
    };
    let solution = match solver.solve(&job.constraint, config.max_solutions_per_path.max(1)) {
        Ok(Some(solution)) => solution,
        Ok(None) => {
            result.status = JobStatus::Infeasible;
            return result;
        }
        Err(SolveError::Exhausted(_)) => {
            result.status = JobStatus::SolverBudget;
            return result;
        }
        Err(SolveError::Timeout(_)) => {
            result.status = JobStatus::Deadline;
            return result;
        }
        Err(SolveError::Cancelled) => {
            result.status = JobStatus::Cancelled;
            return result;
        }
        Err(SolveError::Solver(message)) => {
            result.status = JobStatus::SolverError(message);
            return result;
        }
    };

    let mut first: Option<Run> = None;
    for args in std::iter::once(solution.primary).chain(solution.alternatives) {
        let Some(run) = execute(instance, name, args, false, &mut result) else {
            if matches!(result.status, JobStatus::Deadline) {
                return result;
            }
            continue;
        };
        if run.realized {
            first = Some(run);
            break;
        }
        if first.is_none() {
            first = Some(run);
        }
    }
    result.runs.extend(first);
    for args in solution.boundary {
        match execute(instance, name, args, true, &mut result) {
            Some(run) => result.runs.push(run),
            None if matches!(result.status, JobStatus::Deadline) => break,
            None => {}
        }
    }
    result
}

/// Run one argument vector; failed runs only bump the result's counters.
fn execute(
    instance: &mut SandboxInstance,
    name: &str,
    args: Vec<Value>,
    boundary: bool,
    result: &mut PathResult,
) -> Option<Run> {
    match instance.call(name, &args) {
        Ok(execution) => Some(Run {
            realized: result.predicted.is_realized_by(&execution.signature),
            args,
            execution,
            boundary,
        }),
        Err(SandboxError::Timeout(Budget::Fuel)) => {
            debug!(function = name, "run exhausted its fuel");
            result.run_timeouts += 1;
            None
        }
        Err(SandboxError::Timeout(Budget::WallClock)) => {
            warn!(function = name, "run hit the wall-clock backstop");
            result.status = JobStatus::Deadline;
            None
        }
        Err(e) => {
            warn!(function = name, error = %e, "run failed");
            result.run_faults += 1;
            None
        }
    }
}

/// Commits results in exploration order.
struct Committer<'t> {
    tracker: &'t Tracker,
    pending: BTreeMap<u64, PathResult>,
    next: u64,
    cases: Vec<ConfirmedCase>,
    stats: RunnerStats,
    stop: Option<StopReason>,
}

impl<'t> Committer<'t> {
    fn new(tracker: &'t Tracker) -> Self {
        Self {
            tracker,
            pending: BTreeMap::new(),
            next: 0,
            cases: Vec::new(),
            stats: RunnerStats::default(),
            stop: None,
        }
    }

    fn receive(&mut self, result: PathResult) {
        self.pending.insert(result.seq, result);
        while self.stop.is_none() {
            let Some(result) = self.pending.remove(&self.next) else {
                break;
            };
            self.next += 1;
            self.commit(result);
        }
    }

    fn commit(&mut self, result: PathResult) {
        if matches!(result.status, JobStatus::Deadline) {
            warn!(seq = result.seq, "wall-clock backstop reached, stopping exploration");
            self.stop = Some(StopReason::WallTime);
            return;
        }
        self.stats.committed += 1;
        self.stats.run_timeouts += result.run_timeouts;
        self.stats.run_faults += result.run_faults;
        match &result.status {
            JobStatus::Solved => {}
            JobStatus::Infeasible => {
                debug!(
                    seq = result.seq,
                    signature = %result.predicted,
                    "path infeasible after solving"
                );
                self.stats.infeasible += 1;
            }
            JobStatus::SolverBudget => self.stats.solver_timeouts += 1,
            JobStatus::SolverError(message) => {
                warn!(seq = result.seq, %message, "solver failure");
                self.stats.solver_errors += 1;
            }
            JobStatus::Deadline | JobStatus::Cancelled => {}
        }
        let realized = result.runs.iter().any(|r| r.realized && !r.boundary);
        if matches!(result.status, JobStatus::Solved) && !realized {
            debug!(
                seq = result.seq,
                signature = %result.predicted,
                "no solution realized the predicted path"
            );
            self.stats.unrealized += 1;
        }

        let mut novel = false;
        for run in result.runs {
            self.stats.runs += 1;
            let new_path = self.tracker.admit_concrete(&run.execution.signature);
            let new_boundary = self.tracker.exercises_new_boundary(&run.args);
            if !(new_path || new_boundary) {
                continue;
            }
            self.tracker.mark_boundaries(&run.args);
            novel = true;
            self.cases.push(ConfirmedCase {
                args: run.args,
                outcome: run.execution.outcome,
                predicted: result.predicted.clone(),
                concrete: run.execution.signature,
                realized: run.realized,
                boundary: run.boundary,
            });
        }
        if let Some(reason) = self.tracker.record_attempt(novel) {
            debug!(seq = result.seq, ?reason, "stopping exploration");
            self.stop = Some(reason);
        }
    }
}
