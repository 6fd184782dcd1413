//! Concolic path exploration: symbolic execution over a function's flow
//! graph, constraint solving over finite candidate domains, and concrete
//! confirmation of every explored path in the sandbox.

pub mod solver;
pub mod traversal;

pub use solver::{Solution, SolveError, Solver, SolverConfig};
pub use traversal::engine::EngineStats;
pub use traversal::runner::{
    explore_function, ConfirmedCase, ExplorationReport, ExploreConfig, ExploreError, RunnerStats,
};
pub use traversal::tracker::StopReason;
