//! Machine-readable generation summary.
//!
//! Per function: case counts, path counts, discards by kind, coverage, error
//! sites and a one-line oracle per case. Totals and a fingerprint of the
//! source make summaries of two runs directly comparable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use verity_explore::{ExplorationReport, StopReason};

use crate::suite::{FunctionSuite, TestSuite};

/// SHA-256 of the source text, hex encoded.
pub fn source_fingerprint(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Paths dropped before or after solving, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discarded {
    pub duplicate_predictions: u64,
    pub unanalyzable: u64,
    pub unmodelled: u64,
    pub depth_limited: u64,
    pub step_limited: u64,
    pub loop_limited: u64,
    pub infeasible: u64,
    pub solver_timeouts: u64,
    pub solver_errors: u64,
    pub run_timeouts: u64,
    pub run_faults: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub name: String,
    pub call: String,
    pub oracle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub function: String,
    pub cases: usize,
    pub returning: usize,
    pub raising: usize,
    /// Terminated paths the explorer emitted.
    pub paths_explored: u64,
    /// Emitted paths that solved and ran.
    pub paths_feasible: u64,
    pub duplicate_cases: usize,
    pub discarded: Discarded,
    pub coverage: f64,
    pub covered_edges: usize,
    pub total_edges: usize,
    pub error_sites_hit: Vec<String>,
    pub stop: StopReason,
    pub oracles: Vec<CaseSummary>,
}

impl FunctionSummary {
    pub fn new(report: &ExplorationReport, suite: &FunctionSuite) -> Self {
        let engine = &report.engine;
        let runner = &report.runner;
        let raising = suite.cases().filter(|c| c.oracle.error_kind().is_some()).count();
        Self {
            function: report.function.clone(),
            cases: suite.len(),
            returning: suite.len() - raising,
            raising,
            paths_explored: engine.emitted,
            paths_feasible: runner
                .committed
                .saturating_sub(runner.infeasible + runner.solver_timeouts + runner.solver_errors),
            duplicate_cases: suite.duplicates,
            discarded: Discarded {
                duplicate_predictions: engine.duplicates,
                unanalyzable: engine.unanalyzable,
                unmodelled: engine.unmodelled,
                depth_limited: engine.depth_limited,
                step_limited: engine.step_limited,
                loop_limited: engine.loop_limited,
                infeasible: engine.infeasible + runner.infeasible,
                solver_timeouts: engine.solver_timeouts + runner.solver_timeouts,
                solver_errors: engine.solver_errors + runner.solver_errors,
                run_timeouts: runner.run_timeouts,
                run_faults: runner.run_faults,
            },
            coverage: report.coverage,
            covered_edges: report.covered_edges,
            total_edges: report.total_edges,
            error_sites_hit: report.error_sites_hit.iter().map(|s| s.to_string()).collect(),
            stop: report.stop,
            oracles: suite
                .cases()
                .map(|c| CaseSummary {
                    name: c.name.clone(),
                    call: c.call_source(),
                    oracle: c.oracle.describe(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub functions: usize,
    pub cases: usize,
    pub returning: usize,
    pub raising: usize,
    /// Covered over total branch edges across all functions.
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub fingerprint: String,
    pub functions: Vec<FunctionSummary>,
    pub totals: Totals,
    /// Items excluded by the analyzer.
    pub analysis_errors: Vec<String>,
}

impl GenerationSummary {
    pub fn build(
        source: &str,
        reports: &[ExplorationReport],
        suite: &TestSuite,
        analysis_errors: Vec<String>,
    ) -> Self {
        let functions: Vec<FunctionSummary> = reports
            .iter()
            .zip(&suite.functions)
            .map(|(report, function)| FunctionSummary::new(report, function))
            .collect();
        let covered: usize = functions.iter().map(|f| f.covered_edges).sum();
        let total: usize = functions.iter().map(|f| f.total_edges).sum();
        let totals = Totals {
            functions: functions.len(),
            cases: functions.iter().map(|f| f.cases).sum(),
            returning: functions.iter().map(|f| f.returning).sum(),
            raising: functions.iter().map(|f| f.raising).sum(),
            coverage: if total == 0 { 1.0 } else { covered as f64 / total as f64 },
        };
        Self {
            fingerprint: source_fingerprint(source),
            functions,
            totals,
            analysis_errors,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        assert_eq!(
            source_fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(source_fingerprint("def f(): pass"), source_fingerprint("def f(): pass"));
        assert_ne!(source_fingerprint("def f(): pass"), source_fingerprint("def g(): pass"));
    }

    #[test]
    fn test_empty_summary_has_full_coverage() {
        let summary = GenerationSummary::build("", &[], &TestSuite::default(), Vec::new());
        assert_eq!(summary.totals.functions, 0);
        assert_eq!(summary.totals.coverage, 1.0);
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"fingerprint\": \"e3b0c442"));
    }
}
