use std::sync::Arc;

use verity_compiler::analyze;
use verity_explore::{
    explore_function, ExplorationReport, ExploreConfig, ExploreError, SolverConfig, StopReason,
};
use verity_model::{ErrorKind, Value};
use verity_sandbox::{RunOutcome, Sandbox, SandboxConfig};

const TRANSLATE: &str = "\
TRANSLATIONS = {
    'en': {'hello': 'Hello', 'bye': None},
    'fr': {'hello': 'Bonjour'},
}

def translate(word, lang='en'):
    table = TRANSLATIONS[lang]
    result = table[word]
    if result is None:
        return None
    return result.upper()
";

const THRESHOLD: &str = "\
def classify(n):
    if n > 3:
        return 'big'
    return 'small'
";

fn hinted_only() -> ExploreConfig {
    ExploreConfig {
        explore_unhinted_domains: false,
        max_paths: 1_000,
        novelty_patience: 0,
        max_wall_ms: 0,
        ..ExploreConfig::default()
    }
}

fn explore(source: &str, name: &str, config: &ExploreConfig) -> ExplorationReport {
    explore_with(source, name, config, &SolverConfig::default())
}

fn explore_with(
    source: &str,
    name: &str,
    config: &ExploreConfig,
    solver: &SolverConfig,
) -> ExplorationReport {
    explore_function(
        Arc::new(analyze(source)),
        name,
        config,
        solver,
        &SandboxConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_lookup_finds_missing_key_and_absent_value() {
    let report = explore(TRANSLATE, "translate", &hinted_only());
    assert_eq!(report.stop, StopReason::Exhausted);
    assert!(report
        .cases
        .iter()
        .any(|c| c.outcome.error_kind() == Some(&ErrorKind::KeyError)));
    assert!(report.cases.iter().any(|c| c.outcome
        == RunOutcome::Returned { value: Value::None }
        && c.args == vec![Value::str("bye"), Value::str("en")]));
    assert!(report.cases.iter().any(|c| c.outcome
        == RunOutcome::Returned {
            value: Value::str("BONJOUR")
        }));
}

#[test]
fn test_kept_cases_have_distinct_paths_or_new_boundaries() {
    let report = explore(TRANSLATE, "translate", &hinted_only());
    for (i, a) in report.cases.iter().enumerate() {
        for b in &report.cases[i + 1..] {
            assert!(a.concrete != b.concrete || a.boundary || b.boundary);
        }
    }
    assert!(report.cases.iter().filter(|c| !c.boundary).all(|c| c.realized));
}

#[test]
fn test_results_do_not_depend_on_worker_count() {
    let single = explore(
        TRANSLATE,
        "translate",
        &ExploreConfig {
            workers: 1,
            ..hinted_only()
        },
    );
    let many = explore(
        TRANSLATE,
        "translate",
        &ExploreConfig {
            workers: 8,
            queue_capacity: 2,
            ..hinted_only()
        },
    );
    assert_eq!(single.cases, many.cases);
    assert_eq!(single.runner, many.runner);
}

#[test]
fn test_boundary_literals_are_exercised() {
    let report = explore(THRESHOLD, "classify", &hinted_only());
    let args: Vec<&Vec<Value>> = report.cases.iter().map(|c| &c.args).collect();
    assert!(args.contains(&&vec![Value::int(0)]));
    assert!(args.contains(&&vec![Value::int(-1)]));
    assert!(report
        .cases
        .iter()
        .any(|c| c.outcome == RunOutcome::Returned { value: Value::str("big") }));
    assert_eq!(report.coverage, 1.0);
}

#[test]
fn test_contradictory_branches_emit_no_infeasible_paths() {
    let source = "\
def f(x):
    if x > 5:
        if x < 3:
            return 'never'
        return 'high'
    return 'low'
";
    let report = explore(source, "f", &ExploreConfig::default());
    assert_eq!(report.runner.infeasible, 0);
    assert!(report.cases.iter().all(|c| c.outcome
        != RunOutcome::Returned {
            value: Value::str("never")
        }));
    assert!(report.coverage < 1.0);
}

#[test]
fn test_path_budget_stops_exploration() {
    let config = ExploreConfig {
        max_paths: 2,
        ..ExploreConfig::default()
    };
    let report = explore(TRANSLATE, "translate", &config);
    assert_eq!(report.stop, StopReason::PathLimit);
    assert_eq!(report.runner.committed, 2);
}

#[test]
fn test_unknown_function_is_an_error() {
    let result = explore_function(
        Arc::new(analyze(THRESHOLD)),
        "missing",
        &ExploreConfig::default(),
        &SolverConfig::default(),
        &SandboxConfig::default(),
    );
    assert_eq!(
        result.err(),
        Some(ExploreError::UnknownFunction {
            name: "missing".to_string()
        })
    );
}

#[test]
fn test_report_serializes_to_json() {
    let report = explore(THRESHOLD, "classify", &hinted_only());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["function"], "classify");
    assert_eq!(json["stop"], "exhausted");
    assert_eq!(json["cases"].as_array().map(|c| c.len()), Some(report.cases.len()));
}

#[test]
fn test_cases_replay_on_a_fresh_instance() {
    let module = Arc::new(analyze(TRANSLATE));
    let report = explore(TRANSLATE, "translate", &hinted_only());
    assert!(!report.cases.is_empty());
    let sandbox = Sandbox::new(&SandboxConfig::default(), Arc::clone(&module));
    for case in &report.cases {
        let mut instance = sandbox.instantiate();
        let execution = instance.call("translate", &case.args).unwrap();
        assert_eq!(execution.outcome, case.outcome);
        assert_eq!(execution.signature, case.concrete);
    }
}

#[test]
fn test_lookup_through_a_parameter_mapping_reaches_none() {
    let source = "\
def get(key, table):
    return table[key]
";
    let config = ExploreConfig {
        max_paths: 1_000,
        novelty_patience: 0,
        max_wall_ms: 0,
        ..ExploreConfig::default()
    };
    let report = explore(source, "get", &config);
    assert!(report
        .cases
        .iter()
        .any(|c| c.outcome == RunOutcome::Returned { value: Value::None }));
    assert!(report
        .cases
        .iter()
        .any(|c| c.outcome.error_kind() == Some(&ErrorKind::KeyError)));
}

#[test]
fn test_solver_budget_discards_do_not_depend_on_workers() {
    let solver = SolverConfig {
        max_sat_calls: 1,
        ..SolverConfig::default()
    };
    let single = explore_with(
        THRESHOLD,
        "classify",
        &ExploreConfig {
            workers: 1,
            ..hinted_only()
        },
        &solver,
    );
    let many = explore_with(
        THRESHOLD,
        "classify",
        &ExploreConfig {
            workers: 8,
            queue_capacity: 2,
            ..hinted_only()
        },
        &solver,
    );
    assert!(single.engine.solver_timeouts > 0);
    assert!(!single.engine.deadline_reached);
    assert_eq!(single.stop, StopReason::Exhausted);
    assert_eq!(single.cases, many.cases);
    assert_eq!(single.engine, many.engine);
    assert_eq!(single.runner, many.runner);
}
