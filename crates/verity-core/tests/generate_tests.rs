use std::sync::Arc;

use verity_compiler::analyze;
use verity_core::{generate, generate_for, GenerateError, GenerationConfig, Oracle, RegionKind};
use verity_explore::StopReason;
use verity_model::{ErrorKind, Value};
use verity_sandbox::Sandbox;

const MODULE: &str = "\
PRIMARY = {'en': 'hello', 'fr': None}
FALLBACK = {'de': 'hallo'}

def greet(lang):
    if lang in PRIMARY:
        return PRIMARY[lang]
    return FALLBACK[lang]

def scale(n, factor=2):
    if n < 0:
        raise ValueError('negative')
    return n * factor

def broken(x):
    return x +
";

fn config() -> GenerationConfig {
    let mut config = GenerationConfig::default();
    config.explore.explore_unhinted_domains = false;
    config.explore.max_wall_ms = 0;
    config
}

#[test]
fn test_generate_covers_every_analyzable_function() {
    let generation = generate(MODULE, &config()).unwrap();
    let names: Vec<&str> = generation.suite.functions.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(names, vec!["greet", "scale"]);
    assert_eq!(generation.analysis_errors.len(), 1);
    assert_eq!(generation.summary.analysis_errors.len(), 1);

    let greet = generation.suite.function("greet").unwrap();
    assert_eq!(greet.header, "Test suites for function greet");
    assert!(greet.cases().any(|c| c.oracle == Oracle::Returns { value: Value::None }));
    assert!(greet
        .regions
        .iter()
        .any(|r| r.kind == RegionKind::Raises { kind: ErrorKind::KeyError }));

    let scale = generation.suite.function("scale").unwrap();
    let raising: Vec<&str> = scale
        .cases()
        .filter(|c| c.oracle.error_kind() == Some(&ErrorKind::ValueError))
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(raising[0], "test_scale_raises_value_error");
    assert_eq!(scale.cases().next().map(|c| c.name.as_str()), Some("test_scale"));
}

#[test]
fn test_suite_has_no_duplicate_cases() {
    let generation = generate(MODULE, &config()).unwrap();
    for function in &generation.suite.functions {
        let cases: Vec<_> = function.cases().collect();
        for (i, a) in cases.iter().enumerate() {
            for b in &cases[i + 1..] {
                assert!(a.args != b.args || a.oracle != b.oracle);
                assert_ne!(a.name, b.name);
            }
        }
    }
}

#[test]
fn test_regeneration_is_idempotent() {
    let first = generate(MODULE, &config()).unwrap();
    let second = generate(MODULE, &config()).unwrap();
    assert_eq!(first.suite, second.suite);
    assert_eq!(first.summary.fingerprint, second.summary.fingerprint);
    assert_eq!(first.summary.totals, second.summary.totals);

    let sequential = generate(
        MODULE,
        &GenerationConfig {
            parallel_functions: false,
            ..config()
        },
    )
    .unwrap();
    assert_eq!(first.suite, sequential.suite);
}

#[test]
fn test_generate_for_selected_functions() {
    let generation = generate_for(MODULE, &["scale"], &config()).unwrap();
    assert_eq!(generation.suite.functions.len(), 1);
    assert_eq!(generation.summary.functions[0].function, "scale");
    assert!(generation.summary.to_json().unwrap().contains("\"function\": \"scale\""));

    let err = generate_for(MODULE, &["broken"], &config()).unwrap_err();
    assert!(matches!(err, GenerateError::Analysis(_)));
}

#[test]
fn test_unparsable_module_fails() {
    let err = generate("def f(:\n    return 1\n", &config()).unwrap_err();
    assert!(matches!(err, GenerateError::Analysis(_)));
}

#[test]
fn test_invalid_config_is_rejected_before_analysis() {
    let mut config = config();
    config.explore.workers = 0;
    assert!(matches!(generate(MODULE, &config), Err(GenerateError::Config(_))));
    let mut config = GenerationConfig::default();
    config.max_source_bytes = 8;
    assert!(matches!(generate(MODULE, &config), Err(GenerateError::Limit(_))));
}

#[test]
fn test_every_case_reproduces_its_oracle() {
    let generation = generate(MODULE, &config()).unwrap();
    let sandbox = Sandbox::new(&config().sandbox, Arc::new(analyze(MODULE)));
    for case in generation.suite.cases() {
        let mut instance = sandbox.instantiate();
        let execution = instance.call(&case.function, &case.args).unwrap();
        assert_eq!(Oracle::from(execution.outcome), case.oracle, "{}", case.name);
        assert_eq!(execution.signature, case.provenance.concrete, "{}", case.name);
    }
}

#[test]
fn test_identity_function_gets_every_boundary_literal() {
    let generation = generate("def echo(x):\n    return x\n", &config()).unwrap();
    let args: Vec<&Value> = generation.suite.cases().map(|c| &c.args[0]).collect();
    for literal in [
        Value::int(0),
        Value::int(-1),
        Value::Float(1e300),
        Value::Float(f64::INFINITY),
        Value::complex(1.5, 3.5),
        Value::Bytes(vec![0x80]),
        Value::str(""),
    ] {
        assert!(args.contains(&&literal), "missing {}", literal.literal());
    }
    let inf = generation
        .suite
        .cases()
        .find(|c| c.args[0] == Value::Float(f64::INFINITY))
        .unwrap();
    assert_eq!(inf.call_source(), "echo(1e300 * 1e300)");
}

#[test]
fn test_oversized_integer_arithmetic_does_not_stall_generation() {
    let source = "\
def grow(x):
    y = x ** 4000
    z = y ** 4000
    return z ** 4000
";
    let generation = generate(source, &GenerationConfig::default()).unwrap();
    let report = &generation.reports[0];
    assert_ne!(report.stop, StopReason::WallTime);
    assert!(generation.suite.function("grow").is_some());
}

#[test]
fn test_regeneration_under_a_tight_solver_budget_is_idempotent() {
    let mut config = config();
    config.solver.max_sat_calls = 3;
    let first = generate(MODULE, &config).unwrap();
    let second = generate(MODULE, &config).unwrap();
    assert_eq!(first.suite, second.suite);
    assert_eq!(first.summary, second.summary);
}
