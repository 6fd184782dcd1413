use std::sync::Arc;

use verity_compiler::analyze;
use verity_compiler::signature::{PathSignature, RaiseSite, SigEntry, Terminal};
use verity_model::{ErrorKind, TypeTag, Value};
use verity_sandbox::config::SandboxConfig;
use verity_sandbox::sandbox::{Budget, RunOutcome, Sandbox, SandboxError};

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

fn sandbox(source: &str) -> Sandbox {
    Sandbox::new(&SandboxConfig::default(), Arc::new(analyze(source)))
}

#[test]
fn test_call_returns_value() {
    let mut instance = sandbox(TRANSLATE).instantiate();
    let run = instance.call("translate", &[Value::str("hello")]).unwrap();
    assert_eq!(
        run.outcome,
        RunOutcome::Returned {
            value: Value::str("HELLO")
        }
    );
    assert!(run.fuel_consumed > 0);
    assert_eq!(
        run.signature.entries[0],
        SigEntry::Domain {
            param: 0,
            tag: TypeTag::Text
        }
    );
    assert_eq!(run.signature.terminal, Some(Terminal::Return));
}

#[test]
fn test_missing_key_raises_key_error() {
    let mut instance = sandbox(TRANSLATE).instantiate();
    let run = instance
        .call("translate", &[Value::str("bye"), Value::str("fr")])
        .unwrap();
    match &run.outcome {
        RunOutcome::Raised { error } => {
            assert_eq!(error.kind, ErrorKind::KeyError);
            assert_eq!(error.message, "'bye'");
        }
        other => panic!("expected KeyError, got {other:?}"),
    }
    assert!(matches!(
        run.signature.terminal,
        Some(Terminal::Raise {
            kind: ErrorKind::KeyError,
            site: RaiseSite::Expr(_)
        })
    ));
}

#[test]
fn test_none_entry_returns_none() {
    let mut instance = sandbox(TRANSLATE).instantiate();
    let run = instance.call("translate", &[Value::str("bye")]).unwrap();
    assert_eq!(run.outcome, RunOutcome::Returned { value: Value::None });
    assert!(run
        .signature
        .branch_edges()
        .any(|(_, taken)| taken));
}

#[test]
fn test_unknown_function_and_arity() {
    let mut instance = sandbox(TRANSLATE).instantiate();
    assert!(matches!(
        instance.call("missing", &[]),
        Err(SandboxError::UnknownFunction { .. })
    ));
    assert!(matches!(
        instance.call("translate", &[]),
        Err(SandboxError::Arity { min: 1, max: 2, given: 0, .. })
    ));
}

#[test]
fn test_globals_restored_after_each_run() {
    let source = "\
SEEN = []

def remember(x):
    SEEN.append(x)
    return len(SEEN)
";
    let mut instance = sandbox(source).instantiate();
    for _ in 0..3 {
        let run = instance.call("remember", &[Value::int(1)]).unwrap();
        assert_eq!(run.outcome, RunOutcome::Returned { value: Value::int(1) });
    }
    assert_eq!(instance.globals().get("SEEN"), Some(&Value::List(vec![])));
    assert_eq!(instance.generation(), 3);
}

#[test]
fn test_global_rebinding_is_restored() {
    let source = "\
COUNT = 0

def bump():
    global COUNT
    COUNT = COUNT + 1
    return COUNT
";
    let mut instance = sandbox(source).instantiate();
    let first = instance.call("bump", &[]).unwrap();
    let second = instance.call("bump", &[]).unwrap();
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(instance.globals().get("COUNT"), Some(&Value::int(0)));
}

#[test]
fn test_infinite_loop_exhausts_fuel() {
    let source = "\
def spin(x):
    while True:
        x = x + 1
    return x
";
    let config = SandboxConfig {
        fuel_per_call: 5_000,
        ..SandboxConfig::default()
    };
    let sandbox = Sandbox::new(&config, Arc::new(analyze(source)));
    let mut instance = sandbox.instantiate();
    assert_eq!(
        instance.call("spin", &[Value::int(0)]).unwrap_err(),
        SandboxError::Timeout(Budget::Fuel)
    );
}

#[test]
fn test_opaque_import_is_a_fault() {
    let source = "\
import os

def cwd(x):
    if x:
        return os.getcwd()
    return ''
";
    let mut instance = sandbox(source).instantiate();
    assert!(matches!(
        instance.call("cwd", &[Value::Bool(true)]),
        Err(SandboxError::Fault(_))
    ));
    let run = instance.call("cwd", &[Value::Bool(false)]).unwrap();
    assert_eq!(run.outcome, RunOutcome::Returned { value: Value::str("") });
}

#[test]
fn test_decode_error_is_well_defined() {
    let source = "\
def text(data):
    return data.decode('utf-8')
";
    let mut instance = sandbox(source).instantiate();
    let run = instance
        .call("text", &[Value::Bytes(vec![0xff, 0x41])])
        .unwrap();
    assert_eq!(
        run.outcome.error_kind(),
        Some(&ErrorKind::UnicodeDecodeError)
    );
}

#[test]
fn test_raise_statement_site_and_message() {
    let source = "\
def check(x):
    if x < 0:
        raise ValueError('negative')
    assert x != 3, 'three'
    return x
";
    let mut instance = sandbox(source).instantiate();
    let run = instance.call("check", &[Value::int(-1)]).unwrap();
    match &run.outcome {
        RunOutcome::Raised { error } => {
            assert_eq!(error.kind, ErrorKind::ValueError);
            assert_eq!(error.message, "negative");
        }
        other => panic!("expected ValueError, got {other:?}"),
    }
    assert!(matches!(
        run.signature.terminal,
        Some(Terminal::Raise { site: RaiseSite::Node(_), .. })
    ));
    let run = instance.call("check", &[Value::int(3)]).unwrap();
    assert_eq!(run.outcome.error_kind(), Some(&ErrorKind::AssertionError));
}

#[test]
fn test_callee_errors_surface_at_call_site() {
    let source = "\
def inner(d):
    return d['k']

def outer(d):
    return inner(d)
";
    let mut instance = sandbox(source).instantiate();
    let run = instance
        .call("outer", &[Value::Dict(vec![])])
        .unwrap();
    assert_eq!(run.outcome.error_kind(), Some(&ErrorKind::KeyError));
    let site = match run.signature.terminal {
        Some(Terminal::Raise { site, .. }) => site,
        other => panic!("expected a raise, got {other:?}"),
    };
    let module = analyze(source);
    let outer = module.function("outer").unwrap();
    assert!(outer.error_site(site).is_some());
}

#[test]
fn test_deep_recursion_runs_until_the_depth_limit() {
    let source = "\
def depth(n):
    if n == 0:
        return 0
    return 1 + depth(n - 1)
";
    assert_eq!(SandboxConfig::default().max_call_depth, 1_000);
    let mut instance = sandbox(source).instantiate();
    let run = instance.call("depth", &[Value::int(900)]).unwrap();
    assert_eq!(
        run.outcome,
        RunOutcome::Returned {
            value: Value::int(900)
        }
    );
    let run = instance.call("depth", &[Value::int(5_000)]).unwrap();
    assert_eq!(
        run.outcome.error_kind(),
        Some(&ErrorKind::Other("RecursionError".to_string()))
    );
}

#[test]
fn test_prediction_realized_by_concrete_run() {
    let mut instance = sandbox(TRANSLATE).instantiate();
    let run = instance.call("translate", &[Value::str("hello")]).unwrap();
    let mut predicted = PathSignature::new();
    predicted.push(SigEntry::Domain {
        param: 0,
        tag: TypeTag::Text,
    });
    for (node, taken) in run.signature.branch_edges() {
        predicted.push(SigEntry::Branch { node, taken });
    }
    predicted.terminate(Terminal::Return);
    assert!(predicted.is_realized_by(&run.signature));
}

#[test]
fn test_nested_subscript_assignment() {
    let source = "\
def put(k, v):
    d = {'inner': {}}
    d['inner'][k] = v
    return d['inner']
";
    let mut instance = sandbox(source).instantiate();
    let run = instance
        .call("put", &[Value::str("a"), Value::int(1)])
        .unwrap();
    assert_eq!(
        run.outcome,
        RunOutcome::Returned {
            value: Value::Dict(vec![(Value::str("a"), Value::int(1))])
        }
    );
}

#[test]
fn test_outcome_serializes_with_tag() {
    let outcome = RunOutcome::Returned { value: Value::int(3) };
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["outcome"], "returned");
}
