use verity_compiler::compile::{analyze_with, AnalysisError, AnalyzerConfig};
use verity_compiler::graph::{FlowNode, RaiseSpec};
use verity_compiler::signature::RaiseSite;
use verity_compiler::analyze;
use verity_model::{ErrorKind, TypeTag, Value};

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

fn branch_count(module: &verity_compiler::AnalyzedModule, name: &str) -> usize {
    module
        .function(name)
        .unwrap()
        .graph
        .nodes
        .iter()
        .filter(|n| matches!(n, FlowNode::Branch { .. }))
        .count()
}

#[test]
fn test_analyze_translate_module() {
    let module = analyze(TRANSLATE);
    assert!(module.errors.is_empty(), "{:?}", module.errors);
    assert_eq!(module.globals.len(), 1);
    let f = module.function("translate").unwrap();
    assert_eq!(f.arity(), 2);
    assert_eq!(f.required(), 1);
    assert_eq!(f.params[1].default, Some(Value::str("en")));
    assert!(f.is_local("table"));
    assert!(!f.is_local("TRANSLATIONS"));
    assert_eq!(branch_count(&module, "translate"), 1);
}

#[test]
fn test_subscripts_are_key_error_sites() {
    let module = analyze(TRANSLATE);
    let f = module.function("translate").unwrap();
    let key_sites = f
        .error_sites
        .iter()
        .filter(|s| s.kinds.contains(&ErrorKind::KeyError))
        .count();
    assert_eq!(key_sites, 2);
    assert!(f
        .error_sites
        .iter()
        .any(|s| s.kinds.contains(&ErrorKind::AttributeError)));
}

#[test]
fn test_boolean_operators_lower_to_primitive_branches() {
    let module = analyze(
        "\
def f(a, b):
    if a > 0 and not b or a == 7:
        return 1
    return 2
",
    );
    assert_eq!(branch_count(&module, "f"), 3);
}

#[test]
fn test_assert_and_raise_sites() {
    let module = analyze(
        "\
def check(x):
    assert x != 0, 'zero'
    if x < 0:
        raise ValueError('negative')
    return x
",
    );
    let f = module.function("check").unwrap();
    let raised: Vec<&ErrorKind> = f
        .error_sites
        .iter()
        .filter(|s| matches!(s.site, RaiseSite::Node(_)))
        .flat_map(|s| s.kinds.iter())
        .collect();
    assert!(raised.contains(&&ErrorKind::AssertionError));
    assert!(raised.contains(&&ErrorKind::ValueError));
    assert!(f
        .graph
        .nodes
        .iter()
        .any(|n| matches!(n, FlowNode::Raise(RaiseSpec::Assertion(Some(_))))));
}

#[test]
fn test_loop_bounds() {
    let config = AnalyzerConfig {
        default_loop_bound: 2,
        max_loop_bound: 5,
    };
    let module = analyze_with(
        "\
def loops(xs):
    total = 0
    for i in range(100):
        total += i
    for x in xs:
        total += x
    for c in 'abc':
        total += 1
    while total > 0:
        total -= 1
    return total
",
        &config,
    );
    let f = module.function("loops").unwrap();
    let mut bounds: Vec<u32> = f.loop_bounds.iter().map(|b| b.bound).collect();
    bounds.sort();
    assert_eq!(bounds, vec![2, 2, 3, 5]);
}

#[test]
fn test_unsupported_statement_becomes_unanalyzable_region() {
    let module = analyze(
        "\
def f(x):
    if x:
        with open(x) as fh:
            return fh.read()
    return 0
",
    );
    let f = module.function("f").unwrap();
    assert_eq!(f.unanalyzable.len(), 1);
    assert_eq!(f.unanalyzable[0].line, 3);
    assert_eq!(branch_count(&module, "f"), 1);
}

#[test]
fn test_broken_function_does_not_hide_others() {
    let module = analyze(
        "\
def broken(x)
    return x

def fine(x):
    return x + 1
",
    );
    assert!(module.function("fine").is_some());
    assert!(module.function("broken").is_none());
    assert!(module.opaque_names.contains("broken"));
    assert!(matches!(
        module.errors.as_slice(),
        [AnalysisError::Parse { function: Some(name), .. }] if name == "broken"
    ));
}

#[test]
fn test_imports_and_classes_are_opaque() {
    let module = analyze(
        "\
import os
from math import sqrt

class Thing:
    pass

LIMIT = 10
BAD = os.getcwd()

def f(x):
    return x < LIMIT
",
    );
    for name in ["os", "sqrt", "Thing", "BAD"] {
        assert!(module.opaque_names.contains(name), "{name} should be opaque");
    }
    assert_eq!(module.globals.get("LIMIT"), Some(&Value::int(10)));
    assert_eq!(module.function("f").unwrap().hints.tags(0), &[TypeTag::Integer]);
}

#[test]
fn test_default_that_cannot_be_evaluated() {
    let module = analyze(
        "\
def f(x=len('abc')):
    return x
",
    );
    assert!(module.function("f").is_none());
    assert!(matches!(
        module.errors.as_slice(),
        [AnalysisError::Default { param, .. }] if param == "x"
    ));
}
