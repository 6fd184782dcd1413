use verity_ir::ast::BoolOp;
use verity_ir::{parse_expression, parse_module, ExprKind, Item, ParseError, StmtKind, Target};
use verity_model::{BinOp, CmpOp, Value};

const TRANSLATE: &str = r#"
import os

EN = {"hello": "hello", "bye": None}
FR = {"hello": "bonjour"}

def translate(word, lang="en"):
    """Look a word up."""
    if lang == "en":
        table = EN
    elif lang == "fr":
        table = FR
    else:
        raise ValueError("unknown language")
    return table[word]
"#;

#[test]
fn test_parse_module_items() {
    let module = parse_module(TRANSLATE);
    assert!(matches!(
        &module.items[0],
        Item::Import { names, line: 2 } if names == &["os".to_string()]
    ));
    assert!(matches!(&module.items[1], Item::Global { name, .. } if name == "EN"));
    assert!(matches!(&module.items[2], Item::Global { name, .. } if name == "FR"));
    let f = module.function("translate").unwrap();
    assert_eq!(f.params.len(), 2);
    assert_eq!(f.params[0].name, "word");
    assert!(f.params[0].default.is_none());
    assert_eq!(
        f.params[1].default.as_ref().map(|d| &d.kind),
        Some(&ExprKind::Literal(Value::str("en")))
    );
    // docstring, if-chain, return
    assert_eq!(f.body.len(), 3);
}

#[test]
fn test_elif_nests_in_orelse() {
    let module = parse_module(TRANSLATE);
    let f = module.function("translate").unwrap();
    let StmtKind::If { orelse, .. } = &f.body[1].kind else {
        panic!("expected if, got {:?}", f.body[1].kind);
    };
    assert_eq!(orelse.len(), 1);
    let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
        panic!("elif should nest");
    };
    assert!(matches!(inner[0].kind, StmtKind::Raise(Some(_))));
}

#[test]
fn test_broken_function_does_not_hide_others() {
    let src = "def bad(x):\n    return x +\n\ndef good(x):\n    return x\n";
    let module = parse_module(src);
    assert!(matches!(
        &module.items[0],
        Item::Broken {
            name: Some(n),
            error: ParseError::UnexpectedEol { line: 2, .. },
        } if n == "bad"
    ));
    assert!(module.function("good").is_some());
}

#[test]
fn test_unsupported_constructs_are_marked() {
    let src = "\
class C:
    pass

@cache
def memo(x):
    return x

def f(x):
    try:
        y = 1
    except KeyError:
        y = 2
    return [i for i in x]
";
    let module = parse_module(src);
    assert!(matches!(
        &module.items[0],
        Item::Unsupported { construct, .. } if construct == "class"
    ));
    assert!(
        matches!(&module.items[1], Item::Unsupported { name: Some(n), .. } if n == "memo")
    );
    let f = module.function("f").unwrap();
    assert_eq!(f.body[0].kind, StmtKind::Unsupported("try".to_string()));
    let StmtKind::Return(Some(e)) = &f.body[1].kind else {
        panic!("expected return");
    };
    assert_eq!(e.find_unsupported(), Some("list comprehension"));
}

#[test]
fn test_chained_comparison_becomes_conjunction() {
    let e = parse_expression("0 < x <= 10").unwrap();
    let ExprKind::BoolOp { op, left, right } = &e.kind else {
        panic!("expected and, got {:?}", e.kind);
    };
    assert_eq!(*op, BoolOp::And);
    assert!(matches!(left.kind, ExprKind::Compare { op: CmpOp::Lt, .. }));
    assert!(matches!(right.kind, ExprKind::Compare { op: CmpOp::Le, .. }));
}

#[test]
fn test_precedence_and_negative_literals() {
    let e = parse_expression("-2 ** 2 + 3 * x").unwrap();
    let ExprKind::Binary { op: BinOp::Add, left, .. } = &e.kind else {
        panic!("expected add");
    };
    // unary minus binds looser than power
    assert!(matches!(left.kind, ExprKind::Unary { .. }));
    let lit = parse_expression("-5").unwrap();
    assert_eq!(lit.kind, ExprKind::Literal(Value::int(-5)));
}

#[test]
fn test_not_in_and_is_not() {
    let e = parse_expression("k not in d").unwrap();
    assert!(matches!(e.kind, ExprKind::Compare { op: CmpOp::NotIn, .. }));
    let e = parse_expression("v is not None").unwrap();
    assert!(matches!(e.kind, ExprKind::Compare { op: CmpOp::IsNot, .. }));
}

#[test]
fn test_augmented_assignment_desugars() {
    let module = parse_module("def f(d, k):\n    d[k] += 1\n");
    let f = module.function("f").unwrap();
    let StmtKind::Assign { targets, value } = &f.body[0].kind else {
        panic!("expected assignment");
    };
    assert!(matches!(&targets[0], Target::Subscript { .. }));
    assert_eq!(targets[0].root(), Some("d"));
    assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::Add, .. }));
}

#[test]
fn test_for_loop_with_tuple_target() {
    let module = parse_module("def f(d):\n    for k, v in d:\n        pass\n");
    let f = module.function("f").unwrap();
    let StmtKind::For { target, .. } = &f.body[0].kind else {
        panic!("expected for");
    };
    assert!(matches!(target, Target::Tuple(items) if items.len() == 2));
}

#[test]
fn test_literals_and_slices() {
    let e = parse_expression("b'\\x80' 'a'").unwrap_err();
    assert!(matches!(e, ParseError::UnexpectedToken { line: 1, .. }));
    let e = parse_expression("'a' 'b'").unwrap();
    assert_eq!(e.kind, ExprKind::Literal(Value::str("ab")));
    let e = parse_expression("0x10").unwrap();
    assert_eq!(e.kind, ExprKind::Literal(Value::int(16)));
    let e = parse_expression("x[1:]").unwrap();
    assert!(matches!(e.kind, ExprKind::Slice { upper: None, .. }));
}

#[test]
fn test_inline_bodies_and_semicolons() {
    let module = parse_module("def f(x):\n    if x: return 1\n    y = 2; return y\n");
    let f = module.function("f").unwrap();
    assert_eq!(f.body.len(), 3);
}

#[test]
fn test_keyword_arguments_are_unsupported() {
    let e = parse_expression("sorted(x, reverse=True)").unwrap();
    assert_eq!(e.find_unsupported(), Some("keyword argument"));
}

#[test]
fn test_missing_block_is_reported() {
    let module = parse_module("def f(x):\n    if x:\n    return 1\n");
    assert!(matches!(
        &module.items[0],
        Item::Broken { error: ParseError::ExpectedBlock { line: 2 }, .. }
    ));
}

#[test]
fn test_import_bindings() {
    let module = parse_module(
        "import os.path\nimport numpy as np, sys\nfrom math import (sqrt, pi as PI)\n",
    );
    let names: Vec<String> = module
        .items
        .iter()
        .flat_map(|item| match item {
            Item::Import { names, .. } => names.clone(),
            _ => Vec::new(),
        })
        .collect();
    assert_eq!(names, vec!["os", "np", "sys", "sqrt", "PI"]);
}

#[test]
fn test_deep_nesting_is_rejected() {
    let src = format!("{}1{}", "(".repeat(100), ")".repeat(100));
    let err = parse_expression(&src).unwrap_err();
    assert!(matches!(err, ParseError::MaxDepthExceeded { .. }));
}
