//! Argument hints: plausible type tags and interesting constants per parameter,
//! inferred from how the body uses each parameter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use verity_ir::{Expr, ExprKind, FunctionDef, Stmt, StmtKind, Target};
use verity_model::{ops, BinOp, CmpOp, TypeTag, UnaryOp, Value};

use crate::compile::{target_exprs, ParamInfo};

/// Upper bound on constants kept per parameter and per function.
pub const MAX_CONSTANTS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamHint {
    pub name: String,
    /// Plausible tags in first-seen order.
    pub tags: Vec<TypeTag>,
    /// Constants the parameter is compared with, combined with, or used to index.
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgHints {
    pub params: Vec<ParamHint>,
}

impl ArgHints {
    pub fn tags(&self, param: usize) -> &[TypeTag] {
        self.params.get(param).map(|p| p.tags.as_slice()).unwrap_or(&[])
    }

    pub fn constants(&self, param: usize) -> &[Value] {
        self.params
            .get(param)
            .map(|p| p.constants.as_slice())
            .unwrap_or(&[])
    }
}

/// Pre-order visit of every expression in a statement list.
pub fn walk_body<'a>(stmts: &'a [Stmt], f: &mut dyn FnMut(&'a Expr)) {
    for stmt in stmts {
        let mut exprs: Vec<&'a Expr> = Vec::new();
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                exprs.push(value);
                for t in targets {
                    target_exprs(t, &mut exprs);
                }
            }
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) | StmtKind::Raise(Some(e)) => {
                exprs.push(e)
            }
            StmtKind::Assert { test, msg } => {
                exprs.push(test);
                exprs.extend(msg.iter());
            }
            StmtKind::Del(targets) => {
                for t in targets {
                    target_exprs(t, &mut exprs);
                }
            }
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => exprs.push(test),
            StmtKind::For { target, iter, .. } => {
                exprs.push(iter);
                target_exprs(target, &mut exprs);
            }
            _ => {}
        }
        for e in exprs {
            e.walk(f);
        }
        match &stmt.kind {
            StmtKind::If { body, orelse, .. } => {
                walk_body(body, f);
                walk_body(orelse, f);
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => walk_body(body, f),
            _ => {}
        }
    }
}

fn for_loops<'a>(stmts: &'a [Stmt], out: &mut Vec<(&'a Target, &'a Expr)>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::For { target, iter, body } => {
                out.push((target, iter));
                for_loops(body, out);
            }
            StmtKind::If { body, orelse, .. } => {
                for_loops(body, out);
                for_loops(orelse, out);
            }
            StmtKind::While { body, .. } => for_loops(body, out),
            _ => {}
        }
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T, cap: usize) {
    if items.len() < cap && !items.contains(&item) {
        items.push(item);
    }
}

fn method_tags(method: &str) -> &'static [TypeTag] {
    use TypeTag::*;
    match method {
        "decode" => &[Bytes],
        "encode" | "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "split" | "join"
        | "replace" | "format" | "isdigit" | "isalpha" | "title" | "capitalize" => &[Text],
        "startswith" | "endswith" | "find" | "count" => &[Text, Bytes],
        "get" | "keys" | "values" | "items" | "setdefault" | "update" => &[Container],
        "append" | "extend" | "insert" | "pop" | "remove" | "sort" | "clear" | "index" => {
            &[Container]
        }
        "conjugate" => &[Complex, Real, Integer],
        "is_integer" => &[Real],
        "bit_length" => &[Integer],
        _ => &[],
    }
}

struct HintBuilder<'a> {
    params: Vec<ParamHint>,
    globals: &'a BTreeMap<String, Value>,
}

impl<'a> HintBuilder<'a> {
    fn param_of(&self, e: &Expr) -> Option<usize> {
        match &e.kind {
            ExprKind::Name(n) => self.params.iter().position(|p| &p.name == n),
            _ => None,
        }
    }

    /// Value of a literal or of a global that is not shadowed by a parameter.
    fn resolve(&self, e: &Expr) -> Option<Value> {
        match &e.kind {
            ExprKind::Literal(v) => Some(v.clone()),
            ExprKind::Name(n) if self.param_of(e).is_none() => self.globals.get(n).cloned(),
            _ => None,
        }
    }

    fn tag(&mut self, param: usize, tag: TypeTag) {
        if let Some(p) = self.params.get_mut(param) {
            push_unique(&mut p.tags, tag, TypeTag::ALL.len());
        }
    }

    fn tags(&mut self, param: usize, tags: &[TypeTag]) {
        for t in tags {
            self.tag(param, *t);
        }
    }

    fn constant(&mut self, param: usize, v: Value) {
        self.tag(param, v.type_tag());
        if let Some(p) = self.params.get_mut(param) {
            push_unique(&mut p.constants, v, MAX_CONSTANTS);
        }
    }

    fn members(&mut self, param: usize, container: &Value) {
        if let Ok(items) = ops::iterate(container) {
            for item in items.into_iter().take(MAX_CONSTANTS) {
                self.constant(param, item);
            }
        }
    }

    fn visit(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Compare { op, left, right } => {
                if let Some(p) = self.param_of(left) {
                    match op {
                        CmpOp::In | CmpOp::NotIn => {
                            if let Some(c) = self.resolve(right) {
                                self.members(p, &c);
                            }
                        }
                        _ => {
                            if let Some(v) = self.resolve(right) {
                                self.constant(p, v);
                            }
                        }
                    }
                }
                if let Some(p) = self.param_of(right) {
                    match op {
                        CmpOp::In | CmpOp::NotIn => {
                            self.tags(p, &[TypeTag::Container, TypeTag::Text]);
                            if let Some(v) = self.resolve(left) {
                                self.constant(p, Value::List(vec![v]));
                            }
                        }
                        _ => {
                            if let Some(v) = self.resolve(left) {
                                self.constant(p, v);
                            }
                        }
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                for (side, other) in [(left, right), (right, left)] {
                    let Some(p) = self.param_of(side) else {
                        continue;
                    };
                    match (op, self.resolve(other)) {
                        (BinOp::Mod, _)
                            if matches!(left.kind, ExprKind::Literal(Value::Str(_))) => {}
                        (BinOp::Mul, Some(Value::Str(_))) => self.tag(p, TypeTag::Integer),
                        (_, Some(v)) => self.constant(p, v),
                        (_, None) => self.tags(p, &[TypeTag::Integer, TypeTag::Real]),
                    }
                }
            }
            ExprKind::Unary {
                op: UnaryOp::Neg | UnaryOp::Pos | UnaryOp::Invert,
                operand,
            } => {
                if let Some(p) = self.param_of(operand) {
                    self.tags(p, &[TypeTag::Integer, TypeTag::Real]);
                }
            }
            ExprKind::Call { func, args } => self.visit_call(func, args),
            ExprKind::Attribute { value, attr } => {
                if let Some(p) = self.param_of(value) {
                    match attr.as_str() {
                        "real" | "imag" => {
                            self.tags(p, &[TypeTag::Complex, TypeTag::Real, TypeTag::Integer])
                        }
                        other => self.tags(p, method_tags(other)),
                    }
                }
            }
            ExprKind::Subscript { value, index } => {
                if let Some(p) = self.param_of(value) {
                    self.tags(p, &[TypeTag::Container, TypeTag::Text]);
                    if let Some(k) = self.resolve(index) {
                        self.constant(p, Value::Dict(vec![(k, Value::None)]));
                    }
                }
                if let Some(p) = self.param_of(index) {
                    match self.resolve(value) {
                        Some(Value::Dict(pairs)) => {
                            for (k, _) in pairs.into_iter().take(MAX_CONSTANTS) {
                                self.constant(p, k);
                            }
                        }
                        Some(_) => self.tag(p, TypeTag::Integer),
                        None => {}
                    }
                }
            }
            ExprKind::Slice { value, .. } => {
                if let Some(p) = self.param_of(value) {
                    self.tags(p, &[TypeTag::Text, TypeTag::Container, TypeTag::Bytes]);
                }
            }
            _ => {}
        }
    }

    fn visit_call(&mut self, func: &Expr, args: &[Expr]) {
        match &func.kind {
            ExprKind::Name(name) => {
                let Some(p) = args.first().and_then(|a| self.param_of(a)) else {
                    return;
                };
                match name.as_str() {
                    "len" => self.tags(p, &[TypeTag::Container, TypeTag::Text, TypeTag::Bytes]),
                    "isinstance" => {
                        let names = args.get(1).and_then(Expr::type_names).unwrap_or_default();
                        for n in names {
                            if n == "NoneType" {
                                self.tag(p, TypeTag::Absent);
                            }
                            if let Some(tag) = TypeTag::for_type_name(&n) {
                                self.tag(p, tag);
                            }
                        }
                    }
                    "int" | "float" => {
                        self.tags(p, &[TypeTag::Text, TypeTag::Integer, TypeTag::Real])
                    }
                    "ord" => self.tags(p, &[TypeTag::Text, TypeTag::Bytes]),
                    "chr" | "range" => self.tag(p, TypeTag::Integer),
                    "abs" | "round" => {
                        self.tags(p, &[TypeTag::Integer, TypeTag::Real, TypeTag::Complex])
                    }
                    "sorted" | "sum" | "min" | "max" | "list" | "tuple" | "dict" => {
                        self.tag(p, TypeTag::Container)
                    }
                    _ => {}
                }
            }
            ExprKind::Attribute { value, attr } => {
                if let Some(p) = self.param_of(value) {
                    self.tags(p, method_tags(attr));
                }
                if let (Some(receiver), Some(p)) = (
                    self.resolve(value),
                    args.first().and_then(|a| self.param_of(a)),
                ) {
                    if let (Value::Dict(pairs), "get" | "pop" | "setdefault") =
                        (&receiver, attr.as_str())
                    {
                        for (k, _) in pairs.iter().take(MAX_CONSTANTS) {
                            self.constant(p, k.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

pub fn collect_hints(
    def: &FunctionDef,
    params: &[ParamInfo],
    globals: &BTreeMap<String, Value>,
) -> ArgHints {
    let mut builder = HintBuilder {
        params: params
            .iter()
            .map(|p| ParamHint {
                name: p.name.clone(),
                ..ParamHint::default()
            })
            .collect(),
        globals,
    };
    for (i, p) in params.iter().enumerate() {
        if let Some(d) = &p.default {
            builder.constant(i, d.clone());
        }
    }
    walk_body(&def.body, &mut |e| builder.visit(e));
    let mut loops = Vec::new();
    for_loops(&def.body, &mut loops);
    for (_, iter) in loops {
        if let Some(p) = builder.param_of(iter) {
            builder.tags(p, &[TypeTag::Container, TypeTag::Text]);
        }
    }
    ArgHints {
        params: builder.params,
    }
}

fn scalar_constants(v: &Value, out: &mut Vec<Value>) {
    match v {
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                scalar_constants(item, out);
            }
        }
        Value::Dict(pairs) => {
            for (k, val) in pairs {
                scalar_constants(k, out);
                scalar_constants(val, out);
            }
        }
        scalar => push_unique(out, scalar.clone(), MAX_CONSTANTS),
    }
}

/// Literals used by the body and scalars held by globals it reads, in first-use order.
pub fn harvest_constants(def: &FunctionDef, globals: &BTreeMap<String, Value>) -> Vec<Value> {
    let mut out = Vec::new();
    let param_names: Vec<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
    walk_body(&def.body, &mut |e| match &e.kind {
        ExprKind::Literal(v) => scalar_constants(v, &mut out),
        ExprKind::Name(n) if !param_names.contains(&n.as_str()) => {
            if let Some(v) = globals.get(n) {
                scalar_constants(v, &mut out);
            }
        }
        _ => {}
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::analyze;

    #[test]
    fn test_hints_follow_usage() {
        let module = analyze(
            "\
TABLE = {'a': 1, 'b': None}

def f(key, data, n=0):
    if data.decode('utf-8') == 'x':
        return TABLE[key]
    return n + 1.5
",
        );
        let f = module.function("f").unwrap();
        assert_eq!(f.hints.tags(0), &[TypeTag::Text]);
        assert_eq!(f.hints.constants(0), &[Value::str("a"), Value::str("b")]);
        assert_eq!(f.hints.tags(1), &[TypeTag::Bytes]);
        assert_eq!(f.hints.tags(2), &[TypeTag::Integer, TypeTag::Real]);
        assert!(f.constants.contains(&Value::str("utf-8")));
        assert!(f.constants.contains(&Value::str("b")));
    }

    #[test]
    fn test_isinstance_and_len() {
        let module = analyze(
            "\
def g(x):
    if isinstance(x, (int, float)):
        return x
    return len(x)
",
        );
        let g = module.function("g").unwrap();
        assert_eq!(
            g.hints.tags(0),
            &[
                TypeTag::Integer,
                TypeTag::Real,
                TypeTag::Container,
                TypeTag::Text,
                TypeTag::Bytes
            ]
        );
    }
}
