//! Symbolic terms and the atoms a path constraint is made of.
//!
//! A term is a tree of pure operations over parameter symbols and concrete
//! values. Terms are never simplified algebraically: the solver evaluates them
//! on candidate inputs with the same operator semantics the concrete runner
//! uses, so a candidate satisfies an atom exactly when the real function would
//! take that outcome.

use std::collections::BTreeSet;

use verity_model::{ops, BinOp, CmpOp, ErrorKind, OpError, TypeTag, UnaryOp, Value};
use verity_sandbox::builtins;

pub type SymbolId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum SymExpr {
    /// Parameter `i` of the function under exploration.
    Input(SymbolId),
    Const(Value),
    /// Result of an opaque call. The solver never chooses it.
    Opaque(SymbolId),
    Unary(UnaryOp, Box<SymExpr>),
    Binary(BinOp, Box<SymExpr>, Box<SymExpr>),
    Compare(CmpOp, Box<SymExpr>, Box<SymExpr>),
    List(Vec<SymExpr>),
    Tuple(Vec<SymExpr>),
    Dict(Vec<(SymExpr, SymExpr)>),
    Subscript(Box<SymExpr>, Box<SymExpr>),
    Slice(Box<SymExpr>, Option<Box<SymExpr>>, Option<Box<SymExpr>>),
    Attr(Box<SymExpr>, String),
    /// Pure built-in function.
    Call(String, Vec<SymExpr>),
    InstanceOf(Box<SymExpr>, Vec<String>),
    /// Non-mutating method.
    Method {
        receiver: Box<SymExpr>,
        method: String,
        args: Vec<SymExpr>,
    },
    /// Mutating method: the updated receiver, or the call's own result.
    Mutate {
        receiver: Box<SymExpr>,
        method: String,
        args: Vec<SymExpr>,
        result: bool,
    },
    SetItem(Box<SymExpr>, Box<SymExpr>, Box<SymExpr>),
    DelItem(Box<SymExpr>, Box<SymExpr>),
    /// Entry `base[key]` overwritten in place; unlike `SetItem` this also
    /// reaches into tuples, as writes through a nested place do.
    Replace(Box<SymExpr>, Box<SymExpr>, Box<SymExpr>),
    /// Item `n` of the iteration over a value.
    Item(Box<SymExpr>, usize),
}

fn eval_all(exprs: &[SymExpr], inputs: &[Value]) -> Result<Vec<Value>, OpError> {
    exprs.iter().map(|e| e.eval(inputs)).collect()
}

fn eval_opt(expr: &Option<Box<SymExpr>>, inputs: &[Value]) -> Result<Option<Value>, OpError> {
    expr.as_ref().map(|e| e.eval(inputs)).transpose()
}

impl SymExpr {
    pub fn boxed(self) -> Box<SymExpr> {
        Box::new(self)
    }

    /// Evaluate the term with `inputs[i]` bound to parameter symbol `i`.
    pub fn eval(&self, inputs: &[Value]) -> Result<Value, OpError> {
        match self {
            SymExpr::Input(i) => inputs
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| OpError::fault(format!("no value for symbol {i}"))),
            SymExpr::Const(v) => Ok(v.clone()),
            SymExpr::Opaque(i) => Err(OpError::fault(format!("opaque value #{i}"))),
            SymExpr::Unary(op, a) => ops::unary(*op, &a.eval(inputs)?),
            SymExpr::Binary(op, a, b) => {
                let l = a.eval(inputs)?;
                let r = b.eval(inputs)?;
                ops::binary(*op, &l, &r)
            }
            SymExpr::Compare(op, a, b) => {
                let l = a.eval(inputs)?;
                let r = b.eval(inputs)?;
                ops::compare(*op, &l, &r).map(Value::Bool)
            }
            SymExpr::List(items) => eval_all(items, inputs).map(Value::List),
            SymExpr::Tuple(items) => eval_all(items, inputs).map(Value::Tuple),
            SymExpr::Dict(pairs) => {
                let mut dict = Value::Dict(Vec::new());
                for (k, v) in pairs {
                    let key = k.eval(inputs)?;
                    let value = v.eval(inputs)?;
                    ops::set_item(&mut dict, key, value)?;
                }
                Ok(dict)
            }
            SymExpr::Subscript(base, key) => {
                let b = base.eval(inputs)?;
                let k = key.eval(inputs)?;
                ops::subscript(&b, &k)
            }
            SymExpr::Slice(base, lower, upper) => {
                let b = base.eval(inputs)?;
                let lo = eval_opt(lower, inputs)?;
                let hi = eval_opt(upper, inputs)?;
                ops::slice(&b, lo.as_ref(), hi.as_ref())
            }
            SymExpr::Attr(base, name) => ops::attribute(&base.eval(inputs)?, name),
            SymExpr::Call(name, args) => builtins::call_pure(name, &eval_all(args, inputs)?),
            SymExpr::InstanceOf(v, names) => {
                builtins::isinstance(&v.eval(inputs)?, names).map(Value::Bool)
            }
            SymExpr::Method {
                receiver,
                method,
                args,
            } => {
                let recv = receiver.eval(inputs)?;
                builtins::call_method(&recv, method, &eval_all(args, inputs)?)
            }
            SymExpr::Mutate {
                receiver,
                method,
                args,
                result,
            } => {
                let mut recv = receiver.eval(inputs)?;
                let values = eval_all(args, inputs)?;
                let out = match builtins::call_method_mut(&mut recv, method, &values) {
                    Some(r) => r?,
                    None => builtins::call_method(&recv, method, &values)?,
                };
                Ok(if *result { out } else { recv })
            }
            SymExpr::SetItem(base, key, value) => {
                let mut b = base.eval(inputs)?;
                let k = key.eval(inputs)?;
                let v = value.eval(inputs)?;
                ops::set_item(&mut b, k, v)?;
                Ok(b)
            }
            SymExpr::DelItem(base, key) => {
                let mut b = base.eval(inputs)?;
                ops::del_item(&mut b, &key.eval(inputs)?)?;
                Ok(b)
            }
            SymExpr::Replace(base, key, value) => {
                let mut b = base.eval(inputs)?;
                let k = key.eval(inputs)?;
                let v = value.eval(inputs)?;
                let index = ops::select_index(&b, &k)?;
                let type_name = b.type_name();
                let slot = match &mut b {
                    Value::Dict(pairs) => pairs.get_mut(index).map(|p| &mut p.1),
                    Value::List(items) | Value::Tuple(items) => items.get_mut(index),
                    _ => None,
                };
                match slot {
                    Some(slot) => *slot = v,
                    None => {
                        return Err(OpError::type_error(format!(
                            "'{type_name}' object does not support item assignment"
                        )))
                    }
                }
                Ok(b)
            }
            SymExpr::Item(seq, n) => ops::iterate(&seq.eval(inputs)?)?
                .into_iter()
                .nth(*n)
                .ok_or_else(|| OpError::fault("iteration ended before the selected item")),
        }
    }

    fn children(&self) -> Vec<&SymExpr> {
        match self {
            SymExpr::Input(_) | SymExpr::Const(_) | SymExpr::Opaque(_) => Vec::new(),
            SymExpr::Unary(_, a)
            | SymExpr::Attr(a, _)
            | SymExpr::InstanceOf(a, _)
            | SymExpr::Item(a, _) => {
                vec![&**a]
            }
            SymExpr::Binary(_, a, b)
            | SymExpr::Compare(_, a, b)
            | SymExpr::Subscript(a, b)
            | SymExpr::DelItem(a, b) => vec![&**a, &**b],
            SymExpr::SetItem(a, b, c) | SymExpr::Replace(a, b, c) => vec![&**a, &**b, &**c],
            SymExpr::List(items) | SymExpr::Tuple(items) | SymExpr::Call(_, items) => {
                items.iter().collect()
            }
            SymExpr::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            SymExpr::Slice(a, lo, hi) => {
                let mut out = vec![a.as_ref()];
                out.extend(lo.as_deref());
                out.extend(hi.as_deref());
                out
            }
            SymExpr::Method { receiver, args, .. } | SymExpr::Mutate { receiver, args, .. } => {
                let mut out = vec![receiver.as_ref()];
                out.extend(args.iter());
                out
            }
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&SymExpr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Parameter symbols the term depends on, ascending.
    pub fn symbols(&self) -> Vec<SymbolId> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let SymExpr::Input(i) = e {
                out.insert(*i);
            }
        });
        out.into_iter().collect()
    }

    pub fn has_opaque(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, SymExpr::Opaque(_)));
        found
    }

    /// Whether the term depends on nothing but concrete values.
    pub fn is_concrete(&self) -> bool {
        let mut symbolic = false;
        self.visit(&mut |e| symbolic |= matches!(e, SymExpr::Input(_) | SymExpr::Opaque(_)));
        !symbolic
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            SymExpr::Const(v) => Some(v),
            _ => None,
        }
    }
}

/// One feasible result of probing a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// Evaluation finished without raising.
    Completes,
    /// Truthiness, or whether an iteration has another item.
    Holds(bool),
    /// A subscript selected entry `i` of its container.
    Selects(usize),
    Raises(ErrorKind),
}

impl Outcome {
    pub fn is_raise(&self) -> bool {
        matches!(self, Outcome::Raises(_))
    }
}

/// What a branch or operation asks of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Truthy,
    Evaluates,
    /// Which entry a subscript term selects.
    Select,
    /// Whether the term can be iterated at all.
    Iterates,
    /// Whether iterating the term yields more than `n` items.
    HasItem(usize),
}

impl Probe {
    /// Outcome of probing `expr` under `inputs`; `None` for uncontrolled faults.
    pub fn observe(&self, expr: &SymExpr, inputs: &[Value]) -> Option<Outcome> {
        let result = match self {
            Probe::Truthy => expr.eval(inputs).map(|v| Outcome::Holds(v.is_truthy())),
            Probe::Evaluates => expr.eval(inputs).map(|_| Outcome::Completes),
            Probe::Select => match expr {
                SymExpr::Subscript(base, key) => base
                    .eval(inputs)
                    .and_then(|b| ops::select_index(&b, &key.eval(inputs)?))
                    .map(Outcome::Selects),
                other => other.eval(inputs).map(|_| Outcome::Completes),
            },
            Probe::Iterates => expr
                .eval(inputs)
                .and_then(|v| ops::iterate(&v))
                .map(|_| Outcome::Completes),
            Probe::HasItem(n) => expr
                .eval(inputs)
                .and_then(|v| ops::iterate(&v))
                .map(|items| Outcome::Holds(items.len() > *n)),
        };
        match result {
            Ok(outcome) => Some(outcome),
            Err(OpError::Raised(e)) => Some(Outcome::Raises(e.kind)),
            Err(OpError::Fault(_)) => None,
        }
    }
}

/// `probe(expr) == expect`.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub expr: SymExpr,
    pub probe: Probe,
    pub expect: Outcome,
    symbols: Vec<SymbolId>,
}

impl Atom {
    pub fn new(expr: SymExpr, probe: Probe, expect: Outcome) -> Self {
        let symbols = expr.symbols();
        Self {
            expr,
            probe,
            expect,
            symbols,
        }
    }

    pub fn symbols(&self) -> &[SymbolId] {
        &self.symbols
    }

    pub fn holds(&self, inputs: &[Value]) -> bool {
        self.probe.observe(&self.expr, inputs).as_ref() == Some(&self.expect)
    }
}

/// Ordered conjunction of atoms over parameter symbols with fixed type tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraint {
    /// Type tag chosen for each parameter at entry.
    pub domains: Vec<TypeTag>,
    pub atoms: Vec<Atom>,
}

impl Constraint {
    pub fn new(domains: Vec<TypeTag>) -> Self {
        Self {
            domains,
            atoms: Vec::new(),
        }
    }

    pub fn push(&mut self, atom: Atom) {
        if !self.atoms.contains(&atom) {
            self.atoms.push(atom);
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn holds_for(&self, inputs: &[Value]) -> bool {
        inputs.len() == self.domains.len()
            && inputs
                .iter()
                .zip(&self.domains)
                .all(|(v, tag)| v.type_tag() == *tag)
            && self.atoms.iter().all(|a| a.holds(inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymExpr {
        SymExpr::Const(Value::Dict(vec![
            (Value::str("en"), Value::int(1)),
            (Value::str("fr"), Value::int(2)),
        ]))
    }

    #[test]
    fn test_select_probe_reports_entry_or_miss() {
        let lookup = SymExpr::Subscript(table().boxed(), SymExpr::Input(0).boxed());
        assert_eq!(
            Probe::Select.observe(&lookup, &[Value::str("fr")]),
            Some(Outcome::Selects(1))
        );
        assert_eq!(
            Probe::Select.observe(&lookup, &[Value::str("de")]),
            Some(Outcome::Raises(ErrorKind::KeyError))
        );
        assert_eq!(
            Probe::Select.observe(&lookup, &[Value::List(vec![])]),
            Some(Outcome::Raises(ErrorKind::TypeError))
        );
    }

    #[test]
    fn test_opaque_terms_fault() {
        let e = SymExpr::Binary(BinOp::Add, SymExpr::Opaque(3).boxed(), SymExpr::Input(0).boxed());
        assert!(e.has_opaque());
        assert_eq!(Probe::Truthy.observe(&e, &[Value::int(1)]), None);
        assert_eq!(e.symbols(), vec![0]);
    }

    #[test]
    fn test_mutate_keeps_receiver_and_result_apart() {
        let list = SymExpr::Input(0);
        let popped = SymExpr::Mutate {
            receiver: list.clone().boxed(),
            method: "pop".to_string(),
            args: vec![],
            result: true,
        };
        let rest = SymExpr::Mutate {
            receiver: list.boxed(),
            method: "pop".to_string(),
            args: vec![],
            result: false,
        };
        let input = [Value::List(vec![Value::int(1), Value::int(2)])];
        assert_eq!(popped.eval(&input).unwrap(), Value::int(2));
        assert_eq!(rest.eval(&input).unwrap(), Value::List(vec![Value::int(1)]));
    }

    #[test]
    fn test_constraint_checks_domains_and_atoms() {
        let mut c = Constraint::new(vec![TypeTag::Integer]);
        c.push(Atom::new(
            SymExpr::Compare(
                CmpOp::Gt,
                SymExpr::Input(0).boxed(),
                SymExpr::Const(Value::int(3)).boxed(),
            ),
            Probe::Truthy,
            Outcome::Holds(true),
        ));
        assert!(c.holds_for(&[Value::int(4)]));
        assert!(!c.holds_for(&[Value::int(3)]));
        assert!(!c.holds_for(&[Value::Float(4.0)]));
    }
}
