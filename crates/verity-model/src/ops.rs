//! Operator semantics shared by the concrete runner and the solver's
//! candidate evaluation. Both must agree exactly, so there is one copy.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Pow, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, OpError};
use crate::value::Value;

/// Longest sequence an operation may build before it counts as memory exhaustion.
pub const MAX_SEQUENCE_LEN: usize = 1 << 20;

/// Largest integer exponent evaluated exactly.
const MAX_INT_EXPONENT: u32 = 4096;

/// Widest integer result an operation may produce, in bits.
pub const MAX_INT_BITS: u64 = 1 << 16;

fn check_int_bits(bits: u64) -> Result<(), OpError> {
    if bits > MAX_INT_BITS {
        return Err(OpError::fault(format!(
            "integer result of about {bits} bits exceeds memory limit"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

enum Num {
    Int(BigInt),
    Float(f64),
    Complex(f64, f64),
}

impl Num {
    fn of(v: &Value) -> Option<Num> {
        match v {
            Value::Bool(b) => Some(Num::Int(BigInt::from(u8::from(*b)))),
            Value::Int(i) => Some(Num::Int(i.clone())),
            Value::Float(f) => Some(Num::Float(*f)),
            Value::Complex { re, im } => Some(Num::Complex(*re, *im)),
            _ => None,
        }
    }

    fn level(&self) -> u8 {
        match self {
            Num::Int(_) => 0,
            Num::Float(_) => 1,
            Num::Complex(..) => 2,
        }
    }

    fn to_f64(&self) -> Result<f64, OpError> {
        match self {
            Num::Int(i) => int_to_f64(i),
            Num::Float(f) => Ok(*f),
            Num::Complex(re, _) => Ok(*re),
        }
    }

    fn to_complex(&self) -> Result<(f64, f64), OpError> {
        match self {
            Num::Complex(re, im) => Ok((*re, *im)),
            other => Ok((other.to_f64()?, 0.0)),
        }
    }
}

pub fn int_to_f64(i: &BigInt) -> Result<f64, OpError> {
    match i.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(OpError::raise(
            ErrorKind::OverflowError,
            "int too large to convert to float",
        )),
    }
}

fn unsupported_operands(op: BinOp, l: &Value, r: &Value) -> OpError {
    if op == BinOp::Add && matches!(l, Value::Str(_)) {
        return OpError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            r.type_name()
        ));
    }
    if op == BinOp::Add && matches!(l, Value::List(_)) {
        return OpError::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            r.type_name()
        ));
    }
    OpError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

fn check_len(len: usize) -> Result<(), OpError> {
    if len > MAX_SEQUENCE_LEN {
        Err(OpError::fault("sequence exceeds memory limit"))
    } else {
        Ok(())
    }
}

fn repeat<T: Clone>(items: &[T], count: &BigInt) -> Result<Vec<T>, OpError> {
    let n = if count.is_negative() {
        0
    } else {
        count
            .to_usize()
            .ok_or_else(|| OpError::fault("repeat count exceeds memory limit"))?
    };
    check_len(items.len().saturating_mul(n))?;
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn sequence_binary(op: BinOp, l: &Value, r: &Value) -> Option<Result<Value, OpError>> {
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Some(
            check_len(a.len() + b.len()).map(|_| Value::Str(format!("{}{}", a, b))),
        ),
        (BinOp::Add, Value::Bytes(a), Value::Bytes(b)) => Some(
            check_len(a.len() + b.len())
                .map(|_| Value::Bytes([a.as_slice(), b.as_slice()].concat())),
        ),
        (BinOp::Add, Value::List(a), Value::List(b)) => Some(
            check_len(a.len() + b.len())
                .map(|_| Value::List([a.as_slice(), b.as_slice()].concat())),
        ),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => Some(
            check_len(a.len() + b.len())
                .map(|_| Value::Tuple([a.as_slice(), b.as_slice()].concat())),
        ),
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
            if n.as_bigint().is_some()
                && matches!(
                    seq,
                    Value::Str(_) | Value::Bytes(_) | Value::List(_) | Value::Tuple(_)
                ) =>
        {
            let count = n.as_bigint()?;
            Some(match seq {
                Value::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    repeat(&chars, &count).map(|c| Value::Str(c.into_iter().collect()))
                }
                Value::Bytes(b) => repeat(b, &count).map(Value::Bytes),
                Value::List(v) => repeat(v, &count).map(Value::List),
                Value::Tuple(v) => repeat(v, &count).map(Value::Tuple),
                _ => return None,
            })
        }
        (BinOp::Mod, Value::Str(_), _) | (BinOp::Mod, Value::Bytes(_), _) => Some(Err(
            OpError::fault("printf-style formatting is not modelled"),
        )),
        _ => None,
    }
}

fn floor_div_mod(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    let mut q = a / b;
    let mut r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        q -= BigInt::from(1);
        r += b;
    }
    (q, r)
}

fn int_binary(op: BinOp, a: BigInt, b: BigInt) -> Result<Value, OpError> {
    match op {
        BinOp::Add => Ok(Value::Int(a + b)),
        BinOp::Sub => Ok(Value::Int(a - b)),
        BinOp::Mul => {
            check_int_bits(a.bits() + b.bits())?;
            Ok(Value::Int(a * b))
        }
        BinOp::Div => {
            if b.is_zero() {
                return Err(OpError::raise(ErrorKind::ZeroDivisionError, "division by zero"));
            }
            float_binary(op, int_to_f64(&a)?, int_to_f64(&b)?)
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            Ok(Value::Int(floor_div_mod(&a, &b).0))
        }
        BinOp::Mod => {
            if b.is_zero() {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "integer modulo by zero",
                ));
            }
            Ok(Value::Int(floor_div_mod(&a, &b).1))
        }
        BinOp::Pow => {
            if b.is_negative() {
                if a.is_zero() {
                    return Err(OpError::raise(
                        ErrorKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return float_binary(op, int_to_f64(&a)?, int_to_f64(&b)?);
            }
            let exp = b.to_u32().filter(|e| *e <= MAX_INT_EXPONENT);
            match exp {
                Some(e) => {
                    // |a| <= 1 stays small whatever the exponent.
                    if a.bits() > 1 {
                        check_int_bits(a.bits().saturating_mul(u64::from(e)))?;
                    }
                    Ok(Value::Int(Pow::pow(&a, e)))
                }
                None if a.abs() <= BigInt::from(1) => {
                    let odd = (&b % BigInt::from(2)) == BigInt::from(1);
                    if a.is_negative() && odd {
                        Ok(Value::int(-1))
                    } else if a.is_zero() {
                        Ok(Value::int(0))
                    } else {
                        Ok(Value::int(1))
                    }
                }
                None => Err(OpError::fault("integer power exceeds memory limit")),
            }
        }
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value, OpError> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "float division by zero",
                ));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "float floor division by zero",
                ));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(OpError::raise(ErrorKind::ZeroDivisionError, "float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
                return Err(OpError::fault("complex result of float power is not modelled"));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(OpError::raise(
                    ErrorKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            r
        }
    };
    Ok(Value::Float(v))
}

fn complex_binary(op: BinOp, (ar, ai): (f64, f64), (br, bi): (f64, f64)) -> Result<Value, OpError> {
    let (re, im) = match op {
        BinOp::Add => (ar + br, ai + bi),
        BinOp::Sub => (ar - br, ai - bi),
        BinOp::Mul => (ar * br - ai * bi, ar * bi + ai * br),
        BinOp::Div => {
            let denom = br * br + bi * bi;
            if denom == 0.0 {
                return Err(OpError::raise(
                    ErrorKind::ZeroDivisionError,
                    "complex division by zero",
                ));
            }
            ((ar * br + ai * bi) / denom, (ai * br - ar * bi) / denom)
        }
        BinOp::FloorDiv | BinOp::Mod => {
            return Err(OpError::type_error(format!(
                "unsupported operand type(s) for {}: 'complex' and 'complex'",
                op.symbol()
            )))
        }
        BinOp::Pow => return Err(OpError::fault("complex power is not modelled")),
    };
    Ok(Value::Complex { re, im })
}

/// Evaluate `l <op> r`.
pub fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, OpError> {
    if let Some(result) = sequence_binary(op, l, r) {
        return result;
    }
    let (a, b) = match (Num::of(l), Num::of(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported_operands(op, l, r)),
    };
    match a.level().max(b.level()) {
        0 => match (a, b) {
            (Num::Int(x), Num::Int(y)) => int_binary(op, x, y),
            _ => Err(unsupported_operands(op, l, r)),
        },
        1 => float_binary(op, a.to_f64()?, b.to_f64()?),
        _ => complex_binary(op, a.to_complex()?, b.to_complex()?),
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> Result<Value, OpError> {
    let bad = || {
        OpError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            unary_symbol(op),
            v.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Invert => match v.as_bigint() {
            Some(i) => Ok(Value::Int(-i - 1)),
            None => Err(bad()),
        },
        UnaryOp::Neg | UnaryOp::Pos => {
            let neg = op == UnaryOp::Neg;
            match Num::of(v).ok_or_else(bad)? {
                Num::Int(i) => Ok(Value::Int(if neg { -i } else { i })),
                Num::Float(f) => Ok(Value::Float(if neg { -f } else { f })),
                Num::Complex(re, im) => Ok(if neg {
                    Value::Complex { re: -re, im: -im }
                } else {
                    Value::Complex { re, im }
                }),
            }
        }
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Not => "not",
        UnaryOp::Invert => "~",
    }
}

/// Language-level equality (`==`).
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| py_eq(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .find(|(k2, _)| py_eq(k, k2))
                        .map(|(_, v2)| py_eq(v, v2))
                        .unwrap_or(false)
                })
        }
        _ => match (Num::of(a), Num::of(b)) {
            (Some(x), Some(y)) => num_eq(&x, &y),
            _ => false,
        },
    }
}

fn num_eq(a: &Num, b: &Num) -> bool {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Int(i), Num::Float(f)) | (Num::Float(f), Num::Int(i)) => {
            f.is_finite() && f.fract() == 0.0 && BigInt::from_f64(*f).as_ref() == Some(i)
        }
        (Num::Float(x), Num::Float(y)) => x == y,
        (x, y) => match (x.to_complex(), y.to_complex()) {
            (Ok(p), Ok(q)) => p == q,
            _ => false,
        },
    }
}

fn not_supported(op: CmpOp, a: &Value, b: &Value) -> OpError {
    OpError::type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Ordering for `<`-family comparisons. `Ok(None)` means unordered (nan).
fn py_order(op: CmpOp, a: &Value, b: &Value) -> Result<Option<Ordering>, OpError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y) {
                if !py_eq(p, q) {
                    return py_order(op, p, q);
                }
            }
            Ok(Some(x.len().cmp(&y.len())))
        }
        _ => match (Num::of(a), Num::of(b)) {
            (Some(Num::Complex(..)), Some(_)) | (Some(_), Some(Num::Complex(..))) => {
                Err(not_supported(op, a, b))
            }
            (Some(Num::Int(x)), Some(Num::Int(y))) => Ok(Some(x.cmp(&y))),
            (Some(x), Some(y)) => {
                let (p, q) = (num_as_order_f64(&x), num_as_order_f64(&y));
                Ok(p.partial_cmp(&q))
            }
            _ => Err(not_supported(op, a, b)),
        },
    }
}

fn num_as_order_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => i.to_f64().unwrap_or(if i.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        Num::Float(f) => *f,
        Num::Complex(re, _) => *re,
    }
}

/// `needle in haystack`.
pub fn contains(haystack: &Value, needle: &Value) -> Result<bool, OpError> {
    match haystack {
        Value::Str(h) => match needle {
            Value::Str(n) => Ok(h.contains(n.as_str())),
            other => Err(OpError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(h) => match needle {
            Value::Bytes(n) => Ok(n.is_empty() || h.windows(n.len()).any(|w| w == n.as_slice())),
            other => match other.as_i64() {
                Some(i) if (0..256).contains(&i) => Ok(h.contains(&(i as u8))),
                Some(_) => Err(OpError::raise(
                    ErrorKind::ValueError,
                    "byte must be in range(0, 256)",
                )),
                None => Err(OpError::type_error(format!(
                    "a bytes-like object is required, not '{}'",
                    other.type_name()
                ))),
            },
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|i| py_eq(i, needle))),
        Value::Dict(_) => Ok(dict_index(haystack, needle)?.is_some()),
        other => Err(OpError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Evaluate a comparison to a boolean.
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, OpError> {
    match op {
        CmpOp::Eq => Ok(py_eq(a, b)),
        CmpOp::Ne => Ok(!py_eq(a, b)),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|c| !c),
        CmpOp::Is | CmpOp::IsNot => {
            let same = match (a, b) {
                (Value::None, Value::None) => true,
                (Value::Bool(x), Value::Bool(y)) => x == y,
                (Value::None, _) | (_, Value::None) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                    false
                }
                _ => return Err(OpError::fault("object identity is not modelled")),
            };
            Ok(if op == CmpOp::Is { same } else { !same })
        }
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = match py_order(op, a, b)? {
                Some(o) => o,
                None => return Ok(false),
            };
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

/// Total order used by `sorted`, `min` and `max`.
pub fn py_less(a: &Value, b: &Value) -> Result<bool, OpError> {
    compare(CmpOp::Lt, a, b)
}

pub fn check_hashable(key: &Value) -> Result<(), OpError> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(OpError::type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

/// Position of `key` among the keys of a dict value.
pub fn dict_index(dict: &Value, key: &Value) -> Result<Option<usize>, OpError> {
    check_hashable(key)?;
    match dict {
        Value::Dict(pairs) => Ok(pairs.iter().position(|(k, _)| py_eq(k, key))),
        _ => Ok(None),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<Option<usize>, OpError> {
    let i = index.as_bigint().ok_or_else(|| {
        OpError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            what,
            index.type_name()
        ))
    })?;
    let len_big = BigInt::from(len);
    let pos = if i.is_negative() { i + &len_big } else { i };
    if pos.is_negative() || pos >= len_big {
        Ok(None)
    } else {
        Ok(pos.to_usize())
    }
}

/// Index of the entry `base[key]` selects: the key position for dicts, the
/// normalized index for sequences. Raises exactly as `subscript` would.
pub fn select_index(base: &Value, key: &Value) -> Result<usize, OpError> {
    let (len, what, kind) = match base {
        Value::Dict(_) => {
            return dict_index(base, key)?
                .ok_or_else(|| OpError::raise(ErrorKind::KeyError, key.repr()))
        }
        Value::List(v) => (v.len(), "list", "list index out of range"),
        Value::Tuple(v) => (v.len(), "tuple", "tuple index out of range"),
        Value::Str(s) => (s.chars().count(), "string", "string index out of range"),
        Value::Bytes(b) => (b.len(), "byte", "index out of range"),
        other => {
            return Err(OpError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )))
        }
    };
    normalize_index(key, len, what)?.ok_or_else(|| OpError::raise(ErrorKind::IndexError, kind))
}

/// Entry `index` of a container, as selected by `select_index`.
pub fn entry_at(base: &Value, index: usize) -> Option<Value> {
    match base {
        Value::Dict(pairs) => pairs.get(index).map(|(_, v)| v.clone()),
        Value::List(v) | Value::Tuple(v) => v.get(index).cloned(),
        Value::Str(s) => s.chars().nth(index).map(|c| Value::Str(c.to_string())),
        Value::Bytes(b) => b.get(index).map(|x| Value::int(i64::from(*x))),
        _ => None,
    }
}

/// Number of entries `select_index` can produce for a container.
pub fn entry_count(base: &Value) -> Option<usize> {
    match base {
        Value::Dict(pairs) => Some(pairs.len()),
        Value::List(v) | Value::Tuple(v) => Some(v.len()),
        Value::Str(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        _ => None,
    }
}

/// `base[key]`.
pub fn subscript(base: &Value, key: &Value) -> Result<Value, OpError> {
    let index = select_index(base, key)?;
    entry_at(base, index).ok_or_else(|| OpError::fault("selected entry vanished"))
}

fn slice_bound(v: Option<&Value>, len: usize, default: usize) -> Result<usize, OpError> {
    let v = match v {
        None | Some(Value::None) => return Ok(default),
        Some(v) => v,
    };
    let i = v.as_bigint().ok_or_else(|| {
        OpError::type_error("slice indices must be integers or None or have an __index__ method")
    })?;
    let len_big = BigInt::from(len);
    let pos = if i.is_negative() { i + &len_big } else { i };
    Ok(if pos.is_negative() {
        0
    } else if pos > len_big {
        len
    } else {
        pos.to_usize().unwrap_or(len)
    })
}

/// `base[lower:upper]`.
pub fn slice(base: &Value, lower: Option<&Value>, upper: Option<&Value>) -> Result<Value, OpError> {
    let len = match base {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(v) | Value::Tuple(v) => v.len(),
        Value::Dict(_) => return Err(OpError::type_error("unhashable type: 'slice'")),
        other => {
            return Err(OpError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )))
        }
    };
    let lo = slice_bound(lower, len, 0)?;
    let hi = slice_bound(upper, len, len)?.max(lo);
    Ok(match base {
        Value::Str(s) => Value::Str(s.chars().skip(lo).take(hi - lo).collect()),
        Value::Bytes(b) => Value::Bytes(b[lo..hi].to_vec()),
        Value::List(v) => Value::List(v[lo..hi].to_vec()),
        Value::Tuple(v) => Value::Tuple(v[lo..hi].to_vec()),
        _ => Value::None,
    })
}

/// `base[key] = value`, in place.
pub fn set_item(base: &mut Value, key: Value, value: Value) -> Result<(), OpError> {
    match base {
        Value::Dict(_) => {
            let found = dict_index(base, &key)?;
            if let Value::Dict(pairs) = base {
                match found {
                    Some(i) => pairs[i].1 = value,
                    None => pairs.push((key, value)),
                }
            }
            Ok(())
        }
        Value::List(items) => {
            let i = normalize_index(&key, items.len(), "list")?.ok_or_else(|| {
                OpError::raise(ErrorKind::IndexError, "list assignment index out of range")
            })?;
            items[i] = value;
            Ok(())
        }
        other => Err(OpError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `del base[key]`, in place.
pub fn del_item(base: &mut Value, key: &Value) -> Result<(), OpError> {
    match base {
        Value::Dict(_) => {
            let found = dict_index(base, key)?;
            match (found, base) {
                (Some(i), Value::Dict(pairs)) => {
                    pairs.remove(i);
                    Ok(())
                }
                _ => Err(OpError::raise(ErrorKind::KeyError, key.repr())),
            }
        }
        Value::List(items) => {
            let i = normalize_index(key, items.len(), "list")?.ok_or_else(|| {
                OpError::raise(ErrorKind::IndexError, "list assignment index out of range")
            })?;
            items.remove(i);
            Ok(())
        }
        other => Err(OpError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Items produced by iterating over a value.
pub fn iterate(v: &Value) -> Result<Vec<Value>, OpError> {
    match v {
        Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Bytes(b) => Ok(b.iter().map(|x| Value::int(i64::from(*x))).collect()),
        Value::Dict(pairs) => Ok(pairs.iter().map(|(k, _)| k.clone()).collect()),
        other => Err(OpError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// `len(v)`.
pub fn length(v: &Value) -> Result<usize, OpError> {
    match v {
        Value::Str(s) => Ok(s.chars().count()),
        Value::Bytes(b) => Ok(b.len()),
        Value::List(items) | Value::Tuple(items) => Ok(items.len()),
        Value::Dict(pairs) => Ok(pairs.len()),
        other => Err(OpError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

/// Non-call attribute access (`v.real`).
pub fn attribute(v: &Value, name: &str) -> Result<Value, OpError> {
    match (v, name) {
        (Value::Bool(_) | Value::Int(_), "real") => {
            Ok(Value::Int(v.as_bigint().unwrap_or_default()))
        }
        (Value::Bool(_) | Value::Int(_), "imag") => Ok(Value::int(0)),
        (Value::Float(f), "real") => Ok(Value::Float(*f)),
        (Value::Float(_), "imag") => Ok(Value::Float(0.0)),
        (Value::Complex { re, .. }, "real") => Ok(Value::Float(*re)),
        (Value::Complex { im, .. }, "imag") => Ok(Value::Float(*im)),
        _ => Err(OpError::raise(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", v.type_name(), name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raised_kind(r: Result<Value, OpError>) -> ErrorKind {
        match r {
            Err(OpError::Raised(e)) => e.kind,
            other => panic!("expected raised error, got {:?}", other),
        }
    }

    #[test]
    fn floor_division_rounds_down() {
        assert_eq!(
            binary(BinOp::FloorDiv, &Value::int(-7), &Value::int(2)).unwrap(),
            Value::int(-4)
        );
        assert_eq!(binary(BinOp::Mod, &Value::int(-7), &Value::int(2)).unwrap(), Value::int(1));
        assert_eq!(binary(BinOp::Mod, &Value::int(7), &Value::int(-2)).unwrap(), Value::int(-1));
    }

    #[test]
    fn oversized_integer_results_are_faults() {
        let big = binary(BinOp::Pow, &Value::int(2), &Value::int(4000)).unwrap();
        assert!(matches!(binary(BinOp::Pow, &big, &Value::int(4000)), Err(OpError::Fault(_))));
        let mut wide = Value::int(3);
        for _ in 0..15 {
            wide = binary(BinOp::Mul, &wide, &wide).unwrap();
        }
        assert!(matches!(binary(BinOp::Mul, &wide, &wide), Err(OpError::Fault(_))));
        assert_eq!(binary(BinOp::Pow, &Value::int(-1), &Value::int(4001)).unwrap(), Value::int(-1));
    }

    #[test]
    fn zero_division_is_raised() {
        let k = raised_kind(binary(BinOp::Div, &Value::int(1), &Value::int(0)));
        assert_eq!(k, ErrorKind::ZeroDivisionError);
        let k = raised_kind(binary(BinOp::Mod, &Value::Float(1.0), &Value::Float(0.0)));
        assert_eq!(k, ErrorKind::ZeroDivisionError);
    }

    #[test]
    fn float_overflow_produces_infinity() {
        let v = binary(BinOp::Mul, &Value::Float(1e300), &Value::Float(1e300)).unwrap();
        assert_eq!(v, Value::Float(f64::INFINITY));
        let k = raised_kind(binary(BinOp::Pow, &Value::Float(10.0), &Value::Float(400.0)));
        assert_eq!(k, ErrorKind::OverflowError);
    }

    #[test]
    fn mixed_type_addition_raises_type_error() {
        let err = binary(BinOp::Add, &Value::str("a"), &Value::int(1)).unwrap_err();
        assert_eq!(
            err,
            OpError::type_error("can only concatenate str (not \"int\") to str")
        );
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(py_eq(&Value::int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::int(1)));
        assert!(py_eq(&Value::complex(2.0, 0.0), &Value::int(2)));
        assert!(!py_eq(&Value::str("1"), &Value::int(1)));
        assert!(!py_eq(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
    }

    #[test]
    fn ordering_rejects_mixed_types() {
        assert!(compare(CmpOp::Lt, &Value::int(1), &Value::Float(1.5)).unwrap());
        let err = compare(CmpOp::Lt, &Value::str("a"), &Value::int(1)).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::TypeError));
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::int(1)).unwrap());
    }

    #[test]
    fn dict_lookup_misses_with_key_error() {
        let d = Value::Dict(vec![(Value::str("hello"), Value::str("hola"))]);
        assert_eq!(subscript(&d, &Value::str("hello")).unwrap(), Value::str("hola"));
        let err = subscript(&d, &Value::str("bye")).unwrap_err();
        assert_eq!(err, OpError::raise(ErrorKind::KeyError, "'bye'"));
        let err = subscript(&d, &Value::List(vec![])).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::TypeError));
    }

    #[test]
    fn sequence_indexing_normalizes() {
        let l = Value::List(vec![Value::int(10), Value::int(20)]);
        assert_eq!(select_index(&l, &Value::int(-1)).unwrap(), 1);
        assert_eq!(
            raised_kind(subscript(&l, &Value::int(2))),
            ErrorKind::IndexError
        );
        assert_eq!(
            raised_kind(subscript(&l, &Value::str("0"))),
            ErrorKind::TypeError
        );
    }

    #[test]
    fn slices_clamp() {
        let s = Value::str("hello");
        assert_eq!(
            slice(&s, Some(&Value::int(1)), Some(&Value::int(3))).unwrap(),
            Value::str("el")
        );
        assert_eq!(slice(&s, Some(&Value::int(-2)), None).unwrap(), Value::str("lo"));
        assert_eq!(slice(&s, Some(&Value::int(9)), None).unwrap(), Value::str(""));
    }

    #[test]
    fn huge_repeat_is_a_fault() {
        let r = binary(BinOp::Mul, &Value::str("ab"), &Value::int(1 << 40));
        assert!(matches!(r, Err(OpError::Fault(_))));
    }

    #[test]
    fn membership() {
        let d = Value::Dict(vec![(Value::int(1), Value::None)]);
        assert!(compare(CmpOp::In, &Value::Float(1.0), &d).unwrap());
        assert!(compare(CmpOp::NotIn, &Value::str("x"), &Value::str("abc")).unwrap());
        let err = compare(CmpOp::In, &Value::int(1), &Value::int(2)).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::TypeError));
    }
}
