//! Built-in functions and methods of the target language.
//!
//! Everything here is a pure function of its arguments except `id`, which the
//! interpreter handles itself. The solver reuses [`call_pure`] and
//! [`call_method`] to evaluate candidate inputs, so the two never disagree.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use verity_model::ops::{self, MAX_SEQUENCE_LEN};
use verity_model::{BinOp, ErrorKind, OpError, Value};

pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs", "bool", "chr", "complex", "dict", "float", "hash", "id", "int", "isinstance", "len",
    "list", "max", "min", "ord", "print", "range", "repr", "round", "sorted", "str", "sum",
    "tuple",
];

const MUTATING_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "sort", "reverse", "clear", "setdefault",
    "update", "popitem",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

/// Built-ins whose result is not a function of their arguments.
pub fn is_impure(name: &str) -> bool {
    name == "id"
}

pub fn is_mutating(method: &str) -> bool {
    MUTATING_METHODS.contains(&method)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), OpError> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let msg = if min == max {
        let plural = if min == 1 { "" } else { "s" };
        format!("{name}() takes exactly {min} argument{plural} ({n} given)")
    } else if n < min {
        let plural = if min == 1 { "" } else { "s" };
        format!("{name}() expected at least {min} argument{plural}, got {n}")
    } else {
        format!("{name}() expected at most {max} arguments, got {n}")
    };
    Err(OpError::type_error(msg))
}

fn guard_len(len: usize) -> Result<(), OpError> {
    if len > MAX_SEQUENCE_LEN {
        Err(OpError::fault("sequence exceeds memory limit"))
    } else {
        Ok(())
    }
}

fn index_arg(v: &Value) -> Result<BigInt, OpError> {
    v.as_bigint().ok_or_else(|| {
        OpError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            v.type_name()
        ))
    })
}

/// Call a pure built-in function.
pub fn call_pure(name: &str, args: &[Value]) -> Result<Value, OpError> {
    match name {
        "len" => {
            arity(name, args, 1, 1)?;
            Ok(Value::int(ops::length(&args[0])? as i64))
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            abs(&args[0])
        }
        "int" => {
            arity(name, args, 0, 1)?;
            args.first().map_or(Ok(Value::int(0)), to_int)
        }
        "float" => {
            arity(name, args, 0, 1)?;
            args.first().map_or(Ok(Value::Float(0.0)), to_float)
        }
        "complex" => {
            arity(name, args, 0, 2)?;
            to_complex(args)
        }
        "str" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_text).unwrap_or_default()))
        }
        "repr" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Str(args[0].repr()))
        }
        "bool" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        "hash" => {
            arity(name, args, 1, 1)?;
            hash(&args[0])
        }
        "min" | "max" => extremum(name, args),
        "sum" => {
            arity(name, args, 1, 2)?;
            let start = args.get(1).cloned().unwrap_or_else(|| Value::int(0));
            if matches!(start, Value::Str(_)) {
                return Err(OpError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            ops::iterate(&args[0])?
                .iter()
                .try_fold(start, |acc, item| ops::binary(BinOp::Add, &acc, item))
        }
        "sorted" => {
            arity(name, args, 1, 1)?;
            Ok(Value::List(sort_values(ops::iterate(&args[0])?)?))
        }
        "list" => {
            arity(name, args, 0, 1)?;
            Ok(Value::List(match args.first() {
                Some(v) => ops::iterate(v)?,
                None => Vec::new(),
            }))
        }
        "tuple" => {
            arity(name, args, 0, 1)?;
            Ok(Value::Tuple(match args.first() {
                Some(v) => ops::iterate(v)?,
                None => Vec::new(),
            }))
        }
        "dict" => {
            arity(name, args, 0, 1)?;
            let mut dict = Value::Dict(Vec::new());
            if let Some(source) = args.first() {
                update_dict(&mut dict, source)?;
            }
            Ok(dict)
        }
        "range" => {
            arity(name, args, 1, 3)?;
            range(args)
        }
        "ord" => {
            arity(name, args, 1, 1)?;
            ord(&args[0])
        }
        "chr" => {
            arity(name, args, 1, 1)?;
            chr(&args[0])
        }
        "round" => {
            arity(name, args, 1, 2)?;
            round(&args[0], args.get(1))
        }
        "print" => Ok(Value::None),
        _ => Err(OpError::fault(format!("'{name}' is not a pure built-in"))),
    }
}

/// `isinstance(v, (T1, T2, ...))` over type names.
pub fn isinstance(v: &Value, names: &[String]) -> Result<bool, OpError> {
    let mut hit = false;
    for name in names {
        hit |= match name.as_str() {
            "int" => matches!(v, Value::Int(_) | Value::Bool(_)),
            "bool" => matches!(v, Value::Bool(_)),
            "float" => matches!(v, Value::Float(_)),
            "complex" => matches!(v, Value::Complex { .. }),
            "str" => matches!(v, Value::Str(_)),
            "bytes" => matches!(v, Value::Bytes(_)),
            "list" => matches!(v, Value::List(_)),
            "tuple" => matches!(v, Value::Tuple(_)),
            "dict" => matches!(v, Value::Dict(_)),
            "object" => true,
            _ => {
                return Err(OpError::type_error(
                    "isinstance() arg 2 must be a type, a tuple of types, or a union",
                ))
            }
        };
    }
    Ok(hit)
}

fn abs(v: &Value) -> Result<Value, OpError> {
    match v {
        Value::Bool(_) | Value::Int(_) => Ok(Value::Int(v.as_bigint().unwrap_or_default().abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Complex { re, im } => {
            let h = re.hypot(*im);
            if h.is_infinite() && re.is_finite() && im.is_finite() {
                Err(OpError::raise(ErrorKind::OverflowError, "absolute value too large"))
            } else {
                Ok(Value::Float(h))
            }
        }
        other => Err(OpError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int_text(text: &str) -> Option<BigInt> {
    let t = text.trim();
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    let clean: String = digits.chars().filter(|c| *c != '_').collect();
    let n = BigInt::parse_bytes(clean.as_bytes(), 10)?;
    Some(if neg { -n } else { n })
}

fn to_int(v: &Value) -> Result<Value, OpError> {
    match v {
        Value::Bool(_) | Value::Int(_) => Ok(Value::Int(v.as_bigint().unwrap_or_default())),
        Value::Float(f) if f.is_nan() => Err(OpError::raise(
            ErrorKind::ValueError,
            "cannot convert float NaN to integer",
        )),
        Value::Float(f) if f.is_infinite() => Err(OpError::raise(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        )),
        Value::Float(f) => BigInt::from_f64(f.trunc())
            .map(Value::Int)
            .ok_or_else(|| OpError::fault("float to int conversion failed")),
        Value::Str(s) => parse_int_text(s).map(Value::Int).ok_or_else(|| {
            OpError::raise(
                ErrorKind::ValueError,
                format!("invalid literal for int() with base 10: {}", v.repr()),
            )
        }),
        Value::Bytes(b) => std::str::from_utf8(b)
            .ok()
            .and_then(parse_int_text)
            .map(Value::Int)
            .ok_or_else(|| {
                OpError::raise(
                    ErrorKind::ValueError,
                    format!("invalid literal for int() with base 10: {}", v.repr()),
                )
            }),
        other => Err(OpError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_float_text(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() || t.contains('_') {
        return None;
    }
    t.parse::<f64>().ok()
}

fn to_float(v: &Value) -> Result<Value, OpError> {
    match v {
        Value::Bool(_) | Value::Int(_) => {
            let i = v.as_bigint().unwrap_or_default();
            match i.to_f64() {
                Some(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(OpError::raise(
                    ErrorKind::OverflowError,
                    "int too large to convert to float",
                )),
            }
        }
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => parse_float_text(s).map(Value::Float).ok_or_else(|| {
            OpError::raise(
                ErrorKind::ValueError,
                format!("could not convert string to float: {}", v.repr()),
            )
        }),
        Value::Bytes(b) => std::str::from_utf8(b)
            .ok()
            .and_then(parse_float_text)
            .map(Value::Float)
            .ok_or_else(|| {
                OpError::raise(
                    ErrorKind::ValueError,
                    format!("could not convert string to float: {}", v.repr()),
                )
            }),
        other => Err(OpError::type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn real_part(v: &Value) -> Result<(f64, f64), OpError> {
    match v {
        Value::Complex { re, im } => Ok((*re, *im)),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => match to_float(v)? {
            Value::Float(f) => Ok((f, 0.0)),
            _ => Err(OpError::fault("float conversion produced a non-float")),
        },
        other => Err(OpError::type_error(format!(
            "complex() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_complex(args: &[Value]) -> Result<Value, OpError> {
    match args {
        [] => Ok(Value::complex(0.0, 0.0)),
        [Value::Str(s)] => parse_float_text(s)
            .map(|f| Value::complex(f, 0.0))
            .ok_or_else(|| {
                OpError::raise(ErrorKind::ValueError, "complex() arg is a malformed string")
            }),
        [Value::Str(_), _] => Err(OpError::type_error(
            "complex() can't take second arg if first is a string",
        )),
        [re] => {
            let (r, i) = real_part(re)?;
            Ok(Value::complex(r, i))
        }
        [re, im] => {
            let (a, b) = real_part(re)?;
            let (c, d) = real_part(im)?;
            Ok(Value::complex(a - d, b + c))
        }
        _ => Err(OpError::type_error("complex() takes at most 2 arguments")),
    }
}

/// Hash of an integral value, reduced the way the language reduces integers.
fn hash(v: &Value) -> Result<Value, OpError> {
    ops::check_hashable(v)?;
    let modulus = BigInt::from((1u64 << 61) - 1);
    let integral = match v {
        Value::Bool(_) | Value::Int(_) => v.as_bigint(),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => BigInt::from_f64(*f),
        _ => None,
    };
    match integral {
        Some(i) => {
            let reduced = i.abs() % &modulus;
            let h = if i.is_negative() { -reduced } else { reduced };
            Ok(Value::Int(if h == BigInt::from(-1) { BigInt::from(-2) } else { h }))
        }
        None => Err(OpError::fault(format!(
            "hash of {} is not modelled",
            v.type_name()
        ))),
    }
}

fn extremum(name: &str, args: &[Value]) -> Result<Value, OpError> {
    let items = match args {
        [] => {
            return Err(OpError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        [single] => ops::iterate(single)?,
        many => many.to_vec(),
    };
    let mut iter = items.into_iter();
    let mut best = iter.next().ok_or_else(|| {
        OpError::raise(ErrorKind::ValueError, format!("{name}() arg is an empty sequence"))
    })?;
    for item in iter {
        let better = if name == "min" {
            ops::py_less(&item, &best)?
        } else {
            ops::py_less(&best, &item)?
        };
        if better {
            best = item;
        }
    }
    Ok(best)
}

/// Stable merge sort with fallible comparisons.
pub fn sort_values(mut items: Vec<Value>) -> Result<Vec<Value>, OpError> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = sort_values(items)?;
    let right = sort_values(right)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => ops::py_less(r, l)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn update_dict(dict: &mut Value, source: &Value) -> Result<(), OpError> {
    if let Value::Dict(pairs) = source {
        for (k, v) in pairs {
            ops::set_item(dict, k.clone(), v.clone())?;
        }
        return Ok(());
    }
    for (i, item) in ops::iterate(source)?.into_iter().enumerate() {
        let pair = ops::iterate(&item).map_err(|_| {
            OpError::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        match <[Value; 2]>::try_from(pair) {
            Ok([k, v]) => ops::set_item(dict, k, v)?,
            Err(pair) => {
                return Err(OpError::raise(
                    ErrorKind::ValueError,
                    format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        pair.len()
                    ),
                ))
            }
        }
    }
    Ok(())
}

fn range(args: &[Value]) -> Result<Value, OpError> {
    let ints = args.iter().map(index_arg).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (BigInt::zero(), stop.clone(), BigInt::from(1)),
        [start, stop] => (start.clone(), stop.clone(), BigInt::from(1)),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        _ => return Err(OpError::fault("range arity already checked")),
    };
    if step.is_zero() {
        return Err(OpError::raise(ErrorKind::ValueError, "range() arg 3 must not be zero"));
    }
    let mut items = Vec::new();
    let mut cur = start;
    while (step.is_positive() && cur < stop) || (step.is_negative() && cur > stop) {
        items.push(Value::Int(cur.clone()));
        guard_len(items.len())?;
        cur += &step;
    }
    Ok(Value::List(items))
}

fn ord(v: &Value) -> Result<Value, OpError> {
    let found = match v {
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => return Ok(Value::int(i64::from(u32::from(c)))),
                _ => format!("string of length {}", s.chars().count()),
            }
        }
        Value::Bytes(b) if b.len() == 1 => return Ok(Value::int(i64::from(b[0]))),
        Value::Bytes(b) => format!("bytes of length {}", b.len()),
        other => {
            return Err(OpError::type_error(format!(
                "ord() expected string of length 1, but {} found",
                other.type_name()
            )))
        }
    };
    Err(OpError::type_error(format!(
        "ord() expected a character, but {found} found"
    )))
}

fn chr(v: &Value) -> Result<Value, OpError> {
    let i = index_arg(v)?;
    let code = i
        .to_u32()
        .filter(|c| *c < 0x110000)
        .ok_or_else(|| OpError::raise(ErrorKind::ValueError, "chr() arg not in range(0x110000)"))?;
    char::from_u32(code)
        .map(|c| Value::Str(c.to_string()))
        .ok_or_else(|| OpError::fault("surrogate code points are not representable"))
}

fn round(v: &Value, ndigits: Option<&Value>) -> Result<Value, OpError> {
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(n) => Some(index_arg(n)?),
    };
    match (v, ndigits) {
        (Value::Bool(_) | Value::Int(_), _) => Ok(Value::Int(v.as_bigint().unwrap_or_default())),
        (Value::Float(f), None) => {
            if f.is_nan() {
                Err(OpError::raise(ErrorKind::ValueError, "cannot convert float NaN to integer"))
            } else if f.is_infinite() {
                Err(OpError::raise(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                ))
            } else {
                BigInt::from_f64(f.round_ties_even())
                    .map(Value::Int)
                    .ok_or_else(|| OpError::fault("float to int conversion failed"))
            }
        }
        (Value::Float(f), Some(n)) => {
            let n = n.to_i32().unwrap_or(0).clamp(-308, 308);
            let scale = 10f64.powi(n);
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        (other, _) => Err(OpError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn no_attribute(v: &Value, method: &str) -> OpError {
    OpError::raise(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", v.type_name(), method),
    )
}

fn str_arg<'a>(method: &str, v: &'a Value) -> Result<&'a str, OpError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(OpError::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn affix_matches(method: &str, subject: &Value, affix: &Value) -> Result<bool, OpError> {
    let check = |a: &Value| -> Result<bool, OpError> {
        match (subject, a) {
            (Value::Str(s), Value::Str(p)) => Ok(if method == "startswith" {
                s.starts_with(p.as_str())
            } else {
                s.ends_with(p.as_str())
            }),
            (Value::Bytes(s), Value::Bytes(p)) => Ok(if method == "startswith" {
                s.starts_with(p)
            } else {
                s.ends_with(p)
            }),
            (_, other) => Err(OpError::type_error(format!(
                "{method} first arg must be {} or a tuple of {}, not {}",
                subject.type_name(),
                subject.type_name(),
                other.type_name()
            ))),
        }
    };
    match affix {
        Value::Tuple(options) => {
            for o in options {
                if check(o)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        single => check(single),
    }
}

/// Decode bytes the way the language's strict codecs do.
pub fn decode(bytes: &[u8], encoding: &str) -> Result<Value, OpError> {
    let enc = encoding.to_ascii_lowercase().replace('_', "-");
    match enc.as_str() {
        "utf-8" | "utf8" => match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Value::str(s)),
            Err(e) => {
                let pos = e.valid_up_to();
                let byte = bytes.get(pos).copied().unwrap_or(0);
                let reason = match e.error_len() {
                    None => "unexpected end of data",
                    Some(_) if matches!(byte, 0x80..=0xc1 | 0xf5..=0xff) => "invalid start byte",
                    Some(_) => "invalid continuation byte",
                };
                Err(OpError::raise(
                    ErrorKind::UnicodeDecodeError,
                    format!(
                        "'utf-8' codec can't decode byte 0x{byte:02x} in position {pos}: {reason}"
                    ),
                ))
            }
        },
        "ascii" => match bytes.iter().position(|b| *b >= 0x80) {
            None => Ok(Value::Str(bytes.iter().map(|b| char::from(*b)).collect())),
            Some(pos) => Err(OpError::raise(
                ErrorKind::UnicodeDecodeError,
                format!(
                    "'ascii' codec can't decode byte 0x{:02x} in position {pos}: \
                         ordinal not in range(128)",
                    bytes[pos]
                ),
            )),
        },
        "latin-1" | "latin1" | "iso-8859-1" => {
            Ok(Value::Str(bytes.iter().map(|b| char::from(*b)).collect()))
        }
        _ => Err(OpError::raise(
            ErrorKind::Other("LookupError".to_string()),
            format!("unknown encoding: {encoding}"),
        )),
    }
}

fn encode(text: &str, encoding: &str) -> Result<Value, OpError> {
    let enc = encoding.to_ascii_lowercase().replace('_', "-");
    let narrow = |limit: u32, codec: &str| -> Result<Value, OpError> {
        let mut out = Vec::with_capacity(text.len());
        for (pos, c) in text.chars().enumerate() {
            let code = u32::from(c);
            if code >= limit {
                return Err(OpError::raise(
                    ErrorKind::Other("UnicodeEncodeError".to_string()),
                    format!(
                        "'{codec}' codec can't encode character '\\u{code:04x}' in position {pos}: \
                             ordinal not in range({limit})"
                    ),
                ));
            }
            out.push(code as u8);
        }
        Ok(Value::Bytes(out))
    };
    match enc.as_str() {
        "utf-8" | "utf8" => Ok(Value::Bytes(text.as_bytes().to_vec())),
        "ascii" => narrow(128, "ascii"),
        "latin-1" | "latin1" | "iso-8859-1" => narrow(256, "latin-1"),
        _ => Err(OpError::raise(
            ErrorKind::Other("LookupError".to_string()),
            format!("unknown encoding: {encoding}"),
        )),
    }
}

/// `'{} {0}'.format(...)` with positional fields only.
fn format_text(template: &str, args: &[Value]) -> Result<Value, OpError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(OpError::raise(
                                ErrorKind::ValueError,
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let index = if field.is_empty() {
                    auto += 1;
                    auto - 1
                } else {
                    field
                        .parse::<usize>()
                        .map_err(|_| OpError::fault("named or formatted fields are not modelled"))?
                };
                let arg = args.get(index).ok_or_else(|| {
                    OpError::raise(
                        ErrorKind::IndexError,
                        format!("Replacement index {index} out of range for positional args tuple"),
                    )
                })?;
                out.push_str(&arg.to_text());
            }
            '}' => {
                return Err(OpError::raise(
                    ErrorKind::ValueError,
                    "Single '}' encountered in format string",
                ))
            }
            other => out.push(other),
        }
    }
    Ok(Value::Str(out))
}

fn position_of(items: &[Value], needle: &Value) -> Option<usize> {
    items.iter().position(|i| ops::py_eq(i, needle))
}

fn str_method(s: &str, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, OpError> {
    let strip_set = |args: &[Value]| -> Result<Option<Vec<char>>, OpError> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(str_arg(method, v)?.chars().collect())),
        }
    };
    let text = |v: String| Ok(Value::Str(v));
    match method {
        "upper" => text(s.to_uppercase()),
        "lower" => text(s.to_lowercase()),
        "title" => {
            let mut out = String::new();
            let mut prev_cased = false;
            for c in s.chars() {
                if prev_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_cased = c.is_alphabetic();
            }
            text(out)
        }
        "capitalize" => {
            let mut chars = s.chars();
            text(match chars.next() {
                Some(first) => {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                }
                None => String::new(),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(method, args, 0, 1)?;
            let set = strip_set(args)?;
            let hit = |c: char| match &set {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match method {
                "strip" => s.trim_matches(hit).to_string(),
                "lstrip" => s.trim_start_matches(hit).to_string(),
                _ => s.trim_end_matches(hit).to_string(),
            })
        }
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "isupper" => Ok(Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase),
        )),
        "islower" => Ok(Value::Bool(
            s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
        )),
        "split" => {
            arity(method, args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = str_arg(method, sep)?;
                    if sep.is_empty() {
                        return Err(OpError::raise(ErrorKind::ValueError, "empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::List(parts))
        }
        "join" => {
            arity(method, args, 1, 1)?;
            let mut out = String::new();
            for (i, item) in ops::iterate(&args[0])?.iter().enumerate() {
                match item {
                    Value::Str(part) => {
                        if i > 0 {
                            out.push_str(s);
                        }
                        out.push_str(part);
                    }
                    other => {
                        return Err(OpError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
                guard_len(out.len())?;
            }
            text(out)
        }
        "replace" => {
            arity(method, args, 2, 2)?;
            let old = str_arg(method, &args[0])?;
            let new = str_arg(method, &args[1])?;
            let out = s.replace(old, new);
            guard_len(out.len())?;
            text(out)
        }
        "startswith" | "endswith" => {
            arity(method, args, 1, 1)?;
            Ok(Value::Bool(affix_matches(method, receiver, &args[0])?))
        }
        "find" | "index" | "count" => {
            arity(method, args, 1, 1)?;
            let sub = str_arg(method, &args[0])?;
            match method {
                "count" => Ok(Value::int(if sub.is_empty() {
                    s.chars().count() as i64 + 1
                } else {
                    s.matches(sub).count() as i64
                })),
                _ => match s.find(sub) {
                    Some(byte) => Ok(Value::int(s[..byte].chars().count() as i64)),
                    None if method == "find" => Ok(Value::int(-1)),
                    None => Err(OpError::raise(ErrorKind::ValueError, "substring not found")),
                },
            }
        }
        "encode" => {
            arity(method, args, 0, 1)?;
            let encoding = match args.first() {
                Some(v) => str_arg(method, v)?,
                None => "utf-8",
            };
            encode(s, encoding)
        }
        "format" => format_text(s, args),
        _ => Err(no_attribute(receiver, method)),
    }
}

fn bytes_method(
    b: &[u8],
    receiver: &Value,
    method: &str,
    args: &[Value],
) -> Result<Value, OpError> {
    match method {
        "decode" => {
            arity(method, args, 0, 2)?;
            let encoding = match args.first() {
                Some(v) => str_arg(method, v)?,
                None => "utf-8",
            };
            if let Some(errors) = args.get(1) {
                if str_arg(method, errors)? != "strict" {
                    return Err(OpError::fault("non-strict decode error handlers are not modelled"));
                }
            }
            decode(b, encoding)
        }
        "startswith" | "endswith" => {
            arity(method, args, 1, 1)?;
            Ok(Value::Bool(affix_matches(method, receiver, &args[0])?))
        }
        "upper" => Ok(Value::Bytes(b.to_ascii_uppercase())),
        "lower" => Ok(Value::Bytes(b.to_ascii_lowercase())),
        "strip" => {
            arity(method, args, 0, 0)?;
            let start = b.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(b.len());
            let end = b.iter().rposition(|c| !c.is_ascii_whitespace()).map_or(start, |e| e + 1);
            Ok(Value::Bytes(b[start..end.max(start)].to_vec()))
        }
        "hex" => Ok(Value::Str(b.iter().map(|x| format!("{x:02x}")).collect())),
        _ => Err(no_attribute(receiver, method)),
    }
}

/// Call a non-mutating method.
pub fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, OpError> {
    match receiver {
        Value::Str(s) => str_method(s, receiver, method, args),
        Value::Bytes(b) => bytes_method(b, receiver, method, args),
        Value::Dict(pairs) => match method {
            "get" => {
                arity(method, args, 1, 2)?;
                Ok(match ops::dict_index(receiver, &args[0])? {
                    Some(i) => pairs[i].1.clone(),
                    None => args.get(1).cloned().unwrap_or(Value::None),
                })
            }
            "keys" => Ok(Value::List(pairs.iter().map(|(k, _)| k.clone()).collect())),
            "values" => Ok(Value::List(pairs.iter().map(|(_, v)| v.clone()).collect())),
            "items" => Ok(Value::List(
                pairs
                    .iter()
                    .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )),
            "copy" => Ok(receiver.clone()),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::List(items) | Value::Tuple(items) => match method {
            "index" => {
                arity(method, args, 1, 1)?;
                position_of(items, &args[0])
                    .map(|i| Value::int(i as i64))
                    .ok_or_else(|| {
                        OpError::raise(
                            ErrorKind::ValueError,
                            format!("{} is not in {}", args[0].repr(), receiver.type_name()),
                        )
                    })
            }
            "count" => {
                arity(method, args, 1, 1)?;
                Ok(Value::int(
                    items.iter().filter(|i| ops::py_eq(i, &args[0])).count() as i64,
                ))
            }
            "copy" if matches!(receiver, Value::List(_)) => Ok(receiver.clone()),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::Bool(_) | Value::Int(_) => match method {
            "bit_length" => Ok(Value::int(
                v_bits(&receiver.as_bigint().unwrap_or_default()) as i64,
            )),
            "conjugate" => Ok(Value::Int(receiver.as_bigint().unwrap_or_default())),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::Float(f) => match method {
            "is_integer" => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
            "conjugate" => Ok(Value::Float(*f)),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::Complex { re, im } => match method {
            "conjugate" => Ok(Value::complex(*re, -im)),
            _ => Err(no_attribute(receiver, method)),
        },
        Value::None => Err(no_attribute(receiver, method)),
    }
}

fn v_bits(i: &BigInt) -> u64 {
    i.abs().bits()
}

/// Call a mutating method in place. `None` when the receiver has no such
/// mutating method; the caller then reports it through [`call_method`].
pub fn call_method_mut(
    receiver: &mut Value,
    method: &str,
    args: &[Value],
) -> Option<Result<Value, OpError>> {
    let result = match receiver {
        Value::List(items) => match method {
            "append" => arity(method, args, 1, 1).and_then(|_| {
                items.push(args[0].clone());
                guard_len(items.len()).map(|_| Value::None)
            }),
            "extend" => arity(method, args, 1, 1)
                .and_then(|_| ops::iterate(&args[0]))
                .and_then(|extra| {
                    items.extend(extra);
                    guard_len(items.len()).map(|_| Value::None)
                }),
            "insert" => arity(method, args, 2, 2).and_then(|_| {
                let i = index_arg(&args[0])?;
                let len = BigInt::from(items.len());
                let pos = if i.is_negative() { (i + &len).max(BigInt::zero()) } else { i.min(len) };
                items.insert(pos.to_usize().unwrap_or(0), args[1].clone());
                guard_len(items.len()).map(|_| Value::None)
            }),
            "pop" => arity(method, args, 0, 1).and_then(|_| {
                if items.is_empty() {
                    return Err(OpError::raise(ErrorKind::IndexError, "pop from empty list"));
                }
                let i = match args.first() {
                    Some(v) => index_arg(v)?,
                    None => BigInt::from(items.len() - 1),
                };
                let len = BigInt::from(items.len());
                let pos = if i.is_negative() { i + &len } else { i };
                match pos.to_usize().filter(|p| *p < items.len()) {
                    Some(p) => Ok(items.remove(p)),
                    None => Err(OpError::raise(ErrorKind::IndexError, "pop index out of range")),
                }
            }),
            "remove" => arity(method, args, 1, 1).and_then(|_| match position_of(items, &args[0]) {
                Some(p) => {
                    items.remove(p);
                    Ok(Value::None)
                }
                None => Err(OpError::raise(
                    ErrorKind::ValueError,
                    "list.remove(x): x not in list",
                )),
            }),
            "sort" => arity(method, args, 0, 0).and_then(|_| {
                *items = sort_values(std::mem::take(items))?;
                Ok(Value::None)
            }),
            "reverse" => arity(method, args, 0, 0).map(|_| {
                items.reverse();
                Value::None
            }),
            "clear" => arity(method, args, 0, 0).map(|_| {
                items.clear();
                Value::None
            }),
            _ => return None,
        },
        Value::Dict(_) => match method {
            "pop" => arity(method, args, 1, 2).and_then(|_| {
                match (ops::dict_index(receiver, &args[0])?, receiver) {
                    (Some(i), Value::Dict(pairs)) => Ok(pairs.remove(i).1),
                    _ => args
                        .get(1)
                        .cloned()
                        .ok_or_else(|| OpError::raise(ErrorKind::KeyError, args[0].repr())),
                }
            }),
            "popitem" => arity(method, args, 0, 0).and_then(|_| match receiver {
                Value::Dict(pairs) => pairs
                    .pop()
                    .map(|(k, v)| Value::Tuple(vec![k, v]))
                    .ok_or_else(|| {
                        OpError::raise(ErrorKind::KeyError, "'popitem(): dictionary is empty'")
                    }),
                _ => Err(OpError::fault("dict receiver changed type")),
            }),
            "setdefault" => arity(method, args, 1, 2).and_then(|_| {
                let default = args.get(1).cloned().unwrap_or(Value::None);
                match ops::dict_index(receiver, &args[0])? {
                    Some(i) => Ok(ops::entry_at(receiver, i).unwrap_or(Value::None)),
                    None => {
                        ops::set_item(receiver, args[0].clone(), default.clone())?;
                        Ok(default)
                    }
                }
            }),
            "update" => arity(method, args, 1, 1)
                .and_then(|_| update_dict(receiver, &args[0]).map(|_| Value::None)),
            "clear" => arity(method, args, 0, 0).map(|_| {
                *receiver = Value::Dict(Vec::new());
                Value::None
            }),
            _ => return None,
        },
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(r: Result<Value, OpError>) -> ErrorKind {
        match r {
            Err(OpError::Raised(e)) => e.kind,
            other => panic!("expected raised error, got {other:?}"),
        }
    }

    #[test]
    fn test_int_conversion() {
        assert_eq!(call_pure("int", &[Value::str(" -12_3 ")]).unwrap(), Value::int(-123));
        assert_eq!(call_pure("int", &[Value::Float(-2.7)]).unwrap(), Value::int(-2));
        assert_eq!(kind(call_pure("int", &[Value::str("x")])), ErrorKind::ValueError);
        assert_eq!(
            kind(call_pure("int", &[Value::Float(f64::INFINITY)])),
            ErrorKind::OverflowError
        );
        assert_eq!(kind(call_pure("int", &[Value::None])), ErrorKind::TypeError);
    }

    #[test]
    fn test_decode_reports_position_and_reason() {
        let err = call_method(&Value::Bytes(vec![0x61, 0x80]), "decode", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "UnicodeDecodeError: 'utf-8' codec can't decode byte 0x80 in position 1: \
                 invalid start byte"
        );
        let err = call_method(&Value::Bytes(vec![0xf0, 0xa3, 0x91]), "decode", &[]).unwrap_err();
        assert!(err.to_string().ends_with("unexpected end of data"));
        assert_eq!(
            call_method(&Value::Bytes(vec![0xf0, 0xa3, 0x91, 0x96]), "decode", &[]).unwrap(),
            Value::str("\u{23456}")
        );
    }

    #[test]
    fn test_dict_methods() {
        let d = Value::Dict(vec![(Value::str("a"), Value::int(1))]);
        assert_eq!(call_method(&d, "get", &[Value::str("b")]).unwrap(), Value::None);
        assert_eq!(call_method(&d, "get", &[Value::str("a")]).unwrap(), Value::int(1));
        let mut m = d.clone();
        assert_eq!(
            kind(call_method_mut(&mut m, "pop", &[Value::str("zz")]).unwrap()),
            ErrorKind::KeyError
        );
        assert!(call_method_mut(&mut Value::str("s"), "append", &[]).is_none());
    }

    #[test]
    fn test_min_max_sorted() {
        let items = Value::List(vec![Value::int(3), Value::Float(1.5), Value::int(2)]);
        assert_eq!(call_pure("min", &[items.clone()]).unwrap(), Value::Float(1.5));
        assert_eq!(call_pure("max", &[items.clone()]).unwrap(), Value::int(3));
        assert_eq!(
            call_pure("sorted", &[items]).unwrap(),
            Value::List(vec![Value::Float(1.5), Value::int(2), Value::int(3)])
        );
        assert_eq!(kind(call_pure("max", &[Value::List(vec![])])), ErrorKind::ValueError);
        assert_eq!(
            kind(call_pure("sorted", &[Value::List(vec![Value::int(1), Value::str("a")])])),
            ErrorKind::TypeError
        );
    }

    #[test]
    fn test_format_and_join() {
        assert_eq!(
            call_method(&Value::str("{} -> {0}"), "format", &[Value::int(7)]).unwrap(),
            Value::str("7 -> 7")
        );
        assert_eq!(
            kind(call_method(&Value::str(","), "join", &[Value::List(vec![Value::int(1)])])),
            ErrorKind::TypeError
        );
    }
}
