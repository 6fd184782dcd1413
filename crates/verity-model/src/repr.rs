//! Textual forms of values: the language's `repr()`/`str()` and source
//! literals that reconstruct a value when emitted into a test.

use crate::value::Value;

/// `repr()` of a float: shortest round-trip digits, scientific notation
/// outside `[1e-4, 1e16)`, two-digit minimum exponent.
pub fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let abs = x.abs();
    if (1e-4..1e16).contains(&abs) {
        let s = format!("{}", x);
        if s.contains('.') {
            s
        } else {
            format!("{}.0", s)
        }
    } else {
        let s = format!("{:e}", x);
        match s.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => s,
        }
    }
}

fn complex_part(x: f64) -> String {
    let s = float_repr(x);
    match s.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}

pub fn complex_repr(re: f64, im: f64) -> String {
    if re == 0.0 && !re.is_sign_negative() {
        return format!("{}j", complex_part(im));
    }
    let im_part = complex_part(im);
    let sign = if im_part.starts_with('-') { "" } else { "+" };
    format!("({}{}{}j)", complex_part(re), sign, im_part)
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(b.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push(quote as char);
    out
}

impl Value {
    /// The language's `repr()`.
    pub fn repr(&self) -> String {
        self.render(false)
    }

    /// The language's `str()`: text is returned unquoted.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// A source expression evaluating to this value.
    ///
    /// Differs from `repr()` where `repr()` is not valid source: infinities
    /// are spelled as overflowing products and nan as a conversion.
    pub fn literal(&self) -> String {
        self.render(true)
    }

    fn render(&self, as_literal: bool) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if as_literal => float_literal(*f),
            Value::Float(f) => float_repr(*f),
            Value::Complex { re, im } if as_literal && !(re.is_finite() && im.is_finite()) => {
                format!("complex({}, {})", float_literal(*re), float_literal(*im))
            }
            Value::Complex { re, im } => complex_repr(*re, *im),
            Value::Bytes(b) => bytes_repr(b),
            Value::Str(s) => str_repr(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.render(as_literal)).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.render(as_literal)).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Dict(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.render(as_literal), v.render(as_literal)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

fn float_literal(x: f64) -> String {
    if x.is_nan() {
        "float('nan')".to_string()
    } else if x.is_infinite() {
        if x > 0.0 {
            "1e300 * 1e300".to_string()
        } else {
            "-(1e300 * 1e300)".to_string()
        }
    } else {
        float_repr(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_forms() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-0.5), "-0.5");
        assert_eq!(float_repr(1e300), "1e+300");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123456.789), "123456.789");
    }

    #[test]
    fn complex_forms() {
        assert_eq!(complex_repr(1.5, 3.5), "(1.5+3.5j)");
        assert_eq!(complex_repr(0.0, 1.0), "1j");
        assert_eq!(complex_repr(-1.0, -1.0), "(-1-1j)");
    }

    #[test]
    fn text_and_bytes_escapes() {
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(bytes_repr(&[0x80]), "b'\\x80'");
        assert_eq!(bytes_repr(b"ok"), "b'ok'");
    }

    #[test]
    fn literals_spell_overflow() {
        assert_eq!(Value::Float(f64::INFINITY).literal(), "1e300 * 1e300");
        assert_eq!(Value::Float(f64::INFINITY).repr(), "inf");
        assert_eq!(
            Value::Tuple(vec![Value::int(1)]).literal(),
            "(1,)"
        );
        let d = Value::Dict(vec![(Value::str("k"), Value::None)]);
        assert_eq!(d.repr(), "{'k': None}");
    }
}
