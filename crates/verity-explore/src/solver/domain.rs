//! Candidate values per symbol and their one-hot SAT encoding.
//!
//! Every parameter has a single type tag on a path (fixed by the domain fork
//! at entry), so its value space is a finite, boundary-first candidate list
//! for that tag. The list order is the preference order: canonical values,
//! then harvested constants and their neighbours, then sentinels, then a few
//! seeded arbitrary values.
//!
//! Encoding: one SAT variable per candidate, exactly-one per symbol
//! (at-least-one + pairwise at-most-one).

use num_bigint::BigInt;
use rand::Rng;
use varisat::{Lit, Var};
use verity_model::{TypeTag, Value};

use super::constraint::SymbolId;
use super::rng::symbol_rng;

/// Literal values the suite should exercise whenever a path admits them.
pub fn boundary_literals() -> Vec<Value> {
    vec![
        Value::int(0),
        Value::int(-1),
        Value::Float(1e300),
        Value::Float(f64::INFINITY),
        Value::complex(1.5, 3.5),
        Value::Bytes(vec![0x80]),
        Value::str(""),
    ]
}

fn push(out: &mut Vec<Value>, v: Value) {
    if !out.contains(&v) {
        out.push(v);
    }
}

fn int_candidates(constants: &[Value], rng: &mut impl Rng) -> Vec<Value> {
    let mut out = vec![Value::int(0), Value::int(1), Value::int(-1)];
    for c in constants {
        match c {
            Value::Int(i) => {
                push(&mut out, Value::Int(i.clone()));
                push(&mut out, Value::Int(i - BigInt::from(1)));
                push(&mut out, Value::Int(i + BigInt::from(1)));
            }
            Value::Bool(b) => push(&mut out, Value::Bool(*b)),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                push(&mut out, Value::int(*f as i64));
            }
            Value::Str(s) if s.chars().count() < 64 => {
                push(&mut out, Value::int(s.chars().count() as i64));
            }
            _ => {}
        }
    }
    push(&mut out, Value::int(1_234_567_890));
    push(&mut out, Value::int(-1_234_567_890));
    push(&mut out, Value::Int(BigInt::from(1u64) << 64usize));
    push(&mut out, Value::Bool(true));
    push(&mut out, Value::Bool(false));
    for _ in 0..2 {
        push(&mut out, Value::int(rng.gen_range(-1000..=1000)));
    }
    out
}

fn real_candidates(constants: &[Value], rng: &mut impl Rng) -> Vec<Value> {
    let mut out = vec![Value::Float(0.0), Value::Float(1.0), Value::Float(-1.0)];
    for c in constants {
        match c {
            Value::Float(f) => {
                push(&mut out, Value::Float(*f));
                if f.is_finite() {
                    push(&mut out, Value::Float(f - 1.0));
                    push(&mut out, Value::Float(f + 1.0));
                }
            }
            Value::Int(i) => {
                if let Some(f) = c.as_i64().map(|x| x as f64) {
                    push(&mut out, Value::Float(f));
                    push(&mut out, Value::Float(f + 0.5));
                    push(&mut out, Value::Float(f - 0.5));
                } else if i.bits() > 63 {
                    push(&mut out, Value::Float(1e20));
                }
            }
            _ => {}
        }
    }
    for sentinel in [1e300, -1e300, f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        push(&mut out, Value::Float(sentinel));
    }
    push(&mut out, Value::Float(rng.gen_range(-1000.0..1000.0)));
    out
}

fn complex_candidates(constants: &[Value], rng: &mut impl Rng) -> Vec<Value> {
    let mut out = vec![
        Value::complex(0.0, 0.0),
        Value::complex(0.0, 1.0),
        Value::complex(1.0, 0.0),
    ];
    for c in constants {
        if let Value::Complex { re, im } = c {
            push(&mut out, Value::complex(*re, *im));
        }
    }
    push(&mut out, Value::complex(1.5, 3.5));
    push(&mut out, Value::complex(-1.0, -1.0));
    push(&mut out, Value::complex(1e300, 1e300));
    push(
        &mut out,
        Value::complex(rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)),
    );
    out
}

fn bytes_candidates(constants: &[Value], rng: &mut impl Rng) -> Vec<Value> {
    let mut out = vec![Value::Bytes(Vec::new())];
    for c in constants {
        match c {
            Value::Bytes(b) => push(&mut out, Value::Bytes(b.clone())),
            Value::Str(s) => push(&mut out, Value::Bytes(s.as_bytes().to_vec())),
            _ => {}
        }
    }
    push(&mut out, Value::Bytes(vec![0x80]));
    push(&mut out, Value::Bytes("\u{23456}".as_bytes().to_vec()));
    push(&mut out, Value::Bytes(b"a".to_vec()));
    push(&mut out, Value::Bytes(vec![0xff, 0xfe]));
    let len = rng.gen_range(1..=4);
    push(
        &mut out,
        Value::Bytes((0..len).map(|_| rng.gen_range(0x20..0x7f)).collect()),
    );
    out
}

fn text_candidates(constants: &[Value], rng: &mut impl Rng) -> Vec<Value> {
    let mut out = vec![Value::str("")];
    for c in constants {
        match c {
            Value::Str(s) => push(&mut out, Value::str(s)),
            Value::Bytes(b) => {
                if let Ok(s) = std::str::from_utf8(b) {
                    push(&mut out, Value::str(s));
                }
            }
            Value::Int(_) | Value::Float(_) => push(&mut out, Value::str(&c.to_text())),
            _ => {}
        }
    }
    push(&mut out, Value::str("a"));
    push(&mut out, Value::str(" "));
    push(&mut out, Value::str("unicode remains unicode"));
    push(&mut out, Value::str("0"));
    let len = rng.gen_range(1..=6);
    let word: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    push(&mut out, Value::str(&word));
    out
}

fn container_candidates(constants: &[Value]) -> Vec<Value> {
    let mut out = vec![
        Value::List(Vec::new()),
        Value::Dict(Vec::new()),
        Value::Tuple(Vec::new()),
    ];
    let scalars: Vec<&Value> = constants
        .iter()
        .filter(|c| !matches!(c, Value::List(_) | Value::Tuple(_) | Value::Dict(_)))
        .take(6)
        .collect();
    for c in constants {
        if matches!(c, Value::List(_) | Value::Tuple(_) | Value::Dict(_)) {
            push(&mut out, c.clone());
        }
    }
    push(&mut out, Value::List(vec![Value::int(0)]));
    push(&mut out, Value::Dict(vec![(Value::int(0), Value::None)]));
    push(&mut out, Value::Dict(vec![(Value::str(""), Value::None)]));
    push(&mut out, Value::Dict(vec![(Value::str(""), Value::str(""))]));
    for c in &scalars {
        push(&mut out, Value::List(vec![(*c).clone()]));
        if matches!(c, Value::Str(_) | Value::Int(_)) {
            push(&mut out, Value::Dict(vec![((*c).clone(), Value::None)]));
            push(&mut out, Value::Dict(vec![((*c).clone(), Value::int(0))]));
        }
    }
    push(&mut out, Value::List(vec![Value::int(0), Value::int(1)]));
    push(&mut out, Value::Tuple(vec![Value::int(0)]));
    push(&mut out, Value::List(vec![Value::str("")]));
    push(&mut out, Value::Dict(vec![(Value::int(0), Value::int(0))]));
    out
}

/// Boundary-first candidates for one symbol of the given tag.
///
/// `constants` are the hinted constants of the parameter followed by the
/// function's harvested constants; only those usable for `tag` contribute.
pub fn candidates(
    tag: TypeTag,
    constants: &[Value],
    seed: u64,
    symbol: SymbolId,
    limit: usize,
) -> Vec<Value> {
    let mut rng = symbol_rng(seed, u64::from(symbol) * 8 + tag as u64);
    let mut out = match tag {
        TypeTag::Integer => int_candidates(constants, &mut rng),
        TypeTag::Real => real_candidates(constants, &mut rng),
        TypeTag::Complex => complex_candidates(constants, &mut rng),
        TypeTag::Bytes => bytes_candidates(constants, &mut rng),
        TypeTag::Text => text_candidates(constants, &mut rng),
        TypeTag::Container => container_candidates(constants),
        TypeTag::Absent => vec![Value::None],
    };
    out.retain(|v| v.type_tag() == tag);
    out.truncate(limit.max(1));
    out
}

/// One-hot encoding of a symbol's candidates.
#[derive(Debug, Clone)]
pub struct EncodedSymbol {
    pub symbol: SymbolId,
    pub values: Vec<Value>,
    pub vars: Vec<Var>,
}

impl EncodedSymbol {
    pub fn lit(&self, index: usize) -> Option<Lit> {
        self.vars.get(index).map(|v| v.positive())
    }

    /// Index of the candidate chosen by `model`.
    pub fn chosen(&self, model: &[Lit]) -> Option<usize> {
        self.vars
            .iter()
            .position(|v| model.get(v.index()).map_or(false, |l| l.is_positive()))
    }
}

/// All symbols of a problem plus their exactly-one clauses.
#[derive(Debug, Clone)]
pub struct EncodedSpace {
    pub symbols: Vec<EncodedSymbol>,
    pub structural_clauses: Vec<Vec<Lit>>,
    pub next_var: usize,
}

impl EncodedSpace {
    pub fn encode(tables: Vec<Vec<Value>>) -> Self {
        let mut next_var = 0usize;
        let mut structural_clauses = Vec::new();
        let mut symbols = Vec::with_capacity(tables.len());
        for (i, values) in tables.into_iter().enumerate() {
            let vars: Vec<Var> = values
                .iter()
                .map(|_| {
                    let var = Var::from_index(next_var);
                    next_var += 1;
                    var
                })
                .collect();
            structural_clauses.push(vars.iter().map(|v| v.positive()).collect());
            for a in 0..vars.len() {
                for b in (a + 1)..vars.len() {
                    structural_clauses.push(vec![vars[a].negative(), vars[b].negative()]);
                }
            }
            symbols.push(EncodedSymbol {
                symbol: i as SymbolId,
                values,
                vars,
            });
        }
        Self {
            symbols,
            structural_clauses,
            next_var,
        }
    }

    /// Decode a model into one value per symbol.
    pub fn decode(&self, model: &[Lit]) -> Option<Vec<Value>> {
        self.symbols
            .iter()
            .map(|s| s.chosen(model).and_then(|i| s.values.get(i).cloned()))
            .collect()
    }

    /// Candidate indices chosen by `model`, one per symbol.
    pub fn choices(&self, model: &[Lit]) -> Option<Vec<usize>> {
        self.symbols.iter().map(|s| s.chosen(model)).collect()
    }

    /// Positive literals of the given candidate choices.
    pub fn lits(&self, choices: &[(usize, usize)]) -> Vec<Lit> {
        choices
            .iter()
            .filter_map(|(sym, idx)| self.symbols.get(*sym).and_then(|s| s.lit(*idx)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_are_boundary_first_and_typed() {
        for tag in TypeTag::ALL {
            let values = candidates(tag, &[Value::int(7), Value::str("en")], 42, 0, 48);
            assert!(!values.is_empty());
            assert!(values.iter().all(|v| v.type_tag() == tag), "{tag}");
        }
        let ints = candidates(TypeTag::Integer, &[Value::int(7)], 42, 0, 48);
        assert_eq!(&ints[..3], &[Value::int(0), Value::int(1), Value::int(-1)]);
        assert!(ints.contains(&Value::int(6)) && ints.contains(&Value::int(8)));
        let text = candidates(TypeTag::Text, &[Value::str("en")], 42, 0, 48);
        assert_eq!(&text[..2], &[Value::str(""), Value::str("en")]);
    }

    #[test]
    fn test_candidates_are_deterministic_and_limited() {
        let a = candidates(TypeTag::Bytes, &[], 7, 2, 48);
        let b = candidates(TypeTag::Bytes, &[], 7, 2, 48);
        assert_eq!(a, b);
        assert!(a.contains(&Value::Bytes(vec![0x80])));
        assert_eq!(candidates(TypeTag::Integer, &[], 7, 0, 4).len(), 4);
    }

    #[test]
    fn test_containers_include_mappings_to_none_without_constants() {
        let values = candidates(TypeTag::Container, &[], 42, 1, 48);
        assert!(values.contains(&Value::Dict(vec![(Value::int(0), Value::None)])));
        assert!(values.contains(&Value::Dict(vec![(Value::str(""), Value::None)])));
        assert!(values.contains(&Value::Dict(vec![(Value::str(""), Value::str(""))])));
    }

    #[test]
    fn test_encoding_is_one_hot() {
        let space =
            EncodedSpace::encode(vec![vec![Value::int(0), Value::int(1)], vec![Value::None]]);
        assert_eq!(space.next_var, 3);
        // 1 at-least-one + 1 pairwise for the first symbol, 1 at-least-one for the second.
        assert_eq!(space.structural_clauses.len(), 3);
        let model = vec![
            Var::from_index(0).negative(),
            Var::from_index(1).positive(),
            Var::from_index(2).positive(),
        ];
        assert_eq!(space.decode(&model), Some(vec![Value::int(1), Value::None]));
    }
}
