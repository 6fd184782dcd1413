//! Test materialization: confirmed cases become named, deduplicated test
//! cases grouped into per-function regions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use verity_compiler::signature::PathSignature;
use verity_explore::{ConfirmedCase, ExplorationReport};
use verity_model::{ErrorKind, Value};
use verity_sandbox::RunOutcome;

/// What a generated test asserts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "oracle", rename_all = "snake_case")]
pub enum Oracle {
    Returns { value: Value },
    Raises { kind: ErrorKind, message: String },
}

impl From<RunOutcome> for Oracle {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Returned { value } => Oracle::Returns { value },
            RunOutcome::Raised { error } => Oracle::Raises {
                kind: error.kind,
                message: error.message,
            },
        }
    }
}

impl Oracle {
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            Oracle::Returns { .. } => None,
            Oracle::Raises { kind, .. } => Some(kind),
        }
    }

    /// One-line description, e.g. `returns 'HELLO'` or `raises KeyError: 'x'`.
    pub fn describe(&self) -> String {
        match self {
            Oracle::Returns { value } => format!("returns {}", value.repr()),
            Oracle::Raises { kind, message } if message.is_empty() => format!("raises {kind}"),
            Oracle::Raises { kind, message } => format!("raises {kind}: {message}"),
        }
    }
}

/// Where a test case came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub predicted: PathSignature,
    pub concrete: PathSignature,
    pub realized: bool,
    pub boundary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub function: String,
    pub args: Vec<Value>,
    pub oracle: Oracle,
    pub provenance: Provenance,
}

impl TestCase {
    /// Source text of the call under test.
    pub fn call_source(&self) -> String {
        let args: Vec<String> = self.args.iter().map(Value::literal).collect();
        format!("{}({})", self.function, args.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "region", rename_all = "snake_case")]
pub enum RegionKind {
    Returns,
    Raises { kind: ErrorKind },
}

/// A group of cases sharing an outcome bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub header: String,
    pub kind: RegionKind,
    pub cases: Vec<TestCase>,
}

/// Every test case generated for one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSuite {
    pub function: String,
    pub header: String,
    pub regions: Vec<Region>,
    /// Confirmed cases dropped as duplicates of a kept one.
    pub duplicates: usize,
}

impl FunctionSuite {
    /// Materialize the confirmed cases of one exploration, in commit order.
    pub fn materialize(report: &ExplorationReport) -> Self {
        Self::from_cases(&report.function, report.cases.iter().cloned())
    }

    pub fn from_cases(function: &str, cases: impl IntoIterator<Item = ConfirmedCase>) -> Self {
        let mut seen: BTreeSet<(Vec<Value>, Oracle)> = BTreeSet::new();
        let mut returns = Region {
            header: "Successful executions".to_string(),
            kind: RegionKind::Returns,
            cases: Vec::new(),
        };
        let mut errors: Vec<Region> = Vec::new();
        let mut duplicates = 0;

        for case in cases {
            let oracle = Oracle::from(case.outcome);
            if !seen.insert((case.args.clone(), oracle.clone())) {
                duplicates += 1;
                continue;
            }
            let region = match oracle.error_kind() {
                None => &mut returns,
                Some(kind) => {
                    let wanted = RegionKind::Raises { kind: kind.clone() };
                    let at = match errors.iter().position(|r| r.kind == wanted) {
                        Some(at) => at,
                        None => {
                            errors.push(Region {
                                header: format!("Raises {kind}"),
                                kind: wanted,
                                cases: Vec::new(),
                            });
                            errors.len() - 1
                        }
                    };
                    &mut errors[at]
                }
            };
            let name = case_name(function, &region.kind, region.cases.len());
            region.cases.push(TestCase {
                name,
                function: function.to_string(),
                args: case.args,
                oracle,
                provenance: Provenance {
                    predicted: case.predicted,
                    concrete: case.concrete,
                    realized: case.realized,
                    boundary: case.boundary,
                },
            });
        }

        let mut regions = Vec::with_capacity(errors.len() + 1);
        if !returns.cases.is_empty() {
            regions.push(returns);
        }
        regions.extend(errors);
        Self {
            function: function.to_string(),
            header: format!("Test suites for function {function}"),
            regions,
            duplicates,
        }
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.regions.iter().flat_map(|r| r.cases.iter())
    }

    pub fn len(&self) -> usize {
        self.regions.iter().map(|r| r.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `test_f`, `test_f_1`, ... for returns; `test_f_raises_key_error`, ... per error kind.
fn case_name(function: &str, kind: &RegionKind, ordinal: usize) -> String {
    let base = match kind {
        RegionKind::Returns => format!("test_{function}"),
        RegionKind::Raises { kind } => format!("test_{function}_raises_{}", kind.snake_name()),
    };
    if ordinal == 0 {
        base
    } else {
        format!("{base}_{ordinal}")
    }
}

/// Suites for every explored function of a module, in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub functions: Vec<FunctionSuite>,
}

impl TestSuite {
    pub fn function(&self, name: &str) -> Option<&FunctionSuite> {
        self.functions.iter().find(|f| f.function == name)
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.functions.iter().flat_map(|f| f.cases())
    }

    pub fn len(&self) -> usize {
        self.functions.iter().map(FunctionSuite::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_model::RaisedError;

    fn case(args: Vec<Value>, outcome: RunOutcome) -> ConfirmedCase {
        ConfirmedCase {
            args,
            outcome,
            predicted: PathSignature::new(),
            concrete: PathSignature::new(),
            realized: true,
            boundary: false,
        }
    }

    fn returns(v: Value) -> RunOutcome {
        RunOutcome::Returned { value: v }
    }

    fn raises(kind: ErrorKind, message: &str) -> RunOutcome {
        RunOutcome::Raised {
            error: RaisedError::new(kind, message),
        }
    }

    #[test]
    fn test_names_and_regions_follow_first_seen_order() {
        let suite = FunctionSuite::from_cases(
            "lookup",
            vec![
                case(vec![Value::str("x")], raises(ErrorKind::KeyError, "'x'")),
                case(vec![Value::str("a")], returns(Value::int(1))),
                case(vec![Value::int(0)], raises(ErrorKind::TypeError, "bad")),
                case(vec![Value::str("b")], returns(Value::None)),
                case(vec![Value::str("")], raises(ErrorKind::KeyError, "''")),
            ],
        );
        assert_eq!(suite.header, "Test suites for function lookup");
        let names: Vec<&str> = suite.cases().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "test_lookup",
                "test_lookup_1",
                "test_lookup_raises_key_error",
                "test_lookup_raises_key_error_1",
                "test_lookup_raises_type_error",
            ]
        );
        assert_eq!(suite.regions[0].kind, RegionKind::Returns);
        assert_eq!(suite.regions[1].header, "Raises KeyError");
    }

    #[test]
    fn test_identical_inputs_and_oracle_collapse() {
        let suite = FunctionSuite::from_cases(
            "f",
            vec![
                case(vec![Value::int(1)], returns(Value::int(2))),
                case(vec![Value::int(1)], returns(Value::int(2))),
                case(vec![Value::Float(1.0)], returns(Value::int(2))),
            ],
        );
        assert_eq!(suite.len(), 2);
        assert_eq!(suite.duplicates, 1);
    }

    #[test]
    fn test_call_source_uses_literals() {
        let suite = FunctionSuite::from_cases(
            "f",
            vec![case(
                vec![Value::str("a"), Value::Float(f64::INFINITY)],
                returns(Value::None),
            )],
        );
        let case = suite.cases().next().unwrap();
        assert!(case.call_source().starts_with("f('a', "));
        assert_eq!(case.oracle.describe(), "returns None");
    }
}
