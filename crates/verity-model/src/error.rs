use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a well-defined error raised by target code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyError,
    IndexError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    OverflowError,
    AttributeError,
    UnicodeDecodeError,
    AssertionError,
    NameError,
    RuntimeError,
    /// Any other built-in exception class raised explicitly by name.
    Other(String),
}

/// Exception class names a `raise` statement may use.
const OTHER_BUILTIN_EXCEPTIONS: &[&str] = &[
    "Exception",
    "ArithmeticError",
    "LookupError",
    "NotImplementedError",
    "PermissionError",
    "FileNotFoundError",
    "UnicodeError",
    "RecursionError",
    "StopIteration",
    "UnboundLocalError",
];

impl ErrorKind {
    /// Resolve an exception class name. Unknown names are not exceptions.
    pub fn from_class_name(name: &str) -> Option<ErrorKind> {
        let kind = match name {
            "KeyError" => ErrorKind::KeyError,
            "IndexError" => ErrorKind::IndexError,
            "TypeError" => ErrorKind::TypeError,
            "ValueError" => ErrorKind::ValueError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "OverflowError" => ErrorKind::OverflowError,
            "AttributeError" => ErrorKind::AttributeError,
            "UnicodeDecodeError" => ErrorKind::UnicodeDecodeError,
            "AssertionError" => ErrorKind::AssertionError,
            "NameError" => ErrorKind::NameError,
            "RuntimeError" => ErrorKind::RuntimeError,
            other if OTHER_BUILTIN_EXCEPTIONS.contains(&other) => {
                ErrorKind::Other(other.to_string())
            }
            _ => return None,
        };
        Some(kind)
    }

    pub fn class_name(&self) -> &str {
        match self {
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::UnicodeDecodeError => "UnicodeDecodeError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::NameError => "NameError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::Other(name) => name,
        }
    }

    /// `KeyError` -> `key_error`, used for test names.
    pub fn snake_name(&self) -> String {
        let mut out = String::new();
        for (i, ch) in self.class_name().chars().enumerate() {
            if ch.is_ascii_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// A raised error with its message, as observed from execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaisedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RaisedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Failure of a single operation.
///
/// `Raised` is a well-defined language error and can serve as an oracle.
/// `Fault` covers everything the model refuses to guess about: resource
/// exhaustion and constructs without modelled semantics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpError {
    #[error("{0}")]
    Raised(RaisedError),

    #[error("uncontrolled fault: {0}")]
    Fault(String),
}

impl OpError {
    pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Self {
        OpError::Raised(RaisedError::new(kind, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        OpError::raise(ErrorKind::TypeError, message)
    }

    pub fn fault(message: impl Into<String>) -> Self {
        OpError::Fault(message.into())
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            OpError::Raised(e) => Some(&e.kind),
            OpError::Fault(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_names() {
        assert_eq!(ErrorKind::KeyError.snake_name(), "key_error");
        assert_eq!(ErrorKind::ZeroDivisionError.snake_name(), "zero_division_error");
        assert_eq!(
            ErrorKind::Other("NotImplementedError".into()).snake_name(),
            "not_implemented_error"
        );
    }

    #[test]
    fn class_names_resolve() {
        assert_eq!(ErrorKind::from_class_name("KeyError"), Some(ErrorKind::KeyError));
        assert_eq!(
            ErrorKind::from_class_name("LookupError"),
            Some(ErrorKind::Other("LookupError".into()))
        );
        assert_eq!(ErrorKind::from_class_name("MyError"), None);
    }
}
