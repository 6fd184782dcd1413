//! Path signatures: the canonical branch-outcome sequence of one execution.
//!
//! The symbolic executor predicts a signature for every explored path and the
//! concrete runner records one for every real execution. A prediction is
//! realized when its entries appear, in order, within the concrete entries and
//! both end in the same terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use verity_ir::ExprId;
use verity_model::{ErrorKind, TypeTag};

use crate::graph::NodeId;

/// Where an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaiseSite {
    /// An expression whose evaluation raised.
    Expr(ExprId),
    /// A `raise` or `assert` node.
    Node(NodeId),
}

impl fmt::Display for RaiseSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaiseSite::Expr(id) => write!(f, "e{id}"),
            RaiseSite::Node(id) => write!(f, "n{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum SigEntry {
    /// Runtime type category of parameter `param` at entry.
    Domain { param: u32, tag: TypeTag },
    /// Outcome of a branch or loop-continuation decision.
    Branch { node: NodeId, taken: bool },
    /// Entry `index` of a container selected by subscript expression `site`.
    Select { site: ExprId, index: usize },
}

impl fmt::Display for SigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigEntry::Domain { param, tag } => write!(f, "p{param}:{tag}"),
            SigEntry::Branch { node, taken } => {
                write!(f, "n{node}:{}", if *taken { 'T' } else { 'F' })
            }
            SigEntry::Select { site, index } => write!(f, "e{site}#{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "terminal", rename_all = "snake_case")]
pub enum Terminal {
    Return,
    Raise { kind: ErrorKind, site: RaiseSite },
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Return => f.write_str("return"),
            Terminal::Raise { kind, site } => write!(f, "raise {kind}@{site}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSignature {
    pub entries: Vec<SigEntry>,
    pub terminal: Option<Terminal>,
}

impl PathSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: SigEntry) {
        self.entries.push(entry);
    }

    pub fn terminate(&mut self, terminal: Terminal) {
        self.terminal = Some(terminal);
    }

    pub fn is_complete(&self) -> bool {
        self.terminal.is_some()
    }

    /// Whether the concrete signature followed this predicted path.
    pub fn is_realized_by(&self, concrete: &PathSignature) -> bool {
        if self.terminal.is_none() || self.terminal != concrete.terminal {
            return false;
        }
        let mut rest = concrete.entries.iter();
        self.entries
            .iter()
            .all(|want| rest.by_ref().any(|have| have == want))
    }

    /// Decision edges traversed, in order.
    pub fn branch_edges(&self) -> impl Iterator<Item = (NodeId, bool)> + '_ {
        self.entries.iter().filter_map(|e| match e {
            SigEntry::Branch { node, taken } => Some((*node, *taken)),
            _ => None,
        })
    }

    pub fn raised(&self) -> Option<&ErrorKind> {
        match &self.terminal {
            Some(Terminal::Raise { kind, .. }) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for PathSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{entry}")?;
        }
        match &self.terminal {
            Some(t) if self.entries.is_empty() => write!(f, "{t}"),
            Some(t) => write!(f, " -> {t}"),
            None => f.write_str(" ..."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(entries: Vec<SigEntry>, terminal: Terminal) -> PathSignature {
        PathSignature {
            entries,
            terminal: Some(terminal),
        }
    }

    #[test]
    fn test_prediction_is_subsequence_of_concrete() {
        let predicted = sig(
            vec![
                SigEntry::Domain { param: 0, tag: TypeTag::Text },
                SigEntry::Branch { node: 4, taken: false },
            ],
            Terminal::Return,
        );
        let concrete = sig(
            vec![
                SigEntry::Domain { param: 0, tag: TypeTag::Text },
                SigEntry::Select { site: 3, index: 0 },
                SigEntry::Branch { node: 4, taken: false },
            ],
            Terminal::Return,
        );
        assert!(predicted.is_realized_by(&concrete));
        assert!(!concrete.is_realized_by(&predicted));
    }

    #[test]
    fn test_terminal_must_match() {
        let predicted = sig(vec![], Terminal::Return);
        let concrete = sig(
            vec![],
            Terminal::Raise {
                kind: ErrorKind::KeyError,
                site: RaiseSite::Expr(7),
            },
        );
        assert!(!predicted.is_realized_by(&concrete));
    }

    #[test]
    fn test_display_is_compact() {
        let s = sig(
            vec![SigEntry::Branch { node: 2, taken: true }],
            Terminal::Raise {
                kind: ErrorKind::KeyError,
                site: RaiseSite::Expr(9),
            },
        );
        assert_eq!(s.to_string(), "n2:T -> raise KeyError@e9");
    }
}
