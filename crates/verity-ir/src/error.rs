/// Errors produced while lexing or parsing source text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unexpected character {text:?}")]
    UnexpectedChar { line: u32, text: String },

    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        line: u32,
        expected: String,
        found: String,
    },

    #[error("line {line}: unexpected end of line, expected {expected}")]
    UnexpectedEol { line: u32, expected: String },

    #[error("line {line}: unterminated {what}")]
    Unterminated { line: u32, what: String },

    #[error("line {line}: unexpected indent")]
    UnexpectedIndent { line: u32 },

    #[error("line {line}: expected an indented block")]
    ExpectedBlock { line: u32 },

    #[error("line {line}: invalid number literal {text:?}")]
    InvalidNumber { line: u32, text: String },

    #[error("line {line}: cannot assign to {what}")]
    InvalidTarget { line: u32, what: String },

    #[error("line {line}: nesting deeper than {max_depth}")]
    MaxDepthExceeded { line: u32, max_depth: usize },
}

impl ParseError {
    pub fn line(&self) -> u32 {
        match self {
            ParseError::UnexpectedChar { line, .. }
            | ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEol { line, .. }
            | ParseError::Unterminated { line, .. }
            | ParseError::UnexpectedIndent { line }
            | ParseError::ExpectedBlock { line }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::InvalidTarget { line, .. }
            | ParseError::MaxDepthExceeded { line, .. } => *line,
        }
    }
}
