//! Tokenizer for the target language, built on logos.
//!
//! Source is first split into logical lines: physical lines are joined while
//! brackets are open, a triple-quoted string is unterminated, or the line ends
//! in a backslash. Each logical line carries its indentation width so the
//! parser can recover block structure.

use logos::Logos;

use crate::error::ParseError;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\f\r\n]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\n")]
pub enum Token {
    // Keywords
    #[token("def")]
    Def,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("is")]
    Is,
    #[token("return")]
    Return,
    #[token("raise")]
    Raise,
    #[token("pass")]
    Pass,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("assert")]
    Assert,
    #[token("global")]
    Global,
    #[token("nonlocal")]
    Nonlocal,
    #[token("del")]
    Del,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("lambda")]
    Lambda,
    #[token("class")]
    Class,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("with")]
    With,
    #[token("yield")]
    Yield,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("None")]
    NoneLit,
    #[token("True")]
    True,
    #[token("False")]
    False,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),

    // Numbers keep their text; the parser builds arbitrary-precision values.
    #[regex(r"[0-9][0-9_]*", |lex| lex.slice().replace('_', ""))]
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| lex.slice().replace('_', ""))]
    Int(String),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    #[regex(r"[0-9][0-9_]*(\.[0-9_]*)?([eE][+-]?[0-9]+)?[jJ]", parse_imaginary)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?[jJ]", parse_imaginary)]
    Imaginary(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, short_text)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, short_text)]
    #[regex(r#""""([^"\\]|\\.|"[^"]|""[^"])*""""#, long_text)]
    #[regex(r#"'''([^'\\]|\\.|'[^']|''[^'])*'''"#, long_text)]
    Str(String),

    #[regex(r#"[bB]"([^"\\\n]|\\.)*""#, short_bytes)]
    #[regex(r#"[bB]'([^'\\\n]|\\.)*'"#, short_bytes)]
    Bytes(Vec<u8>),

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,

    // Operators
    #[token("=")]
    Assign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("~")]
    Tilde,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("//=")]
    DoubleSlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("**=")]
    DoubleStarAssign,

    // Bitwise operators are lexed so the parser can mark them unsupported.
    #[token("&")]
    #[token("|")]
    #[token("^")]
    #[token("<<")]
    #[token(">>")]
    #[token(":=")]
    Unsupported,
}

impl Token {
    /// Short human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Name(n) => format!("name '{}'", n),
            Token::Int(t) => format!("number {}", t),
            Token::Float(f) => format!("number {}", f),
            Token::Imaginary(f) => format!("number {}j", f),
            Token::Str(_) => "string literal".to_string(),
            Token::Bytes(_) => "bytes literal".to_string(),
            other => format!("{:?}", other),
        }
    }

    pub fn opens_bracket(&self) -> bool {
        matches!(self, Token::LParen | Token::LBracket | Token::LBrace)
    }

    pub fn closes_bracket(&self) -> bool {
        matches!(self, Token::RParen | Token::RBracket | Token::RBrace)
    }
}

fn parse_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().replace('_', "").parse::<f64>().ok()
}

fn parse_imaginary(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    let s = lex.slice();
    s[..s.len() - 1].replace('_', "").parse::<f64>().ok()
}

fn quoted_body(slice: &str, quote_len: usize) -> &str {
    &slice[quote_len..slice.len() - quote_len]
}

fn short_text(lex: &mut logos::Lexer<Token>) -> Option<String> {
    unescape_text(quoted_body(lex.slice(), 1))
}

fn long_text(lex: &mut logos::Lexer<Token>) -> Option<String> {
    unescape_text(quoted_body(lex.slice(), 3))
}

fn short_bytes(lex: &mut logos::Lexer<Token>) -> Option<Vec<u8>> {
    unescape_bytes(quoted_body(&lex.slice()[1..], 1))
}

fn hex_value(digits: &str) -> Option<u32> {
    u32::from_str_radix(digits, 16).ok()
}

/// Decode a text literal body. `None` on a malformed escape.
pub fn unescape_text(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'x' => {
                let digits: String = chars.by_ref().take(2).collect();
                out.push(char::from_u32(hex_value(&digits)?)?);
            }
            'u' => {
                let digits: String = chars.by_ref().take(4).collect();
                out.push(char::from_u32(hex_value(&digits)?)?);
            }
            'U' => {
                let digits: String = chars.by_ref().take(8).collect();
                out.push(char::from_u32(hex_value(&digits)?)?);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// Decode a bytes literal body. Only ASCII may appear unescaped.
pub fn unescape_bytes(body: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if !ch.is_ascii() {
            return None;
        }
        if ch != '\\' {
            out.push(ch as u8);
            continue;
        }
        match chars.next()? {
            'n' => out.push(b'\n'),
            't' => out.push(b'\t'),
            'r' => out.push(b'\r'),
            '0' => out.push(0),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => {
                let digits: String = chars.by_ref().take(2).collect();
                out.push(u8::from_str_radix(&digits, 16).ok()?);
            }
            other if other.is_ascii() => {
                out.push(b'\\');
                out.push(other as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

/// One logical line of source.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based number of the first physical line.
    pub number: u32,
    /// Indentation width in columns (tabs advance to the next multiple of 8).
    pub indent: usize,
    /// Tokens, or the lexing error for this line.
    pub tokens: Result<Vec<Token>, ParseError>,
}

fn indent_width(raw: &str) -> usize {
    let mut width = 0;
    for ch in raw.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

fn triple_quote_open(text: &str) -> bool {
    text.matches("\"\"\"").count() % 2 == 1 || text.matches("'''").count() % 2 == 1
}

fn lex(text: &str, line: u32) -> Result<(Vec<Token>, i32), ParseError> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut lexer = Token::lexer(text);
    while let Some(token) = lexer.next() {
        match token {
            Ok(tok) => {
                if tok.opens_bracket() {
                    depth += 1;
                } else if tok.closes_bracket() {
                    depth -= 1;
                }
                tokens.push(tok);
            }
            Err(()) => {
                return Err(ParseError::UnexpectedChar {
                    line,
                    text: lexer.slice().to_string(),
                })
            }
        }
    }
    Ok((tokens, depth))
}

/// Split source into logical lines. Blank and comment-only lines are dropped.
pub fn logical_lines(source: &str) -> Vec<Line> {
    let physical: Vec<&str> = source.lines().collect();
    let mut lines = Vec::new();
    let mut i = 0;
    while i < physical.len() {
        let raw = physical[i];
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            i += 1;
            continue;
        }
        let number = (i + 1) as u32;
        let indent = indent_width(raw);
        let mut text = raw.to_string();
        i += 1;
        let tokens = loop {
            let continued = text.trim_end().ends_with('\\') || triple_quote_open(&text);
            let result = if continued {
                None
            } else {
                match lex(&text, number) {
                    Ok((_, depth)) if depth > 0 => None,
                    Ok((tokens, _)) => Some(Ok(tokens)),
                    Err(e) => Some(Err(e)),
                }
            };
            if let Some(done) = result {
                break done;
            }
            if i >= physical.len() {
                break Err(ParseError::Unterminated {
                    line: number,
                    what: "logical line".to_string(),
                });
            }
            text.push('\n');
            text.push_str(physical[i]);
            i += 1;
        };
        lines.push(Line {
            number,
            indent,
            tokens,
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let lines = logical_lines(src);
        assert_eq!(lines.len(), 1);
        lines[0].tokens.clone().unwrap()
    }

    #[test]
    fn keywords_beat_names() {
        assert_eq!(
            tokens("if define in x"),
            vec![
                Token::If,
                Token::Name("define".into()),
                Token::In,
                Token::Name("x".into())
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            tokens("1_000 2.5 1e300 3.5j 0x1F"),
            vec![
                Token::Int("1000".into()),
                Token::Float(2.5),
                Token::Float(1e300),
                Token::Imaginary(3.5),
                Token::Int("0x1F".into())
            ]
        );
    }

    #[test]
    fn string_and_bytes_escapes() {
        assert_eq!(
            tokens(r#"'a\n' b'\x80' "it's""#),
            vec![
                Token::Str("a\n".into()),
                Token::Bytes(vec![0x80]),
                Token::Str("it's".into())
            ]
        );
    }

    #[test]
    fn open_brackets_join_lines() {
        let lines = logical_lines("X = {\n    'a': 1,\n}\ny = 2\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[1].number, 4);
    }

    #[test]
    fn docstrings_span_lines() {
        let lines = logical_lines("def f():\n    \"\"\"Doc\n    more.\n    \"\"\"\n    return 1\n");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].indent, 4);
        assert!(matches!(lines[1].tokens.as_ref().unwrap()[0], Token::Str(_)));
    }

    #[test]
    fn comments_and_blank_lines_are_dropped() {
        let lines = logical_lines("# header\n\nx = 1  # trailing\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].tokens.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn bad_character_is_reported_per_line() {
        let lines = logical_lines("x = 1\ny = $\n");
        assert!(lines[0].tokens.is_ok());
        assert!(matches!(
            lines[1].tokens,
            Err(ParseError::UnexpectedChar { line: 2, .. })
        ));
    }
}
