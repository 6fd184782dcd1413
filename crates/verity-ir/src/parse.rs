//! Indentation-aware recursive-descent parser.
//!
//! Top-level items are parsed independently: a function that fails to parse
//! becomes an [`Item::Broken`] and the rest of the module is still usable.

use num_bigint::BigInt;
use verity_model::{BinOp, CmpOp, UnaryOp, Value};

use crate::ast::{
    BoolOp, Expr, ExprId, ExprKind, FunctionDef, Item, Module, Param, Stmt, StmtKind, Target,
};
use crate::error::ParseError;
use crate::lexer::{logical_lines, Line, Token};

/// Maximum expression nesting depth.
pub const MAX_DEPTH: usize = 64;

/// Parse a whole module. Never fails as a whole; see [`Item::Broken`].
pub fn parse_module(source: &str) -> Module {
    let lines = logical_lines(source);
    let mut parser = BlockParser {
        lines: &lines,
        pos: 0,
        ids: 0,
    };
    let mut items = Vec::new();
    let mut decorated = false;
    while parser.pos < lines.len() {
        let start = parser.pos;
        let end = block_end(&lines, start);
        if lines[start].indent > 0 {
            items.push(Item::Broken {
                name: None,
                error: ParseError::UnexpectedIndent {
                    line: lines[start].number,
                },
            });
            parser.pos = end;
            continue;
        }
        if let Some(item) = parser.parse_item(end, &mut decorated) {
            items.push(item);
        }
        parser.pos = end;
    }
    Module { items }
}

/// Parse a single expression. Ids start at zero.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let lines = logical_lines(source);
    let line = lines.first().ok_or(ParseError::UnexpectedEol {
        line: 1,
        expected: "expression".to_string(),
    })?;
    let tokens = line_tokens(line)?;
    let mut ids = 0;
    let mut lp = LineParser::new(tokens, line.number, &mut ids);
    let expr = lp.parse_testlist()?;
    lp.expect_end()?;
    Ok(expr)
}

fn block_end(lines: &[Line], start: usize) -> usize {
    let indent = lines[start].indent;
    let mut end = start + 1;
    while end < lines.len() && lines[end].indent > indent {
        end += 1;
    }
    end
}

fn line_tokens(line: &Line) -> Result<&[Token], ParseError> {
    line.tokens.as_deref().map_err(|e| e.clone())
}

struct BlockParser<'a> {
    lines: &'a [Line],
    pos: usize,
    ids: ExprId,
}

impl<'a> BlockParser<'a> {
    fn parse_item(&mut self, end: usize, decorated: &mut bool) -> Option<Item> {
        let lines = self.lines;
        let line = &lines[self.pos];
        let tokens = match line_tokens(line) {
            Ok(t) => t,
            Err(error) => return Some(Item::Broken { name: None, error }),
        };
        let name = match tokens.get(1) {
            Some(Token::Name(n)) => Some(n.clone()),
            _ => None,
        };
        match tokens.first() {
            Some(Token::At) => {
                *decorated = true;
                None
            }
            Some(Token::Def) if *decorated => {
                *decorated = false;
                Some(Item::Unsupported {
                    construct: "decorated function".to_string(),
                    name,
                    line: line.number,
                })
            }
            Some(Token::Def) => Some(match self.parse_function(end) {
                Ok(f) => Item::Function(f),
                Err(error) => Item::Broken { name, error },
            }),
            Some(Token::Class) => {
                *decorated = false;
                Some(Item::Unsupported {
                    construct: "class".to_string(),
                    name,
                    line: line.number,
                })
            }
            Some(Token::Import) | Some(Token::From) => Some(Item::Import {
                names: import_bindings(tokens),
                line: line.number,
            }),
            Some(Token::Str(_)) if tokens.len() == 1 => None,
            Some(Token::Name(n)) if tokens.get(1) == Some(&Token::Assign) => {
                let mut lp = LineParser::new(&tokens[2..], line.number, &mut self.ids);
                let parsed = lp.parse_testlist().and_then(|e| lp.expect_end().map(|_| e));
                Some(match parsed {
                    Ok(value) => Item::Global {
                        name: n.clone(),
                        value,
                        line: line.number,
                    },
                    Err(error) => Item::Broken {
                        name: Some(n.clone()),
                        error,
                    },
                })
            }
            _ => Some(Item::Unsupported {
                construct: "module-level statement".to_string(),
                name: None,
                line: line.number,
            }),
        }
    }

    fn parse_function(&mut self, end: usize) -> Result<FunctionDef, ParseError> {
        let lines = self.lines;
        let header = &lines[self.pos];
        let tokens = line_tokens(header)?;
        self.pos += 1;
        let mut lp = LineParser::new(&tokens[1..], header.number, &mut self.ids);
        let name = lp.expect_name("function name")?;
        lp.expect(Token::LParen, "'('")?;
        let params = lp.parse_params()?;
        if lp.eat(&Token::Arrow) {
            lp.parse_test()?;
        }
        lp.expect(Token::Colon, "':'")?;
        let inline = if lp.at_end() {
            None
        } else {
            Some(lp.parse_simple_statements()?)
        };
        let body = match inline {
            Some(stmts) => stmts,
            None => self.parse_suite(0, header.number)?,
        };
        if self.pos != end {
            return Err(ParseError::UnexpectedIndent {
                line: lines[self.pos].number,
            });
        }
        Ok(FunctionDef {
            name,
            params,
            body,
            line: header.number,
        })
    }

    /// Parse the indented block following a compound header at `indent`.
    fn parse_suite(&mut self, indent: usize, header_line: u32) -> Result<Vec<Stmt>, ParseError> {
        match self.lines.get(self.pos) {
            Some(next) if next.indent > indent => {
                let body_indent = next.indent;
                self.parse_block(body_indent)
            }
            _ => Err(ParseError::ExpectedBlock { line: header_line }),
        }
    }

    fn parse_block(&mut self, indent: usize) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(ParseError::UnexpectedIndent { line: line.number });
            }
            self.parse_statement(indent, &mut stmts)?;
        }
        Ok(stmts)
    }

    fn skip_suite(&mut self, indent: usize) {
        while let Some(line) = self.lines.get(self.pos) {
            if line.indent <= indent {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_clause(&self, indent: usize) -> Option<&'a Token> {
        let lines = self.lines;
        let line = lines.get(self.pos)?;
        if line.indent != indent {
            return None;
        }
        line.tokens.as_ref().ok()?.first()
    }

    fn parse_statement(&mut self, indent: usize, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        let lines = self.lines;
        let line = &lines[self.pos];
        let tokens = line_tokens(line)?;
        let number = line.number;
        self.pos += 1;
        match tokens.first() {
            Some(Token::If) => {
                let stmt = self.parse_if(tokens, number, indent)?;
                out.push(stmt);
            }
            Some(Token::While) => {
                let (test, body) = self.parse_header_and_body(&tokens[1..], number, indent)?;
                if self.next_clause(indent) == Some(&Token::Else) {
                    self.pos += 1;
                    self.skip_suite(indent);
                    out.push(unsupported(number, "while-else"));
                } else {
                    out.push(Stmt {
                        line: number,
                        kind: StmtKind::While { test, body },
                    });
                }
            }
            Some(Token::For) => {
                let mut lp = LineParser::new(&tokens[1..], number, &mut self.ids);
                let target_expr = lp.parse_target_list()?;
                let target = Target::from_expr(&target_expr)?;
                lp.expect(Token::In, "'in'")?;
                let iter = lp.parse_testlist()?;
                lp.expect(Token::Colon, "':'")?;
                let inline = if lp.at_end() {
                    None
                } else {
                    Some(lp.parse_simple_statements()?)
                };
                let body = match inline {
                    Some(stmts) => stmts,
                    None => self.parse_suite(indent, number)?,
                };
                if self.next_clause(indent) == Some(&Token::Else) {
                    self.pos += 1;
                    self.skip_suite(indent);
                    out.push(unsupported(number, "for-else"));
                } else {
                    out.push(Stmt {
                        line: number,
                        kind: StmtKind::For { target, iter, body },
                    });
                }
            }
            Some(Token::Try) => {
                self.skip_suite(indent);
                while matches!(
                    self.next_clause(indent),
                    Some(Token::Except) | Some(Token::Finally) | Some(Token::Else)
                ) {
                    self.pos += 1;
                    self.skip_suite(indent);
                }
                out.push(unsupported(number, "try"));
            }
            Some(Token::Def) | Some(Token::Class) | Some(Token::With) | Some(Token::Async) => {
                self.skip_suite(indent);
                let construct = match tokens[0] {
                    Token::Def => "nested function",
                    Token::Class => "class",
                    Token::With => "with",
                    _ => "async",
                };
                out.push(unsupported(number, construct));
            }
            Some(Token::At) => out.push(unsupported(number, "decorator")),
            _ => {
                let mut lp = LineParser::new(tokens, number, &mut self.ids);
                out.extend(lp.parse_simple_statements()?);
            }
        }
        Ok(())
    }

    fn parse_header_and_body(
        &mut self,
        tokens: &[Token],
        number: u32,
        indent: usize,
    ) -> Result<(Expr, Vec<Stmt>), ParseError> {
        let mut lp = LineParser::new(tokens, number, &mut self.ids);
        let test = lp.parse_test()?;
        lp.expect(Token::Colon, "':'")?;
        let inline = if lp.at_end() {
            None
        } else {
            Some(lp.parse_simple_statements()?)
        };
        let body = match inline {
            Some(stmts) => stmts,
            None => self.parse_suite(indent, number)?,
        };
        Ok((test, body))
    }

    /// `if`/`elif` chains become nested `If` statements in `orelse`.
    fn parse_if(
        &mut self,
        tokens: &[Token],
        number: u32,
        indent: usize,
    ) -> Result<Stmt, ParseError> {
        let (test, body) = self.parse_header_and_body(&tokens[1..], number, indent)?;
        let orelse = match self.next_clause(indent) {
            Some(Token::Elif) => {
                let lines = self.lines;
                let line = &lines[self.pos];
                let elif_tokens = line_tokens(line)?;
                self.pos += 1;
                vec![self.parse_if(elif_tokens, line.number, indent)?]
            }
            Some(Token::Else) => {
                let lines = self.lines;
                let line = &lines[self.pos];
                let else_tokens = line_tokens(line)?;
                self.pos += 1;
                let mut lp = LineParser::new(&else_tokens[1..], line.number, &mut self.ids);
                lp.expect(Token::Colon, "':'")?;
                let inline = if lp.at_end() {
                    None
                } else {
                    Some(lp.parse_simple_statements()?)
                };
                match inline {
                    Some(stmts) => stmts,
                    None => self.parse_suite(indent, line.number)?,
                }
            }
            _ => Vec::new(),
        };
        Ok(Stmt {
            line: number,
            kind: StmtKind::If { test, body, orelse },
        })
    }
}

/// Names bound by an import line: the `as` alias, else the first dotted
/// component for `import`, else the imported name for `from`.
fn import_bindings(tokens: &[Token]) -> Vec<String> {
    let list = match tokens.first() {
        Some(Token::From) => match tokens.iter().position(|t| *t == Token::Import) {
            Some(i) => &tokens[i + 1..],
            None => return Vec::new(),
        },
        _ => &tokens[1..],
    };
    let from = tokens.first() == Some(&Token::From);
    let mut names = Vec::new();
    for clause in list.split(|t| *t == Token::Comma) {
        let clause: Vec<&Token> = clause
            .iter()
            .filter(|t| !matches!(t, Token::LParen | Token::RParen))
            .collect();
        let alias = clause
            .iter()
            .position(|t| **t == Token::As)
            .and_then(|i| clause.get(i + 1));
        let bound = match (alias, clause.first()) {
            (Some(Token::Name(a)), _) => Some(a.clone()),
            (_, Some(Token::Name(n))) if !from => Some(n.clone()),
            (_, _) => clause.iter().rev().find_map(|t| match t {
                Token::Name(n) => Some(n.clone()),
                _ => None,
            }),
        };
        names.extend(bound);
    }
    names
}

fn unsupported(line: u32, construct: &str) -> Stmt {
    Stmt {
        line,
        kind: StmtKind::Unsupported(construct.to_string()),
    }
}

/// Parser over the tokens of one logical line.
struct LineParser<'t, 'p> {
    tokens: &'t [Token],
    pos: usize,
    line: u32,
    ids: &'p mut ExprId,
    depth: usize,
}

impl<'t, 'p> LineParser<'t, 'p> {
    fn new(tokens: &'t [Token], line: u32, ids: &'p mut ExprId) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            ids,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::UnexpectedToken {
                line: self.line,
                expected: expected.to_string(),
                found: tok.describe(),
            },
            None => ParseError::UnexpectedEol {
                line: self.line,
                expected: expected.to_string(),
            },
        }
    }

    fn expect(&mut self, tok: Token, expected: &str) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("end of line"))
        }
    }

    fn expect_name(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Name(n)) => {
                self.pos += 1;
                Ok(n.clone())
            }
            _ => Err(self.error(expected)),
        }
    }

    fn node(&mut self, kind: ExprKind) -> Expr {
        let id = *self.ids;
        *self.ids += 1;
        Expr {
            id,
            line: self.line,
            kind,
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(ParseError::MaxDepthExceeded {
                line: self.line,
                max_depth: MAX_DEPTH,
            })
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Consume tokens up to and including the bracket closing the current depth.
    fn skip_to_close(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(tok) = self.advance() {
            if tok.opens_bracket() {
                depth += 1;
            } else if tok.closes_bracket() {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
        }
        Err(ParseError::Unterminated {
            line: self.line,
            what: "bracket".to_string(),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        while !self.eat(&Token::RParen) {
            let name = self.expect_name("parameter name")?;
            if self.eat(&Token::Colon) {
                self.parse_test()?;
            }
            let default = if self.eat(&Token::Assign) {
                Some(self.parse_test()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen, "')'")?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_simple_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            stmts.push(self.parse_simple()?);
            if !self.eat(&Token::Semicolon) {
                break;
            }
        }
        self.expect_end()?;
        Ok(stmts)
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Semicolon))
    }

    fn skip_statement(&mut self) {
        while !self.at_statement_end() {
            self.pos += 1;
        }
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        Stmt {
            line: self.line,
            kind,
        }
    }

    fn parse_simple(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.peek().ok_or_else(|| self.error("statement"))?;
        match tok {
            Token::Return => {
                self.pos += 1;
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_testlist()?)
                };
                Ok(self.stmt(StmtKind::Return(value)))
            }
            Token::Raise => {
                self.pos += 1;
                let exc = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_test()?)
                };
                if self.eat(&Token::From) {
                    self.parse_test()?;
                }
                Ok(self.stmt(StmtKind::Raise(exc)))
            }
            Token::Pass => {
                self.pos += 1;
                Ok(self.stmt(StmtKind::Pass))
            }
            Token::Break => {
                self.pos += 1;
                Ok(self.stmt(StmtKind::Break))
            }
            Token::Continue => {
                self.pos += 1;
                Ok(self.stmt(StmtKind::Continue))
            }
            Token::Assert => {
                self.pos += 1;
                let test = self.parse_test()?;
                let msg = if self.eat(&Token::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                Ok(self.stmt(StmtKind::Assert { test, msg }))
            }
            Token::Global => {
                self.pos += 1;
                let mut names = vec![self.expect_name("name")?];
                while self.eat(&Token::Comma) {
                    names.push(self.expect_name("name")?);
                }
                Ok(self.stmt(StmtKind::Global(names)))
            }
            Token::Del => {
                self.pos += 1;
                let expr = self.parse_testlist()?;
                let targets = match Target::from_expr(&expr)? {
                    Target::Tuple(items) => items,
                    single => vec![single],
                };
                Ok(self.stmt(StmtKind::Del(targets)))
            }
            Token::Nonlocal | Token::Import | Token::From | Token::Yield => {
                let construct = match tok {
                    Token::Nonlocal => "nonlocal",
                    Token::Yield => "yield",
                    _ => "import",
                };
                self.skip_statement();
                Ok(self.stmt(StmtKind::Unsupported(construct.to_string())))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let first = self.parse_testlist()?;
        if self.eat(&Token::Colon) {
            self.parse_test()?;
            if !self.eat(&Token::Assign) {
                return Ok(self.stmt(StmtKind::Pass));
            }
            let value = self.parse_testlist()?;
            let target = Target::from_expr(&first)?;
            return Ok(self.stmt(StmtKind::Assign {
                targets: vec![target],
                value,
            }));
        }
        if let Some(op) = self.peek().and_then(aug_assign_op) {
            self.pos += 1;
            let rhs = self.parse_testlist()?;
            let target = Target::from_expr(&first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(ParseError::InvalidTarget {
                    line: self.line,
                    what: "tuple in augmented assignment".to_string(),
                });
            }
            let value = self.node(ExprKind::Binary {
                op,
                left: Box::new(first),
                right: Box::new(rhs),
            });
            return Ok(self.stmt(StmtKind::Assign {
                targets: vec![target],
                value,
            }));
        }
        if self.eat(&Token::Assign) {
            let mut targets = vec![Target::from_expr(&first)?];
            let mut value = self.parse_testlist()?;
            while self.eat(&Token::Assign) {
                targets.push(Target::from_expr(&value)?);
                value = self.parse_testlist()?;
            }
            return Ok(self.stmt(StmtKind::Assign { targets, value }));
        }
        Ok(self.stmt(StmtKind::Expr(first)))
    }

    /// `for` targets: comma-separated expressions stopping before `in`.
    fn parse_target_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_bitor()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.peek() == Some(&Token::In) {
                break;
            }
            items.push(self.parse_bitor()?);
        }
        Ok(self.node(ExprKind::Tuple(items)))
    }

    fn ends_testlist(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Assign)
                | Some(Token::Semicolon)
                | Some(Token::Colon)
                | Some(Token::RParen)
                | Some(Token::RBracket)
                | Some(Token::RBrace)
        ) || self.peek().and_then(aug_assign_op).is_some()
    }

    fn parse_testlist(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_test()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.ends_testlist() {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(self.node(ExprKind::Tuple(items)))
    }

    fn parse_test(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_test_inner();
        self.leave();
        result
    }

    fn parse_test_inner(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Lambda) {
            while let Some(tok) = self.advance() {
                if *tok == Token::Colon {
                    break;
                }
            }
            self.parse_test()?;
            return Ok(self.node(ExprKind::Unsupported("lambda".to_string())));
        }
        let body = self.parse_or()?;
        if !self.eat(&Token::If) {
            return Ok(body);
        }
        let test = self.parse_or()?;
        self.expect(Token::Else, "'else'")?;
        let orelse = self.parse_test()?;
        Ok(self.node(ExprKind::IfElse {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        }))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = self.node(ExprKind::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = self.node(ExprKind::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            let operand = operand?;
            return Ok(self.node(ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            }));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek()? {
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::In => CmpOp::In,
            Token::Not if self.peek_at(1) == Some(&Token::In) => {
                self.pos += 1;
                CmpOp::NotIn
            }
            Token::Is if self.peek_at(1) == Some(&Token::Not) => {
                self.pos += 1;
                CmpOp::IsNot
            }
            Token::Is => CmpOp::Is,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    /// Chained comparisons `a < b < c` become `a < b and b < c`.
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_bitor()?;
        let mut links = Vec::new();
        while let Some(op) = self.comparison_op() {
            links.push((op, self.parse_bitor()?));
        }
        let mut left = first;
        let mut result: Option<Expr> = None;
        for (op, right) in links {
            let cmp = self.node(ExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right.clone()),
            });
            result = Some(match result {
                None => cmp,
                Some(prev) => self.node(ExprKind::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(prev),
                    right: Box::new(cmp),
                }),
            });
            left = right;
        }
        Ok(result.unwrap_or(left))
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_arith()?;
        while self.eat(&Token::Unsupported) {
            self.parse_arith()?;
            left = self.node(ExprKind::Unsupported("bitwise operator".to_string()));
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = self.node(ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::DoubleSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                Some(Token::At) => {
                    self.pos += 1;
                    self.parse_factor()?;
                    left = self.node(ExprKind::Unsupported("matrix multiplication".to_string()));
                    continue;
                }
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_factor()?;
            left = self.node(ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            Some(Token::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_factor();
        self.leave();
        let operand = operand?;
        if op == UnaryOp::Neg {
            if let ExprKind::Literal(v) = &operand.kind {
                let folded = match v {
                    Value::Int(i) => Some(Value::Int(-i.clone())),
                    Value::Float(f) => Some(Value::Float(-f)),
                    _ => None,
                };
                if let Some(value) = folded {
                    return Ok(self.node(ExprKind::Literal(value)));
                }
            }
        }
        Ok(self.node(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        }))
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if !self.eat(&Token::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.parse_factor()?;
        Ok(self.node(ExprKind::Binary {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        }))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::LParen) {
                expr = self.parse_call(expr)?;
            } else if self.eat(&Token::LBracket) {
                expr = self.parse_subscript(expr)?;
            } else if self.eat(&Token::Dot) {
                let attr = self.expect_name("attribute name")?;
                expr = self.node(ExprKind::Attribute {
                    value: Box::new(expr),
                    attr,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call(&mut self, func: Expr) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        let mut unsupported: Option<&str> = None;
        while !self.eat(&Token::RParen) {
            match (self.peek(), self.peek_at(1)) {
                (Some(Token::Star), _) | (Some(Token::DoubleStar), _) => {
                    self.pos += 1;
                    self.parse_test()?;
                    unsupported = Some("argument unpacking");
                }
                (Some(Token::Name(_)), Some(Token::Assign)) => {
                    self.pos += 2;
                    self.parse_test()?;
                    unsupported = Some("keyword argument");
                }
                _ => {
                    args.push(self.parse_test()?);
                    if self.peek() == Some(&Token::For) {
                        self.skip_to_close()?;
                        let kind = ExprKind::Unsupported("generator expression".to_string());
                        return Ok(self.node(kind));
                    }
                }
            }
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen, "')'")?;
                break;
            }
        }
        if let Some(what) = unsupported {
            return Ok(self.node(ExprKind::Unsupported(what.to_string())));
        }
        Ok(self.node(ExprKind::Call {
            func: Box::new(func),
            args,
        }))
    }

    fn parse_subscript(&mut self, value: Expr) -> Result<Expr, ParseError> {
        let lower = if self.peek() == Some(&Token::Colon) {
            None
        } else {
            let index = self.parse_testlist()?;
            if self.eat(&Token::RBracket) {
                return Ok(self.node(ExprKind::Subscript {
                    value: Box::new(value),
                    index: Box::new(index),
                }));
            }
            Some(Box::new(index))
        };
        self.expect(Token::Colon, "':' or ']'")?;
        let upper = match self.peek() {
            Some(Token::RBracket) | Some(Token::Colon) => None,
            _ => Some(Box::new(self.parse_test()?)),
        };
        if self.eat(&Token::Colon) {
            self.skip_to_close()?;
            return Ok(self.node(ExprKind::Unsupported("extended slice".to_string())));
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(self.node(ExprKind::Slice {
            value: Box::new(value),
            lower,
            upper,
        }))
    }

    fn parse_int(&self, text: &str) -> Result<BigInt, ParseError> {
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => BigInt::parse_bytes(hex.as_bytes(), 16),
            None => BigInt::parse_bytes(text.as_bytes(), 10),
        };
        parsed.ok_or_else(|| ParseError::InvalidNumber {
            line: self.line,
            text: text.to_string(),
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance().ok_or_else(|| self.error("expression"))?;
        let kind = match tok {
            Token::Name(n) => ExprKind::Name(n.clone()),
            Token::Int(text) => ExprKind::Literal(Value::Int(self.parse_int(text)?)),
            Token::Float(f) => ExprKind::Literal(Value::Float(*f)),
            Token::Imaginary(im) => ExprKind::Literal(Value::complex(0.0, *im)),
            Token::NoneLit => ExprKind::Literal(Value::None),
            Token::True => ExprKind::Literal(Value::Bool(true)),
            Token::False => ExprKind::Literal(Value::Bool(false)),
            Token::Str(s) => {
                let mut text = s.clone();
                while let Some(Token::Str(more)) = self.peek() {
                    text.push_str(more);
                    self.pos += 1;
                }
                ExprKind::Literal(Value::Str(text))
            }
            Token::Bytes(b) => {
                let mut bytes = b.clone();
                while let Some(Token::Bytes(more)) = self.peek() {
                    bytes.extend_from_slice(more);
                    self.pos += 1;
                }
                ExprKind::Literal(Value::Bytes(bytes))
            }
            Token::LParen => return self.parse_paren(),
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_dict(),
            Token::Await | Token::Yield => {
                self.parse_test()?;
                ExprKind::Unsupported("coroutine expression".to_string())
            }
            _ => {
                self.pos -= 1;
                return Err(self.error("expression"));
            }
        };
        Ok(self.node(kind))
    }

    fn parse_paren(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::RParen) {
            return Ok(self.node(ExprKind::Tuple(Vec::new())));
        }
        let first = self.parse_test()?;
        if self.peek() == Some(&Token::For) {
            self.skip_to_close()?;
            return Ok(self.node(ExprKind::Unsupported("generator expression".to_string())));
        }
        if self.eat(&Token::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.peek() == Some(&Token::RParen) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(self.node(ExprKind::Tuple(items)))
    }

    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        let mut items = Vec::new();
        while !self.eat(&Token::RBracket) {
            items.push(self.parse_test()?);
            if self.peek() == Some(&Token::For) {
                self.skip_to_close()?;
                return Ok(self.node(ExprKind::Unsupported("list comprehension".to_string())));
            }
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBracket, "']'")?;
                break;
            }
        }
        Ok(self.node(ExprKind::List(items)))
    }

    fn parse_dict(&mut self) -> Result<Expr, ParseError> {
        let mut pairs = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.eat(&Token::DoubleStar) {
                self.skip_to_close()?;
                return Ok(self.node(ExprKind::Unsupported("dict unpacking".to_string())));
            }
            let key = self.parse_test()?;
            if !self.eat(&Token::Colon) {
                self.skip_to_close()?;
                return Ok(self.node(ExprKind::Unsupported("set display".to_string())));
            }
            let value = self.parse_test()?;
            if self.peek() == Some(&Token::For) {
                self.skip_to_close()?;
                return Ok(self.node(ExprKind::Unsupported("dict comprehension".to_string())));
            }
            pairs.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace, "'}'")?;
                break;
            }
        }
        Ok(self.node(ExprKind::Dict(pairs)))
    }
}

fn aug_assign_op(tok: &Token) -> Option<BinOp> {
    match tok {
        Token::PlusAssign => Some(BinOp::Add),
        Token::MinusAssign => Some(BinOp::Sub),
        Token::StarAssign => Some(BinOp::Mul),
        Token::SlashAssign => Some(BinOp::Div),
        Token::DoubleSlashAssign => Some(BinOp::FloorDiv),
        Token::PercentAssign => Some(BinOp::Mod),
        Token::DoubleStarAssign => Some(BinOp::Pow),
        _ => None,
    }
}
