pub mod ast;
pub mod error;
pub mod lexer;
pub mod parse;

pub use ast::{Expr, ExprId, ExprKind, FunctionDef, Item, Module, Param, Stmt, StmtKind, Target};
pub use error::ParseError;
pub use parse::{parse_expression, parse_module};
