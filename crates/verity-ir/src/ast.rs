use verity_model::{BinOp, CmpOp, UnaryOp, Value};

use crate::error::ParseError;

/// Identifier of an expression node, unique within one parsed module.
/// Doubles as the error-site id for anything the expression can raise.
pub type ExprId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub line: u32,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
    /// A construct without modelled semantics; names the construct.
    Unsupported(String),
}

impl Expr {
    /// Type names in the second argument of `isinstance`: a name or a tuple of names.
    pub fn type_names(&self) -> Option<Vec<String>> {
        match &self.kind {
            ExprKind::Name(n) => Some(vec![n.clone()]),
            ExprKind::Tuple(items) => items
                .iter()
                .map(|e| match &e.kind {
                    ExprKind::Name(n) => Some(n.clone()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// First unsupported construct anywhere inside this expression.
    pub fn find_unsupported(&self) -> Option<&str> {
        let mut found = None;
        self.walk(&mut |e| {
            if found.is_none() {
                if let ExprKind::Unsupported(what) = &e.kind {
                    found = Some(what.as_str());
                }
            }
        });
        found
    }

    /// Pre-order visit of this expression and all sub-expressions.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::Unsupported(_) => {}
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    item.walk(f);
                }
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    k.walk(f);
                    v.walk(f);
                }
            }
            ExprKind::Unary { operand, .. } => operand.walk(f),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::BoolOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::IfElse { test, body, orelse } => {
                test.walk(f);
                body.walk(f);
                orelse.walk(f);
            }
            ExprKind::Call { func, args } => {
                func.walk(f);
                for arg in args {
                    arg.walk(f);
                }
            }
            ExprKind::Attribute { value, .. } => value.walk(f),
            ExprKind::Subscript { value, index } => {
                value.walk(f);
                index.walk(f);
            }
            ExprKind::Slice {
                value,
                lower,
                upper,
            } => {
                value.walk(f);
                if let Some(l) = lower {
                    l.walk(f);
                }
                if let Some(u) = upper {
                    u.walk(f);
                }
            }
        }
    }
}

/// An assignable place.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Subscript {
        id: ExprId,
        base: Box<Target>,
        index: Expr,
    },
    Tuple(Vec<Target>),
}

impl Target {
    /// Variable at the root of the place.
    pub fn root(&self) -> Option<&str> {
        match self {
            Target::Name(n) => Some(n),
            Target::Subscript { base, .. } => base.root(),
            Target::Tuple(_) => None,
        }
    }

    /// Convert an expression into a place, if it denotes one.
    pub fn from_expr(expr: &Expr) -> Result<Target, ParseError> {
        match &expr.kind {
            ExprKind::Name(n) => Ok(Target::Name(n.clone())),
            ExprKind::Subscript { value, index } => Ok(Target::Subscript {
                id: expr.id,
                base: Box::new(Target::from_expr(value)?),
                index: (**index).clone(),
            }),
            ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Tuple(
                items.iter().map(Target::from_expr).collect::<Result<_, _>>()?,
            )),
            other => Err(ParseError::InvalidTarget {
                line: expr.line,
                what: describe_kind(other).to_string(),
            }),
        }
    }
}

fn describe_kind(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Literal(_) => "literal",
        ExprKind::Call { .. } => "function call",
        ExprKind::Attribute { .. } => "attribute",
        ExprKind::Slice { .. } => "slice",
        ExprKind::Unsupported(_) => "unsupported expression",
        _ => "expression",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `a = b = value`; augmented assignments are desugared into this form.
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    Raise(Option<Expr>),
    Pass,
    Break,
    Continue,
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Global(Vec<String>),
    Del(Vec<Target>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    /// A statement or block without modelled semantics; names the construct.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(FunctionDef),
    Global {
        name: String,
        value: Expr,
        line: u32,
    },
    /// `import`/`from ... import`; `names` are the bindings it introduces.
    Import {
        names: Vec<String>,
        line: u32,
    },
    /// Recognized but unmodelled top-level construct (class, decorated def, ...).
    Unsupported {
        construct: String,
        name: Option<String>,
        line: u32,
    },
    /// A top-level item that failed to parse.
    Broken {
        name: Option<String>,
        error: ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub items: Vec<Item>,
}

impl Module {
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions().find(|f| f.name == name)
    }
}
