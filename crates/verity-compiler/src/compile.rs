use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use verity_ir::ast::BoolOp;
use verity_ir::{
    parse_module, Expr, ExprKind, FunctionDef, Item, ParseError, Stmt, StmtKind, Target,
};
use verity_model::{BinOp, CmpOp, ErrorKind, UnaryOp, Value};

use crate::consteval::eval_const;
use crate::graph::{FlowGraph, FlowNode, LoopGuard, NodeId, RaiseSpec};
use crate::hints::{collect_hints, harvest_constants, ArgHints};
use crate::signature::RaiseSite;
use crate::validate::{validate_graph, ValidationError};

/// Analyzer knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Bound for loops without a literal trip count.
    pub default_loop_bound: u32,
    /// Cap applied to literal `range(n)` trip counts.
    pub max_loop_bound: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            default_loop_bound: 3,
            max_loop_bound: 8,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("cannot parse {}: {source}", .function.as_deref().unwrap_or("module item"))]
    Parse {
        function: Option<String>,
        source: ParseError,
    },

    #[error("line {line}: unsupported {construct} {}", .name.as_deref().unwrap_or(""))]
    Unsupported {
        construct: String,
        name: Option<String>,
        line: u32,
    },

    #[error("line {line}: global '{name}' cannot be evaluated at load: {reason}")]
    Global {
        name: String,
        line: u32,
        reason: String,
    },

    #[error("function '{function}': default of '{param}' cannot be evaluated: {reason}")]
    Default {
        function: String,
        param: String,
        reason: String,
    },

    #[error("function '{function}': invalid flow graph: {}", join_errors(.errors))]
    Invalid {
        function: String,
        errors: Vec<ValidationError>,
    },

    #[error("no analyzable function named '{name}'")]
    UnknownFunction { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub default: Option<Value>,
}

/// A place that can raise, and what it can raise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSite {
    pub site: RaiseSite,
    pub line: u32,
    pub kinds: Vec<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBound {
    pub node: NodeId,
    pub line: u32,
    pub bound: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnanalyzableRegion {
    pub node: NodeId,
    pub line: u32,
    pub construct: String,
}

#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub line: u32,
    pub params: Vec<ParamInfo>,
    pub graph: FlowGraph,
    pub error_sites: Vec<ErrorSite>,
    pub loop_bounds: Vec<LoopBound>,
    pub hints: ArgHints,
    pub unanalyzable: Vec<UnanalyzableRegion>,
    /// Every literal the body uses, plus keys of mappings it reads from globals.
    pub constants: Vec<Value>,
    /// Names bound anywhere in the body (parameters included).
    pub locals: BTreeSet<String>,
    pub declared_globals: BTreeSet<String>,
}

impl CompiledFunction {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Number of leading parameters without a default.
    pub fn required(&self) -> usize {
        self.params.iter().take_while(|p| p.default.is_none()).count()
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name) && !self.declared_globals.contains(name)
    }

    pub fn error_site(&self, site: RaiseSite) -> Option<&ErrorSite> {
        self.error_sites.iter().find(|s| s.site == site)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzedModule {
    pub globals: BTreeMap<String, Value>,
    pub functions: Vec<CompiledFunction>,
    pub errors: Vec<AnalysisError>,
    /// Names bound by constructs without modelled semantics (imports, classes,
    /// functions that failed analysis). Touching one is an uncontrolled fault.
    pub opaque_names: BTreeSet<String>,
}

impl AnalyzedModule {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

pub fn analyze(source: &str) -> AnalyzedModule {
    analyze_with(source, &AnalyzerConfig::default())
}

/// Analyze a module. Never fails as a whole: items that cannot be analyzed are
/// reported in [`AnalyzedModule::errors`] and the rest is kept.
pub fn analyze_with(source: &str, config: &AnalyzerConfig) -> AnalyzedModule {
    let module = parse_module(source);
    let mut analyzed = AnalyzedModule::default();

    for item in &module.items {
        match item {
            Item::Global { name, value, line } => match eval_const(value, &analyzed.globals) {
                Ok(v) => {
                    analyzed.opaque_names.remove(name);
                    analyzed.globals.insert(name.clone(), v);
                }
                Err(reason) => {
                    analyzed.globals.remove(name);
                    analyzed.opaque_names.insert(name.clone());
                    analyzed.errors.push(AnalysisError::Global {
                        name: name.clone(),
                        line: *line,
                        reason,
                    });
                }
            },
            Item::Import { names, .. } => analyzed.opaque_names.extend(names.iter().cloned()),
            Item::Unsupported {
                construct,
                name,
                line,
            } => {
                analyzed.opaque_names.extend(name.iter().cloned());
                analyzed.errors.push(AnalysisError::Unsupported {
                    construct: construct.clone(),
                    name: name.clone(),
                    line: *line,
                });
            }
            Item::Broken { name, error } => {
                analyzed.opaque_names.extend(name.iter().cloned());
                analyzed.errors.push(AnalysisError::Parse {
                    function: name.clone(),
                    source: error.clone(),
                });
            }
            Item::Function(_) => {}
        }
    }

    for def in module.functions() {
        match compile_function(def, &analyzed.globals, config) {
            Ok(compiled) => {
                debug!(
                    function = %compiled.name,
                    nodes = compiled.graph.nodes.len(),
                    error_sites = compiled.error_sites.len(),
                    "compiled function"
                );
                analyzed.functions.push(compiled);
            }
            Err(e) => {
                analyzed.opaque_names.insert(def.name.clone());
                analyzed.errors.push(e);
            }
        }
    }

    for e in &analyzed.errors {
        warn!(error = %e, "analysis excluded an item");
    }
    info!(
        functions = analyzed.functions.len(),
        globals = analyzed.globals.len(),
        errors = analyzed.errors.len(),
        "analyzed module"
    );
    analyzed
}

pub fn compile_function(
    def: &FunctionDef,
    globals: &BTreeMap<String, Value>,
    config: &AnalyzerConfig,
) -> Result<CompiledFunction, AnalysisError> {
    let mut params = Vec::with_capacity(def.params.len());
    for p in &def.params {
        let default = match &p.default {
            Some(e) => Some(eval_const(e, globals).map_err(|reason| AnalysisError::Default {
                function: def.name.clone(),
                param: p.name.clone(),
                reason,
            })?),
            None => None,
        };
        params.push(ParamInfo {
            name: p.name.clone(),
            default,
        });
    }

    let mut lowering = Lowering {
        graph: FlowGraph::new(),
        config,
        next_slot: 0,
        loop_bounds: Vec::new(),
        unanalyzable: Vec::new(),
    };
    let exit = lowering.graph.exit;
    let body = lowering.lower_block(&def.body, exit, None);
    let entry = lowering.graph.entry;
    lowering.graph.set_node(entry, FlowNode::Start { next: body });
    lowering.graph.add_edge(entry, body);

    let Lowering {
        graph,
        loop_bounds,
        unanalyzable,
        ..
    } = lowering;
    validate_graph(&graph).map_err(|errors| AnalysisError::Invalid {
        function: def.name.clone(),
        errors,
    })?;

    let mut locals: BTreeSet<String> = params.iter().map(|p| p.name.clone()).collect();
    let mut declared_globals = BTreeSet::new();
    collect_bindings(&def.body, &mut locals, &mut declared_globals);

    let error_sites = catalogue_error_sites(&graph);
    let hints = collect_hints(def, &params, globals);
    let constants = harvest_constants(def, globals);

    Ok(CompiledFunction {
        name: def.name.clone(),
        line: def.line,
        params,
        graph,
        error_sites,
        loop_bounds,
        hints,
        unanalyzable,
        constants,
        locals,
        declared_globals,
    })
}

#[derive(Clone, Copy)]
struct LoopCtx {
    break_to: NodeId,
    continue_to: NodeId,
}

struct Lowering<'c> {
    graph: FlowGraph,
    config: &'c AnalyzerConfig,
    next_slot: u32,
    loop_bounds: Vec<LoopBound>,
    unanalyzable: Vec<UnanalyzableRegion>,
}

impl Lowering<'_> {
    /// Lower statements back to front; returns the entry of the block.
    fn lower_block(&mut self, stmts: &[Stmt], next: NodeId, lp: Option<LoopCtx>) -> NodeId {
        stmts
            .iter()
            .rev()
            .fold(next, |next, stmt| self.lower_stmt(stmt, next, lp))
    }

    fn unanalyzable(&mut self, construct: &str, line: u32) -> NodeId {
        let node = self.graph.add_node(
            FlowNode::Unanalyzable {
                construct: construct.to_string(),
            },
            line,
        );
        self.unanalyzable.push(UnanalyzableRegion {
            node,
            line,
            construct: construct.to_string(),
        });
        node
    }

    fn linear(&mut self, node: FlowNode, next: NodeId, line: u32) -> NodeId {
        let id = self.graph.add_node(node, line);
        self.graph.add_edge(id, next);
        id
    }

    fn lower_stmt(&mut self, stmt: &Stmt, next: NodeId, lp: Option<LoopCtx>) -> NodeId {
        let line = stmt.line;
        if let Some(what) = simple_stmt_unsupported(stmt) {
            return self.unanalyzable(&what, line);
        }
        match &stmt.kind {
            StmtKind::Assign { .. }
            | StmtKind::Expr(_)
            | StmtKind::Del(_)
            | StmtKind::Global(_)
            | StmtKind::Pass => self.linear(
                FlowNode::Stmt {
                    stmt: stmt.clone(),
                    next,
                },
                next,
                line,
            ),
            StmtKind::Return(value) => self.graph.add_node(
                FlowNode::Return {
                    value: value.clone(),
                },
                line,
            ),
            StmtKind::Raise(Some(e)) => self
                .graph
                .add_node(FlowNode::Raise(RaiseSpec::Expr(e.clone())), line),
            StmtKind::Raise(None) => self.graph.add_node(FlowNode::Raise(RaiseSpec::Reraise), line),
            StmtKind::Break => match lp {
                Some(ctx) => ctx.break_to,
                None => self.unanalyzable("break outside loop", line),
            },
            StmtKind::Continue => match lp {
                Some(ctx) => ctx.continue_to,
                None => self.unanalyzable("continue outside loop", line),
            },
            StmtKind::Assert { test, msg } => {
                let fail = self
                    .graph
                    .add_node(FlowNode::Raise(RaiseSpec::Assertion(msg.clone())), line);
                self.lower_cond(test, next, fail, None)
            }
            StmtKind::If { test, body, orelse } => {
                let on_true = self.lower_block(body, next, lp);
                let on_false = self.lower_block(orelse, next, lp);
                self.lower_cond(test, on_true, on_false, None)
            }
            StmtKind::While { test, body } => {
                let head = self.graph.reserve(line);
                let ctx = LoopCtx {
                    break_to: next,
                    continue_to: head,
                };
                let body_entry = self.lower_block(body, head, Some(ctx));
                let bound = self.config.default_loop_bound;
                let guard = LoopGuard { bound, exit: next };
                let cond = self.lower_cond(test, body_entry, next, Some(guard));
                self.graph.set_node(head, FlowNode::Join { next: cond });
                self.graph.add_edge(head, cond);
                self.loop_bounds.push(LoopBound {
                    node: head,
                    line,
                    bound,
                });
                head
            }
            StmtKind::For { target, iter, body } => {
                let slot = self.next_slot;
                self.next_slot += 1;
                let head = self.graph.reserve(line);
                let ctx = LoopCtx {
                    break_to: next,
                    continue_to: head,
                };
                let body_entry = self.lower_block(body, head, Some(ctx));
                let bound = for_bound(iter, self.config);
                self.graph.set_node(
                    head,
                    FlowNode::ForNext {
                        slot,
                        target: target.clone(),
                        body: body_entry,
                        exit: next,
                        bound,
                    },
                );
                self.graph.add_edge(head, body_entry);
                self.graph.add_edge(head, next);
                self.loop_bounds.push(LoopBound {
                    node: head,
                    line,
                    bound,
                });
                self.linear(
                    FlowNode::ForInit {
                        iter: iter.clone(),
                        slot,
                        next: head,
                    },
                    head,
                    line,
                )
            }
            StmtKind::Unsupported(what) => self.unanalyzable(what, line),
        }
    }

    /// Lower a condition so every primitive predicate gets its own branch node.
    fn lower_cond(
        &mut self,
        cond: &Expr,
        on_true: NodeId,
        on_false: NodeId,
        guard: Option<LoopGuard>,
    ) -> NodeId {
        match &cond.kind {
            ExprKind::BoolOp {
                op: BoolOp::And,
                left,
                right,
            } => {
                let rhs = self.lower_cond(right, on_true, on_false, guard);
                self.lower_cond(left, rhs, on_false, guard)
            }
            ExprKind::BoolOp {
                op: BoolOp::Or,
                left,
                right,
            } => {
                let rhs = self.lower_cond(right, on_true, on_false, guard);
                self.lower_cond(left, on_true, rhs, guard)
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.lower_cond(operand, on_false, on_true, guard),
            _ => {
                if let Some(what) = cond.find_unsupported() {
                    return self.unanalyzable(what, cond.line);
                }
                let id = self.graph.add_node(
                    FlowNode::Branch {
                        cond: cond.clone(),
                        on_true,
                        on_false,
                        guard,
                    },
                    cond.line,
                );
                self.graph.add_edge(id, on_true);
                self.graph.add_edge(id, on_false);
                id
            }
        }
    }
}

/// First unsupported construct in the expressions of a simple statement.
fn simple_stmt_unsupported(stmt: &Stmt) -> Option<String> {
    let mut exprs = Vec::new();
    match &stmt.kind {
        StmtKind::Assign { targets, value } => {
            exprs.push(value);
            for t in targets {
                target_exprs(t, &mut exprs);
            }
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) | StmtKind::Raise(Some(e)) => exprs.push(e),
        StmtKind::Del(targets) => {
            for t in targets {
                target_exprs(t, &mut exprs);
            }
        }
        StmtKind::Assert { msg: Some(m), .. } => exprs.push(m),
        StmtKind::For { iter, target, .. } => {
            exprs.push(iter);
            target_exprs(target, &mut exprs);
        }
        _ => {}
    }
    exprs
        .into_iter()
        .find_map(|e| e.find_unsupported().map(str::to_string))
}

/// Index expressions inside an assignment target.
pub fn target_exprs<'a>(target: &'a Target, out: &mut Vec<&'a Expr>) {
    match target {
        Target::Name(_) => {}
        Target::Subscript { base, index, .. } => {
            target_exprs(base, out);
            out.push(index);
        }
        Target::Tuple(items) => {
            for t in items {
                target_exprs(t, out);
            }
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

fn for_bound(iter: &Expr, config: &AnalyzerConfig) -> u32 {
    let literal_count = match &iter.kind {
        ExprKind::Call { func, args }
            if matches!(&func.kind, ExprKind::Name(n) if n == "range") =>
        {
            let ints: Option<Vec<i64>> = args
                .iter()
                .map(|a| match &a.kind {
                    ExprKind::Literal(v) => v.as_i64(),
                    _ => None,
                })
                .collect();
            ints.and_then(|ints| match ints.as_slice() {
                [stop] => Some(range_len(0, *stop, 1)),
                [start, stop] => Some(range_len(*start, *stop, 1)),
                [start, stop, step] if *step != 0 => Some(range_len(*start, *stop, *step)),
                _ => None,
            })
            .map(|n| n.min(u64::from(config.max_loop_bound)))
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => Some(items.len() as u64),
        ExprKind::Dict(pairs) => Some(pairs.len() as u64),
        ExprKind::Literal(Value::Str(s)) => Some(s.chars().count() as u64),
        ExprKind::Literal(Value::Bytes(b)) => Some(b.len() as u64),
        _ => None,
    };
    literal_count
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(config.default_loop_bound)
}

fn range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (lo, hi, step) = if step > 0 {
        (i128::from(start), i128::from(stop), i128::from(step))
    } else {
        (i128::from(stop), i128::from(start), -i128::from(step))
    };
    if hi <= lo {
        0
    } else {
        u64::try_from((hi - lo + step - 1) / step).unwrap_or(u64::MAX)
    }
}

fn collect_bindings(stmts: &[Stmt], locals: &mut BTreeSet<String>, globals: &mut BTreeSet<String>) {
    fn bind(target: &Target, locals: &mut BTreeSet<String>) {
        match target {
            Target::Name(n) => {
                locals.insert(n.clone());
            }
            Target::Tuple(items) => {
                for t in items {
                    bind(t, locals);
                }
            }
            Target::Subscript { .. } => {}
        }
    }
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for t in targets {
                    bind(t, locals);
                }
            }
            StmtKind::Del(targets) => {
                for t in targets {
                    bind(t, locals);
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            StmtKind::If { body, orelse, .. } => {
                collect_bindings(body, locals, globals);
                collect_bindings(orelse, locals, globals);
            }
            StmtKind::While { body, .. } => collect_bindings(body, locals, globals),
            StmtKind::For { target, body, .. } => {
                bind(target, locals);
                collect_bindings(body, locals, globals);
            }
            _ => {}
        }
    }
}

/// Error kinds an expression node itself can raise (not its sub-expressions).
pub fn expr_error_kinds(expr: &Expr) -> Vec<ErrorKind> {
    use ErrorKind::*;
    match &expr.kind {
        ExprKind::Binary { op, .. } => match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul => vec![TypeError],
            BinOp::Div | BinOp::FloorDiv | BinOp::Mod => {
                vec![ZeroDivisionError, TypeError, OverflowError]
            }
            BinOp::Pow => vec![ZeroDivisionError, OverflowError, TypeError],
        },
        ExprKind::Unary { op, .. } => match op {
            UnaryOp::Not => Vec::new(),
            _ => vec![TypeError],
        },
        ExprKind::Compare { op, .. } => match op {
            CmpOp::Eq | CmpOp::Ne | CmpOp::Is | CmpOp::IsNot => Vec::new(),
            _ => vec![TypeError],
        },
        ExprKind::Subscript { .. } => vec![KeyError, IndexError, TypeError],
        ExprKind::Slice { .. } => vec![TypeError],
        ExprKind::Dict(_) => vec![TypeError],
        ExprKind::Attribute { .. } => vec![AttributeError],
        ExprKind::Call { func, .. } => match &func.kind {
            ExprKind::Name(n) => match n.as_str() {
                "int" | "float" | "complex" => vec![ValueError, TypeError, OverflowError],
                "ord" | "chr" => vec![TypeError, ValueError],
                "min" | "max" => vec![ValueError, TypeError],
                "len" | "abs" | "sum" | "sorted" | "hash" | "list" | "tuple" | "dict" | "range"
                | "isinstance" | "bool" | "str" | "repr" => vec![TypeError],
                _ => vec![TypeError, NameError],
            },
            ExprKind::Attribute { attr, .. } => {
                let mut kinds = vec![AttributeError, TypeError];
                match attr.as_str() {
                    "decode" => kinds.push(UnicodeDecodeError),
                    "index" | "remove" => kinds.push(ValueError),
                    "pop" => kinds.extend([KeyError, IndexError]),
                    _ => {}
                }
                kinds
            }
            _ => vec![TypeError],
        },
        ExprKind::Name(_) => vec![NameError],
        _ => Vec::new(),
    }
}

fn push_expr_sites(expr: &Expr, line: u32, sites: &mut Vec<ErrorSite>) {
    expr.walk(&mut |e| {
        let kinds = expr_error_kinds(e);
        if !kinds.is_empty() && !matches!(e.kind, ExprKind::Name(_)) {
            sites.push(ErrorSite {
                site: RaiseSite::Expr(e.id),
                line: e.line.max(line),
                kinds,
            });
        }
    });
}

/// Every site in the graph that can raise, in node order.
pub fn catalogue_error_sites(graph: &FlowGraph) -> Vec<ErrorSite> {
    let mut sites = Vec::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        let id = i as NodeId;
        let line = graph.line(id);
        match node {
            FlowNode::Stmt { stmt, .. } => {
                let mut exprs = Vec::new();
                match &stmt.kind {
                    StmtKind::Assign { targets, value } => {
                        exprs.push(value);
                        for t in targets {
                            target_exprs(t, &mut exprs);
                        }
                        if targets.iter().any(|t| matches!(t, Target::Subscript { .. })) {
                            sites.push(ErrorSite {
                                site: RaiseSite::Node(id),
                                line,
                                kinds: vec![ErrorKind::IndexError, ErrorKind::TypeError],
                            });
                        }
                        if targets.iter().any(|t| matches!(t, Target::Tuple(_))) {
                            sites.push(ErrorSite {
                                site: RaiseSite::Node(id),
                                line,
                                kinds: vec![ErrorKind::ValueError, ErrorKind::TypeError],
                            });
                        }
                    }
                    StmtKind::Expr(e) => exprs.push(e),
                    StmtKind::Del(targets) => {
                        for t in targets {
                            target_exprs(t, &mut exprs);
                        }
                        sites.push(ErrorSite {
                            site: RaiseSite::Node(id),
                            line,
                            kinds: vec![
                                ErrorKind::KeyError,
                                ErrorKind::IndexError,
                                ErrorKind::TypeError,
                            ],
                        });
                    }
                    _ => {}
                }
                for e in exprs {
                    push_expr_sites(e, line, &mut sites);
                }
            }
            FlowNode::Branch { cond, .. } => push_expr_sites(cond, line, &mut sites),
            FlowNode::ForInit { iter, .. } => {
                push_expr_sites(iter, line, &mut sites);
                sites.push(ErrorSite {
                    site: RaiseSite::Expr(iter.id),
                    line,
                    kinds: vec![ErrorKind::TypeError],
                });
            }
            FlowNode::ForNext { target, .. } => {
                let mut exprs = Vec::new();
                target_exprs(target, &mut exprs);
                for e in exprs {
                    push_expr_sites(e, line, &mut sites);
                }
            }
            FlowNode::Return { value: Some(e) } => push_expr_sites(e, line, &mut sites),
            FlowNode::Raise(spec) => {
                let kind = match spec {
                    RaiseSpec::Expr(e) => {
                        push_expr_sites(e, line, &mut sites);
                        raised_class(e)
                            .and_then(ErrorKind::from_class_name)
                            .unwrap_or(ErrorKind::NameError)
                    }
                    RaiseSpec::Reraise => ErrorKind::RuntimeError,
                    RaiseSpec::Assertion(msg) => {
                        if let Some(m) = msg {
                            push_expr_sites(m, line, &mut sites);
                        }
                        ErrorKind::AssertionError
                    }
                };
                sites.push(ErrorSite {
                    site: RaiseSite::Node(id),
                    line,
                    kinds: vec![kind],
                });
            }
            _ => {}
        }
    }
    sites
}

/// Exception class named by `raise X` or `raise X(...)`.
pub fn raised_class(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name(n) => Some(n),
        ExprKind::Call { func, .. } => match &func.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        },
        _ => None,
    }
}
