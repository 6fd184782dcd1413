use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use verity_compiler::compile::{raised_class, CompiledFunction};
use verity_compiler::graph::{FlowNode, NodeId, RaiseSpec};
use verity_compiler::signature::{PathSignature, RaiseSite, SigEntry, Terminal};
use verity_compiler::AnalyzedModule;
use verity_ir::ast::BoolOp;
use verity_ir::{Expr, ExprKind, Stmt, StmtKind, Target};
use verity_model::{ops, ErrorKind, OpError, RaisedError, Value};

use crate::builtins;
use crate::config::SandboxConfig;
use crate::snapshot::GlobalSnapshot;

/// First value handed out by `id()`; successive calls step by 16.
const ID_BASE: i64 = 0x7f3a_0000_0000;
/// Remaining stack below which a user call switches to a fresh segment.
const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_GROWTH_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Function '{name}' takes {min} to {max} arguments, {given} given")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        given: usize,
    },

    #[error("Run exhausted its {0} budget")]
    Timeout(Budget),

    #[error("Uncontrolled fault: {0}")]
    Fault(String),
}

/// The run budget that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Counted in interpreter steps; the same on every machine.
    Fuel,
    /// Backstop measured on the wall clock.
    WallClock,
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Budget::Fuel => "fuel",
            Budget::WallClock => "wall-clock",
        })
    }
}

/// Well-defined outcome of a concrete run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Returned { value: Value },
    Raised { error: RaisedError },
}

impl RunOutcome {
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            RunOutcome::Returned { .. } => None,
            RunOutcome::Raised { error } => Some(&error.kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: RunOutcome,
    /// Concrete path signature: argument domains, decisions, selections, terminal.
    pub signature: PathSignature,
    pub fuel_consumed: u64,
}

/// The concrete runner for one analyzed module.
pub struct Sandbox {
    config: SandboxConfig,
    module: Arc<AnalyzedModule>,
}

/// A live module instance with its own globals.
pub struct SandboxInstance {
    config: SandboxConfig,
    module: Arc<AnalyzedModule>,
    globals: BTreeMap<String, Value>,
    snapshot: GlobalSnapshot,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig, module: Arc<AnalyzedModule>) -> Self {
        Self {
            config: config.clone(),
            module,
        }
    }

    /// Create a fresh instance whose globals start from the module's load-time values.
    pub fn instantiate(&self) -> SandboxInstance {
        let globals = self.module.globals.clone();
        let snapshot = GlobalSnapshot::capture(&globals);
        SandboxInstance {
            config: self.config.clone(),
            module: Arc::clone(&self.module),
            globals,
            snapshot,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn module(&self) -> &AnalyzedModule {
        &self.module
    }
}

impl SandboxInstance {
    /// Call a module function with positional arguments; missing trailing
    /// arguments take their defaults. Globals are restored afterwards.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Execution, SandboxError> {
        let module = Arc::clone(&self.module);
        let function = module
            .function(name)
            .ok_or_else(|| SandboxError::UnknownFunction {
                name: name.to_string(),
            })?;
        let arity_error = || SandboxError::Arity {
            name: name.to_string(),
            min: function.required(),
            max: function.arity(),
            given: args.len(),
        };
        if args.len() > function.arity() {
            return Err(arity_error());
        }
        let mut full = args.to_vec();
        for p in &function.params[args.len()..] {
            full.push(p.default.clone().ok_or_else(arity_error)?);
        }

        let mut signature = PathSignature::new();
        for (i, v) in full.iter().enumerate() {
            signature.push(SigEntry::Domain {
                param: i as u32,
                tag: v.type_tag(),
            });
        }

        let (result, fuel) = {
            let mut interp = Interp {
                module: module.as_ref(),
                globals: &mut self.globals,
                fuel: 0,
                budget: self.config.fuel_per_call,
                deadline: Instant::now() + Duration::from_millis(self.config.wall_ms),
                max_depth: self.config.max_call_depth,
                next_id: 0,
            };
            let result = catch_unwind(AssertUnwindSafe(|| {
                interp.run(function, full, 0, Some(&mut signature))
            }));
            (result, interp.fuel)
        };
        let generation = self.snapshot.restore(&mut self.globals);

        let outcome = match result {
            Err(_) => Err(SandboxError::Fault("interpreter panicked".to_string())),
            Ok(Ok(value)) => {
                signature.terminate(Terminal::Return);
                Ok(RunOutcome::Returned { value })
            }
            Ok(Err(Unwind::Raise(error, site))) => {
                signature.terminate(Terminal::Raise {
                    kind: error.kind.clone(),
                    site,
                });
                Ok(RunOutcome::Raised { error })
            }
            Ok(Err(Unwind::Halt(e))) => Err(e),
        };
        match &outcome {
            Ok(o) => debug!(function = name, fuel, generation, outcome = ?o, "concrete run"),
            Err(e) => {
                debug!(function = name, fuel, generation, error = %e, "concrete run discarded")
            }
        }
        outcome.map(|outcome| Execution {
            outcome,
            signature,
            fuel_consumed: fuel,
        })
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    /// Number of runs completed, each followed by a restore.
    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }
}

enum Unwind {
    /// A well-defined error, with the site it escaped from in the outermost frame.
    Raise(RaisedError, RaiseSite),
    Halt(SandboxError),
}

type Flow<T> = Result<T, Unwind>;

fn raise<T>(kind: ErrorKind, message: impl Into<String>, site: RaiseSite) -> Flow<T> {
    Err(Unwind::Raise(RaisedError::new(kind, message), site))
}

fn fault<T>(message: impl Into<String>) -> Flow<T> {
    Err(Unwind::Halt(SandboxError::Fault(message.into())))
}

fn at<T>(result: Result<T, OpError>, site: RaiseSite) -> Flow<T> {
    result.map_err(|e| match e {
        OpError::Raised(error) => Unwind::Raise(error, site),
        OpError::Fault(message) => Unwind::Halt(SandboxError::Fault(message)),
    })
}

struct Frame<'a, 's> {
    function: &'a CompiledFunction,
    depth: u32,
    locals: BTreeMap<String, Value>,
    iters: BTreeMap<u32, std::vec::IntoIter<Value>>,
    trace: Option<&'s mut PathSignature>,
}

impl Frame<'_, '_> {
    fn record(&mut self, entry: SigEntry) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.push(entry);
        }
    }
}

struct Interp<'a> {
    module: &'a AnalyzedModule,
    globals: &'a mut BTreeMap<String, Value>,
    fuel: u64,
    budget: u64,
    deadline: Instant,
    max_depth: u32,
    next_id: i64,
}

/// Entry `key` of a container, for in-place updates.
fn descend<'v>(v: &'v mut Value, key: &Value) -> Result<&'v mut Value, OpError> {
    let type_name = v.type_name();
    let index = ops::select_index(v, key)?;
    match v {
        Value::Dict(pairs) => pairs.get_mut(index).map(|p| &mut p.1),
        Value::List(items) | Value::Tuple(items) => items.get_mut(index),
        _ => None,
    }
    .ok_or_else(|| {
        OpError::type_error(format!("'{type_name}' object does not support item assignment"))
    })
}

/// The assignable place an expression denotes, if any.
fn place_of(expr: &Expr) -> Option<Target> {
    match &expr.kind {
        ExprKind::Name(n) => Some(Target::Name(n.clone())),
        ExprKind::Subscript { value, index } => Some(Target::Subscript {
            id: expr.id,
            base: Box::new(place_of(value)?),
            index: (**index).clone(),
        }),
        _ => None,
    }
}

fn exception_message(kind: &ErrorKind, args: &[Value]) -> String {
    match args {
        [] => String::new(),
        [single] if *kind == ErrorKind::KeyError => single.repr(),
        [single] => single.to_text(),
        many => Value::Tuple(many.to_vec()).repr(),
    }
}

impl<'a> Interp<'a> {
    fn tick(&mut self) -> Flow<()> {
        self.fuel += 1;
        if self.fuel > self.budget {
            return Err(Unwind::Halt(SandboxError::Timeout(Budget::Fuel)));
        }
        if self.fuel % 1024 == 0 && Instant::now() >= self.deadline {
            return Err(Unwind::Halt(SandboxError::Timeout(Budget::WallClock)));
        }
        Ok(())
    }

    fn run(
        &mut self,
        function: &'a CompiledFunction,
        args: Vec<Value>,
        depth: u32,
        trace: Option<&mut PathSignature>,
    ) -> Flow<Value> {
        let mut frame = Frame {
            function,
            depth,
            locals: function
                .params
                .iter()
                .map(|p| p.name.clone())
                .zip(args)
                .collect(),
            iters: BTreeMap::new(),
            trace,
        };
        let graph = &function.graph;
        let mut node = graph.entry;
        loop {
            self.tick()?;
            let Some(current) = graph.node(node) else {
                return fault(format!("flow node {node} does not exist"));
            };
            match current {
                FlowNode::Start { next } | FlowNode::Join { next } => node = *next,
                FlowNode::End => return Ok(Value::None),
                FlowNode::Stmt { stmt, next } => {
                    self.exec(&mut frame, stmt, node)?;
                    node = *next;
                }
                FlowNode::Branch {
                    cond,
                    on_true,
                    on_false,
                    ..
                } => {
                    let taken = self.eval(&mut frame, cond)?.is_truthy();
                    frame.record(SigEntry::Branch { node, taken });
                    node = if taken { *on_true } else { *on_false };
                }
                FlowNode::ForInit { iter, slot, next } => {
                    let v = self.eval(&mut frame, iter)?;
                    let items = at(ops::iterate(&v), RaiseSite::Expr(iter.id))?;
                    frame.iters.insert(*slot, items.into_iter());
                    node = *next;
                }
                FlowNode::ForNext {
                    slot,
                    target,
                    body,
                    exit,
                    ..
                } => {
                    let item = match frame.iters.get_mut(slot) {
                        Some(it) => it.next(),
                        None => return fault(format!("loop slot {slot} was never initialised")),
                    };
                    frame.record(SigEntry::Branch {
                        node,
                        taken: item.is_some(),
                    });
                    match item {
                        Some(v) => {
                            self.assign(&mut frame, target, v, node)?;
                            node = *body;
                        }
                        None => node = *exit,
                    }
                }
                FlowNode::Return { value } => {
                    return match value {
                        Some(e) => self.eval(&mut frame, e),
                        None => Ok(Value::None),
                    }
                }
                FlowNode::Raise(spec) => {
                    let site = RaiseSite::Node(node);
                    let error = match spec {
                        RaiseSpec::Expr(e) => self.exception(&mut frame, e, site)?,
                        RaiseSpec::Reraise => {
                            let message = "No active exception to reraise";
                            RaisedError::new(ErrorKind::RuntimeError, message)
                        }
                        RaiseSpec::Assertion(msg) => {
                            let text = match msg {
                                Some(m) => self.eval(&mut frame, m)?.to_text(),
                                None => String::new(),
                            };
                            RaisedError::new(ErrorKind::AssertionError, text)
                        }
                    };
                    return Err(Unwind::Raise(error, site));
                }
                FlowNode::Unanalyzable { construct } => {
                    return fault(format!("reached unanalyzable {construct}"))
                }
            }
        }
    }

    /// Build the error a `raise` statement raises.
    fn exception(
        &mut self,
        frame: &mut Frame<'a, '_>,
        e: &Expr,
        site: RaiseSite,
    ) -> Flow<RaisedError> {
        let Some(class) = raised_class(e) else {
            return fault("raising a computed exception is not modelled");
        };
        let Some(kind) = ErrorKind::from_class_name(class) else {
            if frame.function.is_local(class)
                || self.globals.contains_key(class)
                || self.module.opaque_names.contains(class)
            {
                return fault(format!("'{class}' is not a modelled exception class"));
            }
            return raise(ErrorKind::NameError, format!("name '{class}' is not defined"), site);
        };
        let args = match &e.kind {
            ExprKind::Call { args, .. } => self.eval_all(frame, args)?,
            _ => Vec::new(),
        };
        let message = exception_message(&kind, &args);
        Ok(RaisedError::new(kind, message))
    }

    fn exec(&mut self, frame: &mut Frame<'a, '_>, stmt: &Stmt, node: NodeId) -> Flow<()> {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let v = self.eval(frame, value)?;
                for t in targets {
                    self.assign(frame, t, v.clone(), node)?;
                }
                Ok(())
            }
            StmtKind::Expr(e) => self.eval(frame, e).map(|_| ()),
            StmtKind::Del(targets) => {
                for t in targets {
                    self.delete(frame, t, node)?;
                }
                Ok(())
            }
            StmtKind::Global(_) | StmtKind::Pass => Ok(()),
            _ => fault("compound statement in a straight-line node"),
        }
    }

    fn bind(&mut self, frame: &mut Frame<'a, '_>, name: &str, value: Value) {
        if frame.function.declared_globals.contains(name) {
            self.globals.insert(name.to_string(), value);
        } else {
            frame.locals.insert(name.to_string(), value);
        }
    }

    fn assign(
        &mut self,
        frame: &mut Frame<'a, '_>,
        target: &Target,
        value: Value,
        node: NodeId,
    ) -> Flow<()> {
        let site = RaiseSite::Node(node);
        match target {
            Target::Name(n) => {
                self.bind(frame, n, value);
                Ok(())
            }
            Target::Tuple(items) => {
                let values = at(
                    ops::iterate(&value).map_err(|_| {
                        OpError::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        ))
                    }),
                    site,
                )?;
                if values.len() < items.len() {
                    return raise(
                        ErrorKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            items.len(),
                            values.len()
                        ),
                        site,
                    );
                }
                if values.len() > items.len() {
                    return raise(
                        ErrorKind::ValueError,
                        format!("too many values to unpack (expected {})", items.len()),
                        site,
                    );
                }
                for (t, v) in items.iter().zip(values) {
                    self.assign(frame, t, v, node)?;
                }
                Ok(())
            }
            Target::Subscript { .. } => {
                let (root, keys) = self.place(frame, target)?;
                let Some((last, path)) = keys.split_last() else {
                    return fault("subscript target without a key");
                };
                let mut cur = self.variable_mut(frame, &root, site)?;
                for key in path {
                    cur = at(descend(cur, key), site)?;
                }
                at(ops::set_item(cur, last.clone(), value), site)
            }
        }
    }

    fn delete(&mut self, frame: &mut Frame<'a, '_>, target: &Target, node: NodeId) -> Flow<()> {
        let site = RaiseSite::Node(node);
        match target {
            Target::Name(n) => {
                let removed = if frame.function.is_local(n) {
                    frame.locals.remove(n)
                } else {
                    self.globals.remove(n)
                };
                match removed {
                    Some(_) => Ok(()),
                    None => raise(ErrorKind::NameError, format!("name '{n}' is not defined"), site),
                }
            }
            Target::Tuple(items) => {
                for t in items {
                    self.delete(frame, t, node)?;
                }
                Ok(())
            }
            Target::Subscript { .. } => {
                let (root, keys) = self.place(frame, target)?;
                let Some((last, path)) = keys.split_last() else {
                    return fault("subscript target without a key");
                };
                let mut cur = self.variable_mut(frame, &root, site)?;
                for key in path {
                    cur = at(descend(cur, key), site)?;
                }
                at(ops::del_item(cur, last), site)
            }
        }
    }

    /// Root variable and evaluated keys of a subscript place.
    fn place(&mut self, frame: &mut Frame<'a, '_>, target: &Target) -> Flow<(String, Vec<Value>)> {
        match target {
            Target::Name(n) => Ok((n.clone(), Vec::new())),
            Target::Subscript { base, index, .. } => {
                let (root, mut keys) = self.place(frame, base)?;
                keys.push(self.eval(frame, index)?);
                Ok((root, keys))
            }
            Target::Tuple(_) => fault("tuple inside a subscript target"),
        }
    }

    fn variable_mut<'x>(
        &'x mut self,
        frame: &'x mut Frame<'a, '_>,
        name: &str,
        site: RaiseSite,
    ) -> Flow<&'x mut Value> {
        if frame.function.is_local(name) {
            return match frame.locals.get_mut(name) {
                Some(v) => Ok(v),
                None => raise(
                    ErrorKind::Other("UnboundLocalError".to_string()),
                    format!(
                        "cannot access local variable '{name}' \
                         where it is not associated with a value"
                    ),
                    site,
                ),
            };
        }
        if self.module.opaque_names.contains(name) {
            return fault(format!("'{name}' has no modelled semantics"));
        }
        match self.globals.get_mut(name) {
            Some(v) => Ok(v),
            None => raise(ErrorKind::NameError, format!("name '{name}' is not defined"), site),
        }
    }

    fn load(&self, frame: &Frame<'a, '_>, name: &str, site: RaiseSite) -> Flow<Value> {
        if frame.function.is_local(name) {
            return match frame.locals.get(name) {
                Some(v) => Ok(v.clone()),
                None => raise(
                    ErrorKind::Other("UnboundLocalError".to_string()),
                    format!(
                        "cannot access local variable '{name}' \
                         where it is not associated with a value"
                    ),
                    site,
                ),
            };
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if self.module.opaque_names.contains(name) {
            return fault(format!("'{name}' has no modelled semantics"));
        }
        if builtins::is_builtin(name)
            || self.module.function(name).is_some()
            || ErrorKind::from_class_name(name).is_some()
        {
            return fault(format!("first-class use of '{name}' is not modelled"));
        }
        raise(ErrorKind::NameError, format!("name '{name}' is not defined"), site)
    }

    fn eval_all(&mut self, frame: &mut Frame<'a, '_>, exprs: &[Expr]) -> Flow<Vec<Value>> {
        exprs.iter().map(|e| self.eval(frame, e)).collect()
    }

    fn eval(&mut self, frame: &mut Frame<'a, '_>, e: &Expr) -> Flow<Value> {
        self.tick()?;
        let site = RaiseSite::Expr(e.id);
        match &e.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Name(n) => self.load(frame, n, site),
            ExprKind::List(items) => Ok(Value::List(self.eval_all(frame, items)?)),
            ExprKind::Tuple(items) => Ok(Value::Tuple(self.eval_all(frame, items)?)),
            ExprKind::Dict(pairs) => {
                let mut dict = Value::Dict(Vec::new());
                for (k, v) in pairs {
                    let key = self.eval(frame, k)?;
                    let value = self.eval(frame, v)?;
                    at(ops::set_item(&mut dict, key, value), site)?;
                }
                Ok(dict)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(frame, operand)?;
                at(ops::unary(*op, &v), site)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                at(ops::binary(*op, &l, &r), site)
            }
            ExprKind::Compare { op, left, right } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                at(ops::compare(*op, &l, &r).map(Value::Bool), site)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(frame, left)?;
                match (op, l.is_truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval(frame, right),
                }
            }
            ExprKind::IfElse { test, body, orelse } => {
                if self.eval(frame, test)?.is_truthy() {
                    self.eval(frame, body)
                } else {
                    self.eval(frame, orelse)
                }
            }
            ExprKind::Call { func, args } => self.call(frame, e, func, args),
            ExprKind::Attribute { value, attr } => {
                let v = self.eval(frame, value)?;
                at(ops::attribute(&v, attr), site)
            }
            ExprKind::Subscript { value, index } => {
                let base = self.eval(frame, value)?;
                let key = self.eval(frame, index)?;
                if matches!(base, Value::Dict(_) | Value::List(_) | Value::Tuple(_)) {
                    if let Ok(index) = ops::select_index(&base, &key) {
                        frame.record(SigEntry::Select { site: e.id, index });
                    }
                }
                at(ops::subscript(&base, &key), site)
            }
            ExprKind::Slice {
                value,
                lower,
                upper,
            } => {
                let base = self.eval(frame, value)?;
                let lo = match lower {
                    Some(l) => Some(self.eval(frame, l)?),
                    None => None,
                };
                let hi = match upper {
                    Some(u) => Some(self.eval(frame, u)?),
                    None => None,
                };
                at(ops::slice(&base, lo.as_ref(), hi.as_ref()), site)
            }
            ExprKind::Unsupported(what) => fault(format!("reached unsupported {what}")),
        }
    }

    fn call(
        &mut self,
        frame: &mut Frame<'a, '_>,
        call: &Expr,
        func: &Expr,
        args: &[Expr],
    ) -> Flow<Value> {
        let site = RaiseSite::Expr(call.id);
        match &func.kind {
            ExprKind::Name(name) => self.call_named(frame, name, args, site),
            ExprKind::Attribute { value, attr } => self.call_method(frame, value, attr, args, site),
            _ => fault("call of a computed callee is not modelled"),
        }
    }

    fn call_named(
        &mut self,
        frame: &mut Frame<'a, '_>,
        name: &str,
        args: &[Expr],
        site: RaiseSite,
    ) -> Flow<Value> {
        if frame.function.is_local(name) || self.globals.contains_key(name) {
            return fault(format!("calling the value bound to '{name}' is not modelled"));
        }
        if self.module.opaque_names.contains(name) {
            return fault(format!("'{name}' has no modelled semantics"));
        }
        if name == "isinstance" {
            let [subject, types] = args else {
                return raise(
                    ErrorKind::TypeError,
                    format!("isinstance expected 2 arguments, got {}", args.len()),
                    site,
                );
            };
            let Some(names) = types.type_names() else {
                return fault("isinstance with a computed type is not modelled");
            };
            let v = self.eval(frame, subject)?;
            return at(builtins::isinstance(&v, &names).map(Value::Bool), site);
        }
        let values = self.eval_all(frame, args)?;
        let module = self.module;
        if let Some(callee) = module.function(name) {
            return self.call_user(callee, values, frame.depth + 1, site);
        }
        if name == "id" {
            if values.len() != 1 {
                return raise(
                    ErrorKind::TypeError,
                    format!("id() takes exactly one argument ({} given)", values.len()),
                    site,
                );
            }
            self.next_id += 1;
            return Ok(Value::int(ID_BASE + 16 * self.next_id));
        }
        if builtins::is_builtin(name) {
            return at(builtins::call_pure(name, &values), site);
        }
        if ErrorKind::from_class_name(name).is_some() {
            return fault("exception objects outside raise are not modelled");
        }
        raise(ErrorKind::NameError, format!("name '{name}' is not defined"), site)
    }

    fn call_user(
        &mut self,
        callee: &'a CompiledFunction,
        mut values: Vec<Value>,
        depth: u32,
        site: RaiseSite,
    ) -> Flow<Value> {
        if values.len() > callee.arity() {
            return raise(
                ErrorKind::TypeError,
                format!(
                    "{}() takes {} positional arguments but {} were given",
                    callee.name,
                    callee.arity(),
                    values.len()
                ),
                site,
            );
        }
        for p in &callee.params[values.len()..] {
            match &p.default {
                Some(d) => values.push(d.clone()),
                None => {
                    return raise(
                        ErrorKind::TypeError,
                        format!(
                            "{}() missing required positional argument: '{}'",
                            callee.name, p.name
                        ),
                        site,
                    )
                }
            }
        }
        if depth > self.max_depth {
            return raise(
                ErrorKind::Other("RecursionError".to_string()),
                "maximum recursion depth exceeded",
                site,
            );
        }
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH_SIZE, || {
            self.run(callee, values, depth, None)
        });
        match result {
            Err(Unwind::Raise(error, _)) => Err(Unwind::Raise(error, site)),
            other => other,
        }
    }

    fn call_method(
        &mut self,
        frame: &mut Frame<'a, '_>,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        site: RaiseSite,
    ) -> Flow<Value> {
        if builtins::is_mutating(method) {
            if let Some(target) = place_of(receiver) {
                let (root, keys) = self.place(frame, &target)?;
                let values = self.eval_all(frame, args)?;
                let mut cur = self.variable_mut(frame, &root, RaiseSite::Expr(receiver.id))?;
                for key in &keys {
                    cur = at(descend(cur, key), RaiseSite::Expr(receiver.id))?;
                }
                return match builtins::call_method_mut(cur, method, &values) {
                    Some(result) => at(result, site),
                    None => at(builtins::call_method(cur, method, &values), site),
                };
            }
        }
        let mut recv = self.eval(frame, receiver)?;
        let values = self.eval_all(frame, args)?;
        if builtins::is_mutating(method) {
            if let Some(result) = builtins::call_method_mut(&mut recv, method, &values) {
                return at(result, site);
            }
        }
        at(builtins::call_method(&recv, method, &values), site)
    }
}
