use verity_ir::{Expr, Stmt, Target};

pub type NodeId = u32;

/// Bound on how often a loop condition may fork into another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopGuard {
    pub bound: u32,
    /// Successor that leaves the loop.
    pub exit: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RaiseSpec {
    /// `raise <expr>`.
    Expr(Expr),
    /// Bare `raise` outside a handler.
    Reraise,
    /// Failed `assert`, with its optional message.
    Assertion(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowNode {
    Start {
        next: NodeId,
    },
    /// Falling off the end of the body: returns `None`.
    End,
    /// Straight-line statement (assignment, expression, `del`, `global`, `pass`).
    Stmt {
        stmt: Stmt,
        next: NodeId,
    },
    /// Pass-through placeholder used as a loop header.
    Join {
        next: NodeId,
    },
    /// Primitive predicate: the truthiness of `cond` selects the successor.
    Branch {
        cond: Expr,
        on_true: NodeId,
        on_false: NodeId,
        guard: Option<LoopGuard>,
    },
    /// Evaluates the iterable of a `for` loop into iterator slot `slot`.
    ForInit {
        iter: Expr,
        slot: u32,
        next: NodeId,
    },
    /// Binds the next item of slot `slot` to `target` and enters `body`,
    /// or leaves through `exit` when the iterator is exhausted.
    ForNext {
        slot: u32,
        target: Target,
        body: NodeId,
        exit: NodeId,
        bound: u32,
    },
    Return {
        value: Option<Expr>,
    },
    Raise(RaiseSpec),
    /// Region the analyzer has no semantics for.
    Unanalyzable {
        construct: String,
    },
}

impl FlowNode {
    pub fn successors(&self) -> Vec<NodeId> {
        match self {
            FlowNode::Start { next }
            | FlowNode::Stmt { next, .. }
            | FlowNode::Join { next }
            | FlowNode::ForInit { next, .. } => vec![*next],
            FlowNode::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            FlowNode::ForNext { body, exit, .. } => vec![*body, *exit],
            FlowNode::End
            | FlowNode::Return { .. }
            | FlowNode::Raise(_)
            | FlowNode::Unanalyzable { .. } => Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowNode::End
                | FlowNode::Return { .. }
                | FlowNode::Raise(_)
                | FlowNode::Unanalyzable { .. }
        )
    }

    /// Whether this node contributes two branch edges to coverage.
    pub fn is_decision(&self) -> bool {
        matches!(self, FlowNode::Branch { .. } | FlowNode::ForNext { .. })
    }
}

/// Control-flow representation of one function body.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    /// Source line of each node.
    pub lines: Vec<u32>,
    pub edges: Vec<(NodeId, NodeId)>,
    pub entry: NodeId,
    pub exit: NodeId,
}

impl FlowGraph {
    pub fn new() -> Self {
        let mut graph = FlowGraph {
            nodes: Vec::new(),
            lines: Vec::new(),
            edges: Vec::new(),
            entry: 0,
            exit: 0,
        };
        let start = graph.add_node(FlowNode::Start { next: 1 }, 0);
        let end = graph.add_node(FlowNode::End, 0);
        graph.entry = start;
        graph.exit = end;
        graph
    }

    pub fn add_node(&mut self, node: FlowNode, line: u32) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        self.lines.push(line);
        id
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.push((from, to));
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(id as usize)
    }

    pub fn line(&self, id: NodeId) -> u32 {
        self.lines.get(id as usize).copied().unwrap_or(0)
    }

    /// Replace a placeholder created with [`FlowGraph::reserve`].
    pub fn set_node(&mut self, id: NodeId, node: FlowNode) {
        if let Some(slot) = self.nodes.get_mut(id as usize) {
            *slot = node;
        }
    }

    /// Allocate a node whose successors are not known yet.
    pub fn reserve(&mut self, line: u32) -> NodeId {
        self.add_node(FlowNode::Join { next: 1 }, line)
    }

    /// Decision edges `(node, outcome)` the coverage estimate is measured over.
    pub fn decision_edges(&self) -> Vec<(NodeId, bool)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_decision())
            .flat_map(|(i, _)| [(i as NodeId, true), (i as NodeId, false)])
            .collect()
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
