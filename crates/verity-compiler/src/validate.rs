use crate::graph::{FlowGraph, FlowNode, NodeId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing entry: node {entry} is not a start node")]
    MissingEntry { entry: NodeId },

    #[error("Missing exit: node {exit} is not an end node")]
    MissingExit { exit: NodeId },

    #[error("Dangling edge: {from} -> {to} references a node that doesn't exist")]
    DanglingEdge { from: NodeId, to: NodeId },

    #[error("Dangling target: node {node} continues at {target} which doesn't exist")]
    DanglingTarget { node: NodeId, target: NodeId },

    #[error("Unfinished node: placeholder {node} was never replaced")]
    Unfinished { node: NodeId },

    #[error("Zero loop bound at node {node}")]
    ZeroLoopBound { node: NodeId },
}

pub fn validate_graph(graph: &FlowGraph) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_endpoints(graph, &mut errors);
    validate_edges(graph, &mut errors);
    validate_successors(graph, &mut errors);
    validate_guards(graph, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check that entry and exit point at a start and an end node.
fn validate_endpoints(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    if !matches!(graph.node(graph.entry), Some(FlowNode::Start { .. })) {
        errors.push(ValidationError::MissingEntry { entry: graph.entry });
    }
    if !matches!(graph.node(graph.exit), Some(FlowNode::End)) {
        errors.push(ValidationError::MissingExit { exit: graph.exit });
    }
}

/// Check that every recorded edge connects existing nodes.
fn validate_edges(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    for &(from, to) in &graph.edges {
        if graph.node(from).is_none() || graph.node(to).is_none() {
            errors.push(ValidationError::DanglingEdge { from, to });
        }
    }
}

/// Check that successors exist and that no join loops onto itself.
fn validate_successors(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    for (i, node) in graph.nodes.iter().enumerate() {
        let id = i as NodeId;
        for target in node.successors() {
            if graph.node(target).is_none() {
                errors.push(ValidationError::DanglingTarget { node: id, target });
            }
        }
        if let FlowNode::Join { next } = node {
            if *next == id {
                errors.push(ValidationError::Unfinished { node: id });
            }
        }
    }
}

/// Check that every loop may run at least once.
fn validate_guards(graph: &FlowGraph, errors: &mut Vec<ValidationError>) {
    for (i, node) in graph.nodes.iter().enumerate() {
        if let FlowNode::Branch {
            guard: Some(guard), ..
        } = node
        {
            if guard.bound == 0 {
                errors.push(ValidationError::ZeroLoopBound { node: i as NodeId });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_graph_is_valid() {
        assert!(validate_graph(&FlowGraph::new()).is_ok());
    }

    #[test]
    fn test_dangling_target_is_reported() {
        let mut graph = FlowGraph::new();
        let id = graph.add_node(FlowNode::Join { next: 99 }, 1);
        graph.set_node(graph.entry, FlowNode::Start { next: id });
        let errors = validate_graph(&graph).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DanglingTarget { node: id, target: 99 }]
        );
    }
}
