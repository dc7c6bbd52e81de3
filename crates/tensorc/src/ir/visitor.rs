//! Deterministic post-order traversal over a graph.

use crate::ir::{Graph, NodeId};

enum Visit {
    Enter(NodeId),
    Exit(NodeId),
}

/// Walks the graph depth-first from `roots` and returns every reachable node
/// exactly once, producers strictly before consumers.
///
/// The order depends only on the root order and connector declaration order,
/// so the same graph always yields the same sequence. The traversal is
/// iterative; deep chains cannot overflow the stack. Unconnected inputs are
/// skipped here and rejected later by graph validation.
pub fn postorder(graph: &Graph, roots: &[NodeId]) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(graph.len());
    let mut visited = vec![false; graph.len()];
    let mut stack = Vec::new();

    for &root in roots {
        stack.push(Visit::Enter(root));
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    if visited[id.0 as usize] {
                        continue;
                    }
                    visited[id.0 as usize] = true;
                    stack.push(Visit::Exit(id));
                    for input in graph.node(id).inputs().iter().rev() {
                        if let Some(producer) = input.connection() {
                            if !visited[producer.node.0 as usize] {
                                stack.push(Visit::Enter(producer.node));
                            }
                        }
                    }
                }
                Visit::Exit(id) => order.push(id),
            }
        }
    }

    order
}
