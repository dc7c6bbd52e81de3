//! Alias analysis: demotes shape-only and concat operators from action
//! nodes to views, and resolves every concat member's offset inside the
//! outermost concat buffer.

use std::collections::HashMap;

use smallvec::smallvec;

use crate::ir::{Coord, Graph, InputRef, NodeAttributes, NodeId, Opcode, OutputRef};
use crate::schedule::buffers::{BufferId, BufferParent, LogicalBuffer, MemoryLocation};

/// The extent each concat input contributes along the concat axis, in
/// declaration order.
fn concat_dims(graph: &Graph, node: NodeId, axis: usize) -> Vec<usize> {
    graph
        .node(node)
        .inputs()
        .iter()
        .map(|input| {
            let producer = input.connection().expect("validated graph");
            graph.output(producer).shape().dim(axis)
        })
        .collect()
}

fn input_connection(graph: &Graph, node: NodeId, index: u32) -> OutputRef {
    graph
        .connection(InputRef { node, index })
        .expect("validated graph")
}

/// Decides, per view-like operator, whether it can become a pure alias.
///
/// Bitcast: the output becomes a zero-offset view of the input unless that
/// would alias externally-owned bytes (`input`/`rdata`) into the `output`
/// region, which must stay a real copy. When the bitcast's result is a graph
/// output and its source is scratch, the source is promoted to the `output`
/// region first, making the view free.
///
/// Concat: becomes a view when it concatenates along the outermost non-unit
/// axis, none of its inputs is externally owned or produced by a slice, and
/// fewer than two of its consumers are themselves concats. Member offsets
/// are assigned later by [`fix_concat_indices`].
pub(crate) fn analyze_buffer_alias(
    graph: &mut Graph,
    order: &[NodeId],
    buffers: &mut [LogicalBuffer],
    buffer_of: &HashMap<OutputRef, BufferId>,
) {
    for &node_id in order {
        match graph.node(node_id).opcode.clone() {
            Opcode::Bitcast => {
                let input = input_connection(graph, node_id, 0);
                let output = OutputRef {
                    node: node_id,
                    index: 0,
                };
                let in_id = buffer_of[&input];
                let out_id = buffer_of[&output];

                let out_location = buffers[out_id.0 as usize].location;
                if out_location == MemoryLocation::Output
                    && buffers[in_id.0 as usize].location == MemoryLocation::Data
                {
                    buffers[in_id.0 as usize].location = MemoryLocation::Output;
                }

                // Inputs and constants must be copied into outputs, never
                // aliased by them.
                let in_location = buffers[in_id.0 as usize].location;
                let must_copy = out_location == MemoryLocation::Output
                    && matches!(in_location, MemoryLocation::Input | MemoryLocation::Rdata);
                if !must_copy {
                    let begin: Coord = smallvec![0; graph.output(input).shape().rank()];
                    buffers[out_id.0 as usize].parent = Some(BufferParent {
                        buffer: in_id,
                        begin,
                    });
                    let node = graph.node_mut(node_id);
                    node.attributes = node.attributes.clear(NodeAttributes::action());
                }
            }
            Opcode::Concat(spec) => {
                let output = OutputRef {
                    node: node_id,
                    index: 0,
                };
                let first_input = input_connection(graph, node_id, 0);
                let outermost = spec.axis == 0
                    || graph.output(first_input).shape().dims()[..spec.axis]
                        .iter()
                        .all(|&dim| dim == 1);

                let inputs_viewable = graph.node(node_id).inputs().iter().all(|input| {
                    let producer = input.connection().expect("validated graph");
                    let location = buffers[buffer_of[&producer].0 as usize].location;
                    location != MemoryLocation::Input
                        && location != MemoryLocation::Rdata
                        && !matches!(graph.node(producer.node).opcode, Opcode::Slice(_))
                });

                let concat_consumers = graph
                    .consumers(output)
                    .iter()
                    .filter(|consumer| {
                        matches!(graph.node(consumer.node).opcode, Opcode::Concat(_))
                    })
                    .count();

                if outermost && inputs_viewable && concat_consumers < 2 {
                    // Member parents are assigned by fix_concat_indices.
                    let node = graph.node_mut(node_id);
                    node.attributes = node.attributes.clear(NodeAttributes::action());
                }
            }
            _ => {}
        }
    }
}

/// Assigns every view-concat member its offset inside the concat output,
/// then chases chains of view-concats upward so each leaf carries its
/// absolute offset inside the outermost concat's buffer.
pub(crate) fn fix_concat_indices(
    graph: &Graph,
    order: &[NodeId],
    buffers: &mut [LogicalBuffer],
    buffer_of: &HashMap<OutputRef, BufferId>,
) {
    for &node_id in order {
        let Opcode::Concat(spec) = &graph.node(node_id).opcode else {
            continue;
        };
        if graph.node(node_id).attributes.contains_action() {
            continue;
        }

        let output = OutputRef {
            node: node_id,
            index: 0,
        };
        let out_id = buffer_of[&output];

        // Running offsets in declaration order.
        let rank = graph
            .output(input_connection(graph, node_id, 0))
            .shape()
            .rank();
        let mut cnt_begin: Coord = smallvec![0; rank];
        for input in graph.node(node_id).inputs() {
            let producer = input.connection().expect("validated graph");
            let in_id = buffer_of[&producer];
            buffers[in_id.0 as usize].parent = Some(BufferParent {
                buffer: out_id,
                begin: cnt_begin.clone(),
            });
            cnt_begin[spec.axis] += graph.output(producer).shape().dim(spec.axis);
        }

        // Chase single-consumer chains of view-concats upward, shifting every
        // previously recorded member offset into the parent's coordinates.
        let mut child = node_id;
        loop {
            let child_output = OutputRef {
                node: child,
                index: 0,
            };
            let consumers = graph.consumers(child_output);
            if consumers.len() != 1 {
                break;
            }
            let consumer = consumers[0];
            let Opcode::Concat(parent_spec) = &graph.node(consumer.node).opcode else {
                break;
            };
            if graph.node(consumer.node).attributes.contains_action() {
                break;
            }

            let parent_dims = concat_dims(graph, consumer.node, parent_spec.axis);
            let offset: usize = parent_dims[..consumer.index as usize].iter().sum();
            let mut child_begin: Coord = smallvec![0; graph.output(child_output).shape().rank()];
            child_begin[parent_spec.axis] += offset;

            let parent_output = OutputRef {
                node: consumer.node,
                index: 0,
            };
            let parent_out_id = buffer_of[&parent_output];
            let child_out_id = buffer_of[&child_output];
            buffers[child_out_id.0 as usize].parent = Some(BufferParent {
                buffer: parent_out_id,
                begin: child_begin.clone(),
            });

            for input in graph.node(node_id).inputs() {
                let producer = input.connection().expect("validated graph");
                let in_id = buffer_of[&producer];
                let parent = buffers[in_id.0 as usize]
                    .parent
                    .as_mut()
                    .expect("concat member has a parent");
                parent.buffer = parent_out_id;
                for (begin, shift) in parent.begin.iter_mut().zip(child_begin.iter()) {
                    *begin += shift;
                }
            }

            child = consumer.node;
        }
    }
}
