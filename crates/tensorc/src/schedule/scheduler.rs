//! The scheduling pipeline.
//!
//! One [`Scheduler`] is constructed per run and drives a fixed sequence of
//! stages over a validated graph:
//!
//! ```text
//! validate -> lifetimes -> alias analysis -> concat indices
//!          -> lifetime close -> compute sequence
//!          -> physical pool -> region allocation -> materialise
//! ```
//!
//! The run is single-threaded and deterministic: every stage iterates the
//! post-order node sequence or buffer-id order, never a hash map. On the
//! first error the run aborts; the only side effect visible to the caller is
//! that node attribute bits may already have been toggled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocator::{AllocatorBank, PhysicalBufferInfo};
use crate::env;
use crate::ir::{element_offset, postorder, Graph, InputRef, NodeId, Opcode, OutputRef, SliceSpec};
use crate::schedule::alias::{analyze_buffer_alias, fix_concat_indices};
use crate::schedule::buffers::{
    BufferAllocation, BufferId, LogicalBuffer, MemoryLocation, PhysicalBuffer, PhysicalId,
};
use crate::schedule::lifetime::LifetimeRecorder;
use crate::target::Target;

/// Fatal scheduling failures. The scheduler never retries or recovers
/// partially; callers must treat the graph as undefined on error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("buffer of connector {connector:?} released more times than it has consumers")]
    DoubleRelease { connector: OutputRef },
    #[error("input {index} of node {node:?} has no producing connection")]
    DanglingConnection { node: NodeId, index: u32 },
    #[error("unsupported {opcode} operator: {reason}")]
    UnsupportedOperator { opcode: &'static str, reason: String },
    #[error("byte length of connector {connector:?} overflows usize")]
    ByteLenOverflow { connector: OutputRef },
    #[error("allocator for the {location} region cannot place a buffer of {size} bytes")]
    AllocatorExhausted { location: MemoryLocation, size: usize },
    #[error("target registered no allocator for the {location} region")]
    NoAllocatorForRegion { location: MemoryLocation },
    #[error("parent chain of buffer {buffer:?} does not terminate at a root")]
    InconsistentParentChain { buffer: BufferId },
    #[error("buffers {first:?} and {second:?} overlap in the {location} region")]
    AllocationOverlap {
        location: MemoryLocation,
        first: PhysicalId,
        second: PhysicalId,
    },
}

fn unsupported(opcode: &'static str, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::UnsupportedOperator {
        opcode,
        reason: reason.into(),
    }
}

/// Tunables for one scheduling run.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Re-check the non-overlap invariant over the produced placement,
    /// guarding against a faulty target allocator.
    pub verify_allocations: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            verify_allocations: env::verify_allocations_enabled(),
        }
    }
}

/// The schedule artifact consumed verbatim by code generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResult {
    /// Nodes still carrying the `action` bit, in execution order.
    pub compute_sequence: Vec<NodeId>,
    /// Byte-level placement of every output connector.
    pub allocations: HashMap<OutputRef, BufferAllocation>,
    /// Peak byte usage per memory region; zero for registered but unused
    /// regions.
    pub max_usages: HashMap<MemoryLocation, usize>,
}

/// Schedules `graph` from the given root nodes with default options.
pub fn schedule(
    graph: &mut Graph,
    roots: &[NodeId],
    target: &dyn Target,
) -> Result<ScheduleResult, ScheduleError> {
    schedule_with(graph, roots, target, &ScheduleOptions::default())
}

/// Schedules `graph` using its `Output` sink nodes as traversal roots.
pub fn schedule_graph(
    graph: &mut Graph,
    target: &dyn Target,
) -> Result<ScheduleResult, ScheduleError> {
    let roots = graph.output_nodes();
    schedule(graph, &roots, target)
}

/// Schedules `graph` from the given root nodes with explicit options.
pub fn schedule_with(
    graph: &mut Graph,
    roots: &[NodeId],
    target: &dyn Target,
    options: &ScheduleOptions,
) -> Result<ScheduleResult, ScheduleError> {
    Scheduler::new(graph, roots).run(target, options)
}

struct Scheduler<'g> {
    graph: &'g mut Graph,
    order: Vec<NodeId>,
    buffers: Vec<LogicalBuffer>,
    buffer_of: HashMap<OutputRef, BufferId>,
    physical: Vec<PhysicalBuffer>,
}

impl<'g> Scheduler<'g> {
    fn new(graph: &'g mut Graph, roots: &[NodeId]) -> Self {
        let order = postorder(graph, roots);
        Scheduler {
            graph,
            order,
            buffers: Vec::new(),
            buffer_of: HashMap::new(),
            physical: Vec::new(),
        }
    }

    fn run(
        mut self,
        target: &dyn Target,
        options: &ScheduleOptions,
    ) -> Result<ScheduleResult, ScheduleError> {
        self.validate_graph()?;
        self.make_logical_buffers()?;
        analyze_buffer_alias(self.graph, &self.order, &mut self.buffers, &self.buffer_of);
        fix_concat_indices(self.graph, &self.order, &mut self.buffers, &self.buffer_of);
        self.fix_lifetime()?;

        let mut result = ScheduleResult {
            compute_sequence: self.compute_sequence(),
            allocations: HashMap::new(),
            max_usages: HashMap::new(),
        };
        self.make_physical_buffers();
        self.allocate_physical_buffers(target, &mut result)?;
        if options.verify_allocations {
            self.verify_allocations()?;
        }
        self.assign_allocations(&mut result);
        Ok(result)
    }

    /// Rejects malformed graphs before any scheduling state is built.
    fn validate_graph(&self) -> Result<(), ScheduleError> {
        for &node_id in &self.order {
            let node = self.graph.node(node_id);
            for (index, input) in node.inputs().iter().enumerate() {
                if input.connection().is_none() {
                    return Err(ScheduleError::DanglingConnection {
                        node: node_id,
                        index: index as u32,
                    });
                }
            }
            for index in 0..node.outputs().len() {
                let connector = OutputRef {
                    node: node_id,
                    index: index as u32,
                };
                let output = self.graph.output(connector);
                if output.shape().byte_len(output.dtype()).is_none() {
                    return Err(ScheduleError::ByteLenOverflow { connector });
                }
            }
            match &node.opcode {
                Opcode::Bitcast => self.validate_bitcast(node_id)?,
                Opcode::Concat(spec) => self.validate_concat(node_id, spec.axis)?,
                Opcode::Slice(spec) => self.validate_slice(node_id, spec)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_bitcast(&self, node_id: NodeId) -> Result<(), ScheduleError> {
        let node = self.graph.node(node_id);
        if node.inputs().len() != 1 || node.outputs().len() != 1 {
            return Err(unsupported(
                "bitcast",
                "expects exactly one input and one output",
            ));
        }
        let input = self.connection(node_id, 0);
        let in_count = self.element_count(input)?;
        let output = OutputRef {
            node: node_id,
            index: 0,
        };
        let out_count = self.element_count(output)?;
        if in_count != out_count {
            return Err(unsupported(
                "bitcast",
                format!("element count mismatch: {in_count} vs {out_count}"),
            ));
        }
        Ok(())
    }

    fn validate_concat(&self, node_id: NodeId, axis: usize) -> Result<(), ScheduleError> {
        let node = self.graph.node(node_id);
        if node.inputs().is_empty() || node.outputs().len() != 1 {
            return Err(unsupported(
                "concat",
                "expects at least one input and exactly one output",
            ));
        }
        let out_shape = node.outputs()[0].shape().clone();
        let rank = out_shape.rank();
        if axis >= rank {
            return Err(unsupported(
                "concat",
                format!("axis {axis} out of range for rank {rank}"),
            ));
        }
        let mut axis_total = 0usize;
        for index in 0..node.inputs().len() {
            let producer = self.connection(node_id, index as u32);
            let in_shape = self.graph.output(producer).shape();
            if in_shape.rank() != rank {
                return Err(unsupported(
                    "concat",
                    format!("input rank {} differs from output rank {rank}", in_shape.rank()),
                ));
            }
            for dim in 0..rank {
                if dim != axis && in_shape.dim(dim) != out_shape.dim(dim) {
                    return Err(unsupported(
                        "concat",
                        format!("extent mismatch on axis {dim} outside the concat axis"),
                    ));
                }
            }
            axis_total += in_shape.dim(axis);
        }
        if axis_total != out_shape.dim(axis) {
            return Err(unsupported(
                "concat",
                format!(
                    "inputs cover {axis_total} elements on axis {axis}, output declares {}",
                    out_shape.dim(axis)
                ),
            ));
        }
        Ok(())
    }

    fn validate_slice(&self, node_id: NodeId, spec: &SliceSpec) -> Result<(), ScheduleError> {
        let node = self.graph.node(node_id);
        if node.inputs().len() != 1 || node.outputs().len() != 1 {
            return Err(unsupported(
                "slice",
                "expects exactly one input and one output",
            ));
        }
        let producer = self.connection(node_id, 0);
        let in_shape = self.graph.output(producer).shape();
        let out_shape = node.outputs()[0].shape();
        let rank = in_shape.rank();
        if spec.begin.len() != rank || spec.end.len() != rank || out_shape.rank() != rank {
            return Err(unsupported("slice", "window rank differs from input rank"));
        }
        for axis in 0..rank {
            let (begin, end) = (spec.begin[axis], spec.end[axis]);
            if begin > end || end > in_shape.dim(axis) {
                return Err(unsupported(
                    "slice",
                    format!("window [{begin}, {end}) out of bounds on axis {axis}"),
                ));
            }
            if out_shape.dim(axis) != end - begin {
                return Err(unsupported(
                    "slice",
                    format!("output extent on axis {axis} does not match the window"),
                ));
            }
        }
        Ok(())
    }

    /// Stage 1: post-order walk assigning buffers, births and release
    /// counts.
    fn make_logical_buffers(&mut self) -> Result<(), ScheduleError> {
        let mut recorder = LifetimeRecorder::new();
        for &node_id in &self.order {
            let output_count = self.graph.node(node_id).outputs().len();
            for index in 0..output_count {
                recorder.allocate(
                    self.graph,
                    OutputRef {
                        node: node_id,
                        index: index as u32,
                    },
                );
            }
            recorder.grow_age();
            for input in self.graph.node(node_id).inputs() {
                let producer = input.connection().expect("validated graph");
                recorder.release(producer)?;
            }
        }
        let (buffers, buffer_of) = recorder.finish();
        self.buffers = buffers;
        self.buffer_of = buffer_of;
        Ok(())
    }

    /// Stage 4: flatten parent chains to their roots and widen each root's
    /// lifetime to cover every alias.
    fn fix_lifetime(&mut self) -> Result<(), ScheduleError> {
        let count = self.buffers.len();
        for index in 0..count {
            let mut hops = 0usize;
            while let Some(parent) = self.buffers[index].parent.clone() {
                let Some(grand) = self.buffers[parent.buffer.0 as usize].parent.clone() else {
                    break;
                };
                self.buffers[index].parent = Some(grand);
                hops += 1;
                if hops > count {
                    return Err(ScheduleError::InconsistentParentChain {
                        buffer: BufferId(index as u32),
                    });
                }
            }
        }

        for index in 0..count {
            let Some(parent) = self.buffers[index].parent.clone() else {
                continue;
            };
            let child = self.buffers[index].lifetime;
            let root = &mut self.buffers[parent.buffer.0 as usize].lifetime;
            let birth = child.birth.min(root.birth);
            let end = child.end().max(root.end());
            root.birth = birth;
            root.age = end - birth;
        }
        Ok(())
    }

    /// Stage 5: the executable schedule is every node still marked `action`.
    fn compute_sequence(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.graph.node(id).attributes.contains_action())
            .collect()
    }

    /// Stage 6: one physical buffer per alias root, ids in buffer-id order.
    fn make_physical_buffers(&mut self) {
        for index in 0..self.buffers.len() {
            if self.buffers[index].parent.is_none() {
                let id = PhysicalId(self.physical.len() as u32);
                self.physical.push(PhysicalBuffer {
                    id,
                    owner: BufferId(index as u32),
                    allocation: None,
                });
                self.buffers[index].physical = Some(id);
            }
        }
        for index in 0..self.buffers.len() {
            if let Some(parent) = self.buffers[index].parent.clone() {
                let physical = self.buffers[parent.buffer.0 as usize]
                    .physical
                    .expect("parent chains are flattened to roots");
                self.buffers[index].physical = Some(physical);
            }
        }
    }

    /// Stage 7: feed physical buffers to the target's region allocators in
    /// ascending birth order and collect peak usages.
    fn allocate_physical_buffers(
        &mut self,
        target: &dyn Target,
        result: &mut ScheduleResult,
    ) -> Result<(), ScheduleError> {
        let mut bank = AllocatorBank::new();
        target.register_allocators(&mut bank);

        let mut mark_order: Vec<usize> = (0..self.physical.len()).collect();
        mark_order.sort_by_key(|&index| {
            let owner = &self.buffers[self.physical[index].owner.0 as usize];
            (owner.lifetime.birth, index)
        });

        for &index in &mark_order {
            let physical = &self.physical[index];
            let owner = &self.buffers[physical.owner.0 as usize];
            let size = owner.byte_len().ok_or(ScheduleError::ByteLenOverflow {
                connector: owner.owner,
            })?;
            let info = PhysicalBufferInfo {
                id: physical.id,
                location: owner.location,
                size,
                lifetime: owner.lifetime,
            };
            let allocator =
                bank.get_mut(owner.location)
                    .ok_or(ScheduleError::NoAllocatorForRegion {
                        location: owner.location,
                    })?;
            allocator
                .mark(&info)
                .map_err(|_| ScheduleError::AllocatorExhausted {
                    location: owner.location,
                    size,
                })?;
        }

        for location in MemoryLocation::ALL {
            if let Some(allocator) = bank.get_mut(location) {
                allocator.finish();
                result.max_usages.insert(location, allocator.max_usage());
            }
        }

        for physical in &mut self.physical {
            let owner = &self.buffers[physical.owner.0 as usize];
            let allocator = bank
                .get(owner.location)
                .expect("allocator presence checked while marking");
            physical.allocation = Some(
                *allocator
                    .allocations()
                    .get(&physical.id)
                    .expect("allocator records every marked buffer"),
            );
        }
        Ok(())
    }

    /// Optional stage: cross-check the placement the allocators produced.
    fn verify_allocations(&self) -> Result<(), ScheduleError> {
        for (index, first) in self.physical.iter().enumerate() {
            let owner_a = &self.buffers[first.owner.0 as usize];
            let span_a = first.allocation.expect("region allocation complete");
            for second in &self.physical[index + 1..] {
                let owner_b = &self.buffers[second.owner.0 as usize];
                if owner_a.location != owner_b.location {
                    continue;
                }
                if !owner_a.lifetime.overlaps(&owner_b.lifetime) {
                    continue;
                }
                let span_b = second.allocation.expect("region allocation complete");
                if span_a.size > 0 && span_b.size > 0 && span_a.overlaps(&span_b) {
                    return Err(ScheduleError::AllocationOverlap {
                        location: owner_a.location,
                        first: first.id,
                        second: second.id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stage 8: materialise one allocation record per output connector.
    fn assign_allocations(&self, result: &mut ScheduleResult) {
        for &node_id in &self.order {
            let node = self.graph.node(node_id);
            for index in 0..node.outputs().len() {
                let connector = OutputRef {
                    node: node_id,
                    index: index as u32,
                };
                let buffer = &self.buffers[self.buffer_of[&connector].0 as usize];
                let physical = &self.physical[buffer
                    .physical
                    .expect("physical pool bound every buffer")
                    .0 as usize];
                let root = &self.buffers[physical.owner.0 as usize];
                let span = physical.allocation.expect("region allocation complete");

                // A bitcast reinterprets the same bytes, so its declared
                // parent shape is its own.
                let parent_shape =
                    if buffer.parent.is_some() && !matches!(node.opcode, Opcode::Bitcast) {
                        root.shape.clone()
                    } else {
                        buffer.shape.clone()
                    };
                let strides = parent_shape.row_major_strides();
                let mut start = span.start;
                if let Some(parent) = &buffer.parent {
                    start += buffer.dtype.size_in_bytes() * element_offset(&strides, &parent.begin);
                }

                result.allocations.insert(
                    connector,
                    BufferAllocation {
                        location: root.location,
                        dtype: buffer.dtype,
                        size: buffer.byte_len().expect("validated byte length"),
                        shape: buffer.shape.clone(),
                        parent_shape,
                        strides,
                        start,
                    },
                );
            }
        }
    }

    fn connection(&self, node: NodeId, index: u32) -> OutputRef {
        self.graph
            .connection(InputRef { node, index })
            .expect("validated graph")
    }

    fn element_count(&self, connector: OutputRef) -> Result<usize, ScheduleError> {
        self.graph
            .output(connector)
            .shape()
            .element_count()
            .ok_or(ScheduleError::ByteLenOverflow { connector })
    }
}
