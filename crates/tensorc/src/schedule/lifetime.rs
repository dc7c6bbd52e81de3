//! Lifetime recording: assigns every output connector a logical buffer and
//! tracks the half-open age interval over which its bytes must stay valid.

use std::collections::HashMap;

use crate::ir::{Graph, Opcode, OutputRef};
use crate::schedule::buffers::{BufferId, Lifetime, LogicalBuffer, MemoryLocation};
use crate::schedule::scheduler::ScheduleError;

/// Classifies an output connector into its memory region.
///
/// Graph inputs and constants have fixed homes; anything consumed by an
/// `Output` sink is surfaced in the `output` region; the rest is scratch.
pub(crate) fn decide_memory_location(graph: &Graph, connector: OutputRef) -> MemoryLocation {
    match graph.node(connector.node).opcode {
        Opcode::Input => MemoryLocation::Input,
        Opcode::Constant => MemoryLocation::Rdata,
        _ => {
            let feeds_output = graph
                .consumers(connector)
                .iter()
                .any(|consumer| matches!(graph.node(consumer.node).opcode, Opcode::Output));
            if feeds_output {
                MemoryLocation::Output
            } else {
                MemoryLocation::Data
            }
        }
    }
}

/// Owns the buffer table while the post-order walk runs the integer clock.
///
/// Per visited node: outputs are born, the clock ticks once (every live
/// buffer ages), then each input releases one use of its producing buffer.
/// Producers are always visited before consumers, so birth precedes every
/// release.
pub(crate) struct LifetimeRecorder {
    buffers: Vec<LogicalBuffer>,
    buffer_of: HashMap<OutputRef, BufferId>,
    age: usize,
}

impl LifetimeRecorder {
    pub(crate) fn new() -> Self {
        LifetimeRecorder {
            buffers: Vec::new(),
            buffer_of: HashMap::new(),
            age: 0,
        }
    }

    /// Creates the logical buffer for `connector` unless one already exists.
    pub(crate) fn allocate(&mut self, graph: &Graph, connector: OutputRef) {
        if self.buffer_of.contains_key(&connector) {
            return;
        }
        let id = BufferId(self.buffers.len() as u32);
        let output = graph.output(connector);
        self.buffers.push(LogicalBuffer {
            id,
            owner: connector,
            location: decide_memory_location(graph, connector),
            dtype: output.dtype(),
            shape: output.shape().clone(),
            lifetime: Lifetime {
                birth: self.age,
                age: 0,
                used_count: output.consumers().len(),
            },
            parent: None,
            physical: None,
        });
        self.buffer_of.insert(connector, id);
    }

    /// Releases one use of the buffer behind `connector`.
    pub(crate) fn release(&mut self, connector: OutputRef) -> Result<(), ScheduleError> {
        if let Some(&id) = self.buffer_of.get(&connector) {
            let lifetime = &mut self.buffers[id.0 as usize].lifetime;
            if !lifetime.is_alive() {
                return Err(ScheduleError::DoubleRelease { connector });
            }
            lifetime.used_count -= 1;
        }
        Ok(())
    }

    /// Advances the clock one tick; every still-live buffer ages with it.
    pub(crate) fn grow_age(&mut self) {
        self.age += 1;
        for buffer in &mut self.buffers {
            if buffer.lifetime.is_alive() {
                buffer.lifetime.age += 1;
            }
        }
    }

    pub(crate) fn finish(self) -> (Vec<LogicalBuffer>, HashMap<OutputRef, BufferId>) {
        (self.buffers, self.buffer_of)
    }
}
