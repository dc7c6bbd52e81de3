//! The memory scheduler: turns a typed dataflow graph plus a target into an
//! execution sequence and a byte-level buffer placement per memory region.

mod alias;
mod buffers;
mod lifetime;
mod scheduler;

pub use buffers::{
    BufferAllocation, BufferId, BufferParent, Lifetime, LogicalBuffer, MemoryLocation, MemorySpan,
    PhysicalBuffer, PhysicalId,
};
pub use scheduler::{
    schedule, schedule_graph, schedule_with, ScheduleError, ScheduleOptions, ScheduleResult,
};
