pub mod allocator;
mod env;
pub mod ir;
pub mod schedule;
pub mod target;

pub use ir::{DType, Graph, GraphBuilder, NodeId, Opcode, OutputRef, Shape};
pub use schedule::{
    schedule, schedule_graph, schedule_with, BufferAllocation, MemoryLocation, ScheduleError,
    ScheduleOptions, ScheduleResult,
};
pub use target::{ReferenceTarget, Target};
