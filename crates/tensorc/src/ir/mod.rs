//! Graph IR subset consumed by the scheduler: element types, shapes, nodes
//! with bidirectional connectors, the arena graph and its traversal.

mod dtype;
mod graph;
mod node;
mod shape;
mod visitor;

pub use dtype::DType;
pub use graph::{Graph, GraphBuilder};
pub use node::{
    BinaryOp, ConcatSpec, InputConnector, InputRef, Node, NodeAttributes, NodeId, Opcode,
    OutputConnector, OutputRef, SliceSpec, UnaryOp,
};
pub use shape::{element_offset, Coord, Shape};
pub use visitor::postorder;
