use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::{Coord, DType, Shape};

/// Stable identifier of a node inside a [`Graph`](crate::ir::Graph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Addresses one output connector of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub index: u32,
}

/// Addresses one input connector of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputRef {
    pub node: NodeId,
    pub index: u32,
}

/// Elementwise unary ops carried through scheduling as opaque action nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Relu,
    Neg,
    Exp,
    Sqrt,
    Tanh,
}

/// Elementwise binary ops carried through scheduling as opaque action nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

/// Attribute payload for `concat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatSpec {
    pub axis: usize,
}

/// Attribute payload for `slice`: the half-open window `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub begin: Coord,
    pub end: Coord,
}

/// Tagged union of node kinds.
///
/// Only `Bitcast` and `Concat` receive specialised scheduler handling; every
/// other compute opcode is an opaque action node whose outputs simply need
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    /// Graph input placeholder; its buffers live in the `input` region.
    Input,
    /// Graph output sink; consumes exactly one connector and produces none.
    Output,
    /// Embedded weight or other read-only payload; lives in `rdata`.
    Constant,
    /// Shape-only reinterpretation of the same bytes.
    Bitcast,
    Concat(ConcatSpec),
    Slice(SliceSpec),
    Unary(UnaryOp),
    Binary(BinaryOp),
    MatMul,
}

impl Opcode {
    /// Short stable name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Input => "input",
            Opcode::Output => "output",
            Opcode::Constant => "constant",
            Opcode::Bitcast => "bitcast",
            Opcode::Concat(_) => "concat",
            Opcode::Slice(_) => "slice",
            Opcode::Unary(_) => "unary",
            Opcode::Binary(_) => "binary",
            Opcode::MatMul => "matmul",
        }
    }

    /// Whether nodes of this opcode start out with the `action` bit set.
    ///
    /// Inputs, outputs and constants never execute; everything else does
    /// until the alias analyser demotes it.
    pub fn default_attributes(&self) -> NodeAttributes {
        match self {
            Opcode::Input | Opcode::Output | Opcode::Constant => NodeAttributes::empty(),
            _ => NodeAttributes::action(),
        }
    }
}

/// Per-node attribute bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes(u8);

impl NodeAttributes {
    const ACTION: u8 = 1;

    pub fn empty() -> Self {
        NodeAttributes(0)
    }

    /// The node must execute at runtime.
    pub fn action() -> Self {
        NodeAttributes(Self::ACTION)
    }

    pub fn contains_action(self) -> bool {
        (self.0 & Self::ACTION) != 0
    }

    pub fn merge(mut self, other: NodeAttributes) -> Self {
        self.0 |= other.0;
        self
    }

    pub fn clear(mut self, other: NodeAttributes) -> Self {
        self.0 &= !other.0;
        self
    }
}

/// Input connector: references at most one producing output connector.
#[derive(Debug, Clone, Default)]
pub struct InputConnector {
    pub(crate) connection: Option<OutputRef>,
}

impl InputConnector {
    pub fn connection(&self) -> Option<OutputRef> {
        self.connection
    }
}

/// Output connector: tensor metadata plus the consumers wired to it.
#[derive(Debug, Clone)]
pub struct OutputConnector {
    pub(crate) dtype: DType,
    pub(crate) shape: Shape,
    pub(crate) consumers: SmallVec<[InputRef; 4]>,
}

impl OutputConnector {
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn consumers(&self) -> &[InputRef] {
        &self.consumers
    }
}

/// A node in the dataflow graph.
pub struct Node {
    pub opcode: Opcode,
    pub attributes: NodeAttributes,
    pub(crate) inputs: Vec<InputConnector>,
    pub(crate) outputs: Vec<OutputConnector>,
}

impl Node {
    pub fn inputs(&self) -> &[InputConnector] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputConnector] {
        &self.outputs
    }
}
