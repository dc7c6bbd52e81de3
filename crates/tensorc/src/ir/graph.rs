//! Node arena and construction surface for dataflow graphs.
//!
//! The graph owns every node; all cross-references are plain ids so that
//! consumers (notably the scheduler) can hold maps keyed by connectors
//! without tying their lifetimes to individual nodes. Connection state is
//! mirrored on both sides: an input connector stores its producing
//! [`OutputRef`], and the producing output connector stores the consumer
//! [`InputRef`]. [`Graph::connect`] and [`Graph::disconnect`] keep the two
//! views consistent.

use crate::ir::{
    BinaryOp, ConcatSpec, DType, InputConnector, InputRef, Node, NodeId, Opcode, OutputConnector,
    OutputRef, Shape, SliceSpec, UnaryOp,
};
use smallvec::SmallVec;

/// Arena of dataflow nodes.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node with the given opcode, input arity and output
    /// connectors. Inputs start unconnected; attributes take the opcode
    /// default.
    pub fn add_node(
        &mut self,
        opcode: Opcode,
        input_count: usize,
        outputs: impl IntoIterator<Item = (DType, Shape)>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let attributes = opcode.default_attributes();
        let outputs = outputs
            .into_iter()
            .map(|(dtype, shape)| OutputConnector {
                dtype,
                shape,
                consumers: SmallVec::new(),
            })
            .collect();
        self.nodes.push(Node {
            opcode,
            attributes,
            inputs: vec![InputConnector::default(); input_count],
            outputs,
        });
        id
    }

    /// Wires `input` to the producing `output`, replacing any previous
    /// connection and keeping both consumer lists consistent.
    pub fn connect(&mut self, input: InputRef, output: OutputRef) {
        self.disconnect(input);
        self.nodes[input.node.0 as usize].inputs[input.index as usize].connection = Some(output);
        self.nodes[output.node.0 as usize].outputs[output.index as usize]
            .consumers
            .push(input);
    }

    /// Clears the connection of `input`, if any.
    pub fn disconnect(&mut self, input: InputRef) {
        let slot = &mut self.nodes[input.node.0 as usize].inputs[input.index as usize];
        if let Some(previous) = slot.connection.take() {
            self.nodes[previous.node.0 as usize].outputs[previous.index as usize]
                .consumers
                .retain(|consumer| *consumer != input);
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    pub fn output(&self, output: OutputRef) -> &OutputConnector {
        &self.nodes[output.node.0 as usize].outputs[output.index as usize]
    }

    pub fn input(&self, input: InputRef) -> &InputConnector {
        &self.nodes[input.node.0 as usize].inputs[input.index as usize]
    }

    /// Returns the producing connector wired to `input`, if any.
    pub fn connection(&self, input: InputRef) -> Option<OutputRef> {
        self.input(input).connection
    }

    /// Returns the consumers wired to `output`, in connection order.
    pub fn consumers(&self, output: OutputRef) -> &[InputRef] {
        &self.output(output).consumers
    }

    /// All `Output` sink nodes in id order; the canonical traversal roots.
    pub fn output_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| matches!(node.opcode, Opcode::Output))
            .map(|(id, _)| id)
            .collect()
    }
}

/// Convenience layer for building well-formed graphs.
///
/// Each method appends one node, wires its inputs and returns the fresh
/// output connector. Shape bookkeeping here is intentionally shallow: the
/// scheduler re-validates everything it depends on.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            graph: Graph::new(),
        }
    }

    pub fn input(&mut self, dtype: DType, shape: impl Into<Shape>) -> OutputRef {
        self.leaf(Opcode::Input, dtype, shape.into())
    }

    pub fn constant(&mut self, dtype: DType, shape: impl Into<Shape>) -> OutputRef {
        self.leaf(Opcode::Constant, dtype, shape.into())
    }

    pub fn unary(&mut self, op: UnaryOp, input: OutputRef) -> OutputRef {
        let (dtype, shape) = self.spec_of(input);
        self.compute(Opcode::Unary(op), &[input], dtype, shape)
    }

    /// Elementwise binary op over operands of equal shape.
    pub fn binary(&mut self, op: BinaryOp, lhs: OutputRef, rhs: OutputRef) -> OutputRef {
        let (dtype, shape) = self.spec_of(lhs);
        self.compute(Opcode::Binary(op), &[lhs, rhs], dtype, shape)
    }

    pub fn matmul(&mut self, lhs: OutputRef, rhs: OutputRef) -> OutputRef {
        let (dtype, lhs_shape) = self.spec_of(lhs);
        let (_, rhs_shape) = self.spec_of(rhs);
        assert!(
            lhs_shape.rank() == 2 && rhs_shape.rank() == 2,
            "matmul operands must be rank-2"
        );
        let shape = Shape::from([lhs_shape.dim(0), rhs_shape.dim(1)]);
        self.compute(Opcode::MatMul, &[lhs, rhs], dtype, shape)
    }

    /// Shape-only reinterpretation of `input`.
    pub fn bitcast(&mut self, input: OutputRef, shape: impl Into<Shape>) -> OutputRef {
        let (dtype, _) = self.spec_of(input);
        self.compute(Opcode::Bitcast, &[input], dtype, shape.into())
    }

    /// Concatenation along `axis`; the output extent on `axis` is the sum of
    /// the input extents.
    pub fn concat(&mut self, axis: usize, inputs: &[OutputRef]) -> OutputRef {
        assert!(!inputs.is_empty(), "concat needs at least one input");
        let (dtype, first) = self.spec_of(inputs[0]);
        let mut dims: Vec<usize> = first.dims().to_vec();
        for &input in &inputs[1..] {
            dims[axis] += self.graph.output(input).shape().dim(axis);
        }
        self.compute(Opcode::Concat(ConcatSpec { axis }), inputs, dtype, dims.into())
    }

    /// Slice of the half-open window `[begin, end)`.
    pub fn slice(&mut self, input: OutputRef, begin: &[usize], end: &[usize]) -> OutputRef {
        let (dtype, _) = self.spec_of(input);
        let shape = Shape::new(begin.iter().zip(end).map(|(b, e)| e - b));
        let spec = SliceSpec {
            begin: begin.iter().copied().collect(),
            end: end.iter().copied().collect(),
        };
        self.compute(Opcode::Slice(spec), &[input], dtype, shape)
    }

    /// Marks `input` as a graph output by wiring it into a sink node.
    pub fn output(&mut self, input: OutputRef) -> NodeId {
        let node = self.graph.add_node(Opcode::Output, 1, std::iter::empty());
        self.graph.connect(InputRef { node, index: 0 }, input);
        node
    }

    pub fn finish(self) -> Graph {
        self.graph
    }

    fn leaf(&mut self, opcode: Opcode, dtype: DType, shape: Shape) -> OutputRef {
        let node = self.graph.add_node(opcode, 0, [(dtype, shape)]);
        OutputRef { node, index: 0 }
    }

    fn compute(
        &mut self,
        opcode: Opcode,
        inputs: &[OutputRef],
        dtype: DType,
        shape: Shape,
    ) -> OutputRef {
        let node = self
            .graph
            .add_node(opcode, inputs.len(), [(dtype, shape)]);
        for (index, &producer) in inputs.iter().enumerate() {
            self.graph.connect(
                InputRef {
                    node,
                    index: index as u32,
                },
                producer,
            );
        }
        OutputRef { node, index: 0 }
    }

    fn spec_of(&self, output: OutputRef) -> (DType, Shape) {
        let connector = self.graph.output(output);
        (connector.dtype(), connector.shape().clone())
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        GraphBuilder::new()
    }
}
