//! View-demotion behaviour of the alias analyser: which bitcasts and
//! concats stop being real copies, and which blockers keep them executable.

use tensorc::ir::UnaryOp;
use tensorc::{
    schedule, DType, GraphBuilder, MemoryLocation, NodeId, ReferenceTarget, ScheduleResult,
};

fn run(graph: &mut tensorc::Graph, roots: &[NodeId]) -> ScheduleResult {
    schedule(graph, roots, &ReferenceTarget::with_alignment(8)).expect("schedule")
}

#[test]
fn reshape_between_compute_ops_becomes_a_view() {
    let mut builder = GraphBuilder::new();
    let x = builder.input(DType::F32, [2, 3]);
    let r = builder.bitcast(x, [6]);
    let y = builder.unary(UnaryOp::Relu, r);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[y.node]);
    assert!(!graph.node(r.node).attributes.contains_action());
    assert_eq!(result.compute_sequence, vec![y.node]);

    // The view shares the input buffer's bytes from offset zero.
    let reshape = &result.allocations[&r];
    assert_eq!(reshape.location, MemoryLocation::Input);
    assert_eq!(reshape.start, result.allocations[&x].start);
    // A bitcast declares itself as its own parent shape.
    assert_eq!(reshape.parent_shape.dims(), &[6]);
    assert_eq!(reshape.strides.as_slice(), &[1]);
}

#[test]
fn bitcast_promotes_scratch_source_into_the_output_region() {
    let mut builder = GraphBuilder::new();
    let x = builder.input(DType::F32, [2, 3]);
    let a = builder.unary(UnaryOp::Relu, x);
    let r = builder.bitcast(a, [6]);
    let root = builder.output(r);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[root]);
    assert!(!graph.node(r.node).attributes.contains_action());
    assert_eq!(result.compute_sequence, vec![a.node]);

    // The relu result was promoted: it directly is the graph output.
    assert_eq!(result.allocations[&a].location, MemoryLocation::Output);
    assert_eq!(result.allocations[&r].location, MemoryLocation::Output);
    assert_eq!(result.allocations[&r].start, result.allocations[&a].start);
    assert_eq!(result.max_usages[&MemoryLocation::Data], 0);
}

#[test]
fn bitcast_from_model_input_to_graph_output_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let x = builder.input(DType::F32, [6]);
    let r = builder.bitcast(x, [2, 3]);
    let root = builder.output(r);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[root]);
    assert!(graph.node(r.node).attributes.contains_action());
    assert_eq!(result.compute_sequence, vec![r.node]);
    assert_eq!(result.allocations[&x].location, MemoryLocation::Input);
    assert_eq!(result.allocations[&r].location, MemoryLocation::Output);
}

#[test]
fn bitcast_from_constant_to_graph_output_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let weights = builder.constant(DType::F32, [4]);
    let r = builder.bitcast(weights, [2, 2]);
    let root = builder.output(r);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[root]);
    assert!(graph.node(r.node).attributes.contains_action());
    assert_eq!(result.allocations[&weights].location, MemoryLocation::Rdata);
    assert_eq!(result.allocations[&r].location, MemoryLocation::Output);
}

#[test]
fn concat_over_constant_input_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let a = builder.constant(DType::F32, [2, 4]);
    let x = builder.input(DType::F32, [3, 4]);
    let b = builder.unary(UnaryOp::Relu, x);
    let cc = builder.concat(0, &[a, b]);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[cc.node]);
    assert!(graph.node(cc.node).attributes.contains_action());
    assert_eq!(result.compute_sequence, vec![b.node, cc.node]);

    // Constant and concat output keep independent storage.
    assert_eq!(result.allocations[&a].location, MemoryLocation::Rdata);
    assert_eq!(result.allocations[&cc].location, MemoryLocation::Data);
    assert_eq!(result.max_usages[&MemoryLocation::Rdata], 32);
}

#[test]
fn concat_over_slice_output_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let x = builder.input(DType::F32, [4, 4]);
    let s = builder.slice(x, &[0, 0], &[2, 4]);
    let y = builder.input(DType::F32, [3, 4]);
    let b = builder.unary(UnaryOp::Relu, y);
    let cc = builder.concat(0, &[s, b]);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[cc.node]);
    assert!(graph.node(cc.node).attributes.contains_action());
    assert!(result.compute_sequence.contains(&cc.node));
}

#[test]
fn concat_along_inner_axis_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let x1 = builder.input(DType::F32, [2, 3]);
    let x2 = builder.input(DType::F32, [2, 5]);
    let a = builder.unary(UnaryOp::Relu, x1);
    let b = builder.unary(UnaryOp::Relu, x2);
    let cc = builder.concat(1, &[a, b]);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[cc.node]);
    assert!(graph.node(cc.node).attributes.contains_action());
    assert!(result.compute_sequence.contains(&cc.node));
}

#[test]
fn concat_along_unit_prefix_axis_becomes_a_view() {
    let mut builder = GraphBuilder::new();
    let x1 = builder.input(DType::F32, [1, 3]);
    let x2 = builder.input(DType::F32, [1, 5]);
    let a = builder.unary(UnaryOp::Relu, x1);
    let b = builder.unary(UnaryOp::Relu, x2);
    let cc = builder.concat(1, &[a, b]);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[cc.node]);
    assert!(!graph.node(cc.node).attributes.contains_action());
    assert_eq!(result.compute_sequence, vec![a.node, b.node]);

    // Offsets inside the [1, 8] footprint, row-major.
    assert_eq!(result.allocations[&a].start, 0);
    assert_eq!(result.allocations[&b].start, 3 * 4);
    assert_eq!(result.allocations[&a].parent_shape.dims(), &[1, 8]);
    assert_eq!(result.max_usages[&MemoryLocation::Data], 32);
}

#[test]
fn concat_feeding_two_concats_stays_a_copy() {
    let mut builder = GraphBuilder::new();
    let x1 = builder.input(DType::F32, [2, 2]);
    let x2 = builder.input(DType::F32, [2, 2]);
    let a = builder.unary(UnaryOp::Relu, x1);
    let b = builder.unary(UnaryOp::Relu, x2);
    let cc = builder.concat(0, &[a, b]);
    // Both consumers are concats; their constant members also block them
    // from becoming views themselves.
    let c1 = builder.constant(DType::F32, [1, 2]);
    let c2 = builder.constant(DType::F32, [1, 2]);
    let d1 = builder.concat(0, &[cc, c1]);
    let d2 = builder.concat(0, &[cc, c2]);
    let mut graph = builder.finish();

    let result = run(&mut graph, &[d1.node, d2.node]);
    assert!(graph.node(cc.node).attributes.contains_action());
    assert!(graph.node(d1.node).attributes.contains_action());
    assert!(graph.node(d2.node).attributes.contains_action());
    assert!(result.compute_sequence.contains(&cc.node));
}
