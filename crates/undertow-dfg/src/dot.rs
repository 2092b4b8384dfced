//! DOT emitters for the dataflow graph and the CFG.
//!
//! The DFG printer picks a Graphviz shape per operator kind and a label in
//! the order: operator symbol, explicit label, synthesized kind name plus a
//! one-line dump of the originating IR. Nodes without outputs are pruned
//! from the picture, except function inputs/outputs and merges, which are
//! kept as sinks for readability. Emission order follows build order, so
//! the output is deterministic.

use std::fmt::Write as _;
use std::io::{self, Write};

use undertow_ir::print::{fmt_instruction, fmt_terminator, value_summary};
use undertow_ir::Function;

use crate::graph::{DataflowGraph, Node, NodeId, OpKind};

fn shape(kind: OpKind) -> &'static str {
    match kind {
        OpKind::FunctionInput => "ellipse",
        OpKind::FunctionOutput => "ellipse",
        OpKind::Constant => "box",
        OpKind::BasicBinaryOp => "box",
        OpKind::Load => "ellipse",
        OpKind::Store => "ellipse",
        OpKind::TrueSteer => "triangle",
        OpKind::FalseSteer => "invtriangle",
        OpKind::Merge => "octagon",
        OpKind::Carry => "box",
        OpKind::Invariant => "box",
        OpKind::Order => "box",
        OpKind::Stream => "circle",
        OpKind::Unknown => "box",
    }
}

fn node_label(node: &Node, func: &Function) -> String {
    if let Some(symbol) = &node.symbol {
        if !symbol.is_empty() {
            return symbol.clone();
        }
    }
    if !node.label.is_empty() {
        return node.label.clone();
    }
    let mut label = node.kind.name().to_string();
    if let Some(origin) = node.origin {
        label.push_str("\\n");
        label.push_str(&value_summary(func, origin));
    }
    label
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Keep sink nodes that carry meaning on their own.
fn keep_as_sink(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::FunctionInput | OpKind::FunctionOutput | OpKind::Merge
    )
}

/// Render the dataflow graph to DOT text.
pub fn dfg_to_dot(graph: &DataflowGraph, func: &Function) -> String {
    let mut out = String::from("digraph \"dfg\" {\n");

    let mut printed: Vec<NodeId> = Vec::new();
    for (id, node) in graph.nodes() {
        if node.outputs.is_empty() && !keep_as_sink(node.kind) {
            continue;
        }
        let _ = writeln!(
            out,
            "  \"node{}\" [label=\"{}\", shape=\"{}\"];",
            printed.len(),
            escape(&node_label(node, func)),
            shape(node.kind)
        );
        printed.push(id);
    }

    // DOT node names follow print order, not arena order.
    let dot_name = |id: NodeId| -> Option<usize> { printed.iter().position(|p| *p == id) };

    for (_, edge) in graph.edges() {
        if let (Some(src), Some(dst)) = (dot_name(edge.source), dot_name(edge.dest)) {
            let _ = writeln!(out, "  \"node{}\" -> \"node{}\";", src, dst);
        }
    }

    out.push_str("}\n");
    out
}

/// Render the function's CFG to DOT text: one rectangle per block labeled
/// with its printed instructions, one edge per successor.
pub fn cfg_to_dot(func: &Function) -> String {
    let mut out = String::from("digraph \"cfg\" {\n");
    out.push_str("  node [shape=rectangle fontname=\"Courier\"];\n");

    for block in &func.blocks {
        let mut label = format!("{}:\\l", block.id);
        for inst in &block.instructions {
            label.push_str(&escape(&fmt_instruction(func, inst)));
            label.push_str("\\l");
        }
        if let Some(term) = &block.terminator {
            label.push_str(&escape(&fmt_terminator(func, term)));
            label.push_str("\\l");
        }
        let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", block.id, label);
    }

    for block in &func.blocks {
        if let Some(term) = &block.terminator {
            for succ in term.successors() {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", block.id, succ);
            }
        }
    }

    out.push_str("}\n");
    out
}

/// Write the dataflow graph as DOT to `writer`.
pub fn write_dfg<W: Write>(writer: &mut W, graph: &DataflowGraph, func: &Function) -> io::Result<()> {
    writer.write_all(dfg_to_dot(graph, func).as_bytes())
}

/// Write the CFG as DOT to `writer`.
pub fn write_cfg<W: Write>(writer: &mut W, func: &Function) -> io::Result<()> {
    writer.write_all(cfg_to_dot(func).as_bytes())
}
