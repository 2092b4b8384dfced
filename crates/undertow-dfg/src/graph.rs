//! The dataflow graph store.
//!
//! Nodes and edges live in insertion-ordered arenas and are addressed by id;
//! the graph also keeps the map from IR values to their operator nodes. The
//! store owns everything. IR values are referenced back only by id, never
//! by ownership, so the deliberately cyclic graph needs no owning cycles.
//!
//! Stale ids passed to [`DataflowGraph::add_edge`] or
//! [`DataflowGraph::remove_node`] are development guard rails: they log a
//! warning and the operation is a no-op.

use std::fmt;

use indexmap::IndexMap;
use tracing::warn;

use undertow_ir::{Function, Instruction, Terminator, ValueId, ValueKind};

/// Operator taxonomy of the dataflow graph. Closed set; see the graph
/// printer for the rendering of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Placeholder until classification; never present in a finished graph.
    Unknown,
    FunctionInput,
    FunctionOutput,
    Constant,
    /// Pure arithmetic, bitwise or comparison operator with one result.
    BasicBinaryOp,
    Load,
    Store,
    /// Passes its data input iff the decider is true.
    TrueSteer,
    /// Passes its data input iff the decider is false.
    FalseSteer,
    /// Path-selecting mux: decider plus two data inputs.
    Merge,
    /// Loop-carried two-state operator (initial value, then loop-back).
    Carry,
    /// Carry with its second input tied to its own output.
    Invariant,
    /// Two-input join that emits its second input when both are present.
    Order,
    /// Iteration / activation token source.
    Stream,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Unknown => "Unknown",
            OpKind::FunctionInput => "FunctionInput",
            OpKind::FunctionOutput => "FunctionOutput",
            OpKind::Constant => "Constant",
            OpKind::BasicBinaryOp => "BinOp",
            OpKind::Load => "Load",
            OpKind::Store => "Store",
            OpKind::TrueSteer => "TrueSteer",
            OpKind::FalseSteer => "FalseSteer",
            OpKind::Merge => "Merge",
            OpKind::Carry => "Carry",
            OpKind::Invariant => "Invariant",
            OpKind::Order => "Order",
            OpKind::Stream => "Stream",
        }
    }

    pub fn is_steer(&self) -> bool {
        matches!(self, OpKind::TrueSteer | OpKind::FalseSteer)
    }
}

/// Node identifier within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Edge identifier within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

/// Key of the value-to-node map. Besides plain IR values there is one
/// synthesized sentinel: the per-function entry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Ir(ValueId),
    EntryStream,
}

/// A dataflow operator node.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: OpKind,
    /// Originating IR value; synthesized nodes (steers, streams) have none.
    pub origin: Option<ValueId>,
    pub label: String,
    /// Short operator symbol (`+`, `<=`, …), preferred by the printer.
    pub symbol: Option<String>,
    pub inputs: Vec<EdgeId>,
    pub outputs: Vec<EdgeId>,
}

/// A directed value-carrying edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: NodeId,
    pub dest: NodeId,
}

/// The graph store. Iteration over nodes and edges follows insertion order,
/// so output is deterministic given the build order.
#[derive(Debug, Default)]
pub struct DataflowGraph {
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeId, Edge>,
    value_map: IndexMap<ValueRef, NodeId>,
    next_node: u32,
    next_edge: u32,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always creates a fresh node. A provided origin binds the value map.
    pub fn add_node(&mut self, kind: OpKind, origin: Option<ValueId>, label: &str) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                origin,
                label: label.to_string(),
                symbol: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
        );
        if let Some(value) = origin {
            self.value_map.insert(ValueRef::Ir(value), id);
        }
        id
    }

    /// Bind a synthesized key (the entry stream) to a node.
    pub fn bind_value(&mut self, key: ValueRef, node: NodeId) {
        self.value_map.insert(key, node);
    }

    /// Return the node for `value`, creating one when the value can be an
    /// operator at all. Arguments become `FunctionInput`, constants become
    /// `Constant`, instructions start as `Unknown` until classified.
    ///
    /// Branches, selects, casts and address arithmetic are never
    /// materialized: the result is `None`.
    pub fn get_or_add(&mut self, func: &Function, value: ValueId) -> Option<NodeId> {
        match &func.value(value).kind {
            ValueKind::Inst => match func.def(value) {
                Some(Instruction::Select { .. })
                | Some(Instruction::Offset { .. })
                | Some(Instruction::Cast { .. }) => return None,
                _ => {}
            },
            ValueKind::Term => match func.def_terminator(value) {
                Some(Terminator::Jump { .. }) | Some(Terminator::Branch { .. }) => return None,
                _ => {}
            },
            _ => {}
        }

        if let Some(node) = self.find_node(ValueRef::Ir(value)) {
            return Some(node);
        }

        let (kind, label) = match &func.value(value).kind {
            ValueKind::Param { .. } => (
                OpKind::FunctionInput,
                undertow_ir::print::value_summary(func, value),
            ),
            ValueKind::Const(c) => (OpKind::Constant, c.to_string()),
            _ => (OpKind::Unknown, String::new()),
        };
        Some(self.add_node(kind, Some(value), &label))
    }

    /// Add an edge, suppressing duplicates. Unknown endpoints warn and no-op.
    pub fn add_edge(&mut self, source: NodeId, dest: NodeId) {
        if !self.nodes.contains_key(&source) {
            warn!(%source, "add_edge: unknown source node");
            return;
        }
        if !self.nodes.contains_key(&dest) {
            warn!(%dest, "add_edge: unknown destination node");
            return;
        }
        let duplicate = self.nodes[&source]
            .outputs
            .iter()
            .any(|e| self.edges[e].dest == dest);
        if duplicate {
            return;
        }

        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(id, Edge { source, dest });
        if let Some(node) = self.nodes.get_mut(&source) {
            node.outputs.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&dest) {
            node.inputs.push(id);
        }
    }

    pub fn find_node(&self, key: ValueRef) -> Option<NodeId> {
        self.value_map.get(&key).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Remove a node, unlinking every adjacent edge from both endpoints and
    /// erasing the node's value-map entry.
    pub fn remove_node(&mut self, node: NodeId) {
        let adjacent: Vec<EdgeId> = match self.nodes.get(&node) {
            Some(n) => n.inputs.iter().chain(n.outputs.iter()).copied().collect(),
            None => {
                warn!(%node, "remove_node: unknown node");
                return;
            }
        };

        for eid in adjacent {
            if let Some(edge) = self.edges.shift_remove(&eid) {
                if let Some(src) = self.nodes.get_mut(&edge.source) {
                    src.outputs.retain(|e| *e != eid);
                }
                if let Some(dst) = self.nodes.get_mut(&edge.dest) {
                    dst.inputs.retain(|e| *e != eid);
                }
            }
        }

        self.nodes.shift_remove(&node);
        let key = self
            .value_map
            .iter()
            .find(|(_, n)| **n == node)
            .map(|(k, _)| *k);
        if let Some(key) = key {
            self.value_map.shift_remove(&key);
        }
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, n)| (*id, n))
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().map(|(id, e)| (*id, e))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_edge(&self, source: NodeId, dest: NodeId) -> bool {
        self.edges
            .values()
            .any(|e| e.source == source && e.dest == dest)
    }

    /// Connect the producer of `value` to `dest`, seeing through address
    /// arithmetic, casts and still-unclassified nodes.
    ///
    /// This is the single pass-through primitive: address computations and
    /// casts forward their operands instead of becoming operators, and a
    /// node still typed `Unknown` must not become a source. When the
    /// recursion bottoms out at a value with no node and no operands, no
    /// edge is created.
    pub fn wire_value_to_node(&mut self, func: &Function, value: ValueId, dest: NodeId) {
        match func.def(value) {
            Some(Instruction::Offset { base, indices, .. }) => {
                let base = *base;
                let indices = indices.clone();
                self.wire_value_to_node(func, base, dest);
                for index in indices {
                    self.wire_value_to_node(func, index, dest);
                }
                return;
            }
            Some(Instruction::Cast { value: inner, .. }) => {
                let inner = *inner;
                self.wire_value_to_node(func, inner, dest);
                return;
            }
            _ => {}
        }

        if let Some(source) = self.find_node(ValueRef::Ir(value)) {
            let known = self
                .node(source)
                .map(|n| n.kind != OpKind::Unknown)
                .unwrap_or(false);
            if known {
                self.add_edge(source, dest);
                return;
            }
        }

        if let Some(inst) = func.def(value) {
            for op in inst.operands() {
                self.wire_value_to_node(func, op, dest);
            }
        }
    }
}
