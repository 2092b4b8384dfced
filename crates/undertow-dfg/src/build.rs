//! The dataflow graph builder.
//!
//! Lowers one SSA function into operators and edges over an ordered sequence
//! of phases; later phases rely on the nodes established by earlier ones:
//!
//! 1. classify every instruction into its operator node
//! 2. materialize steer pairs for conditional branches
//! 3. convert selects into steer pairs
//! 4. wire data dependencies (loads, stores, pure ops, pass-throughs)
//! 5. resolve φ-nodes into Merge or loop-carried Carry operators
//! 6. fan arguments out to their users
//!
//! The builder reads the IR and never mutates it; memory ordering has
//! already been made explicit by the IR-side transform, so the token chain
//! arrives here as ordinary call operands and φ-nodes.

use indexmap::IndexMap;
use tracing::{debug, info};

use undertow_ir::analysis::{Loop, LoopInfo};
use undertow_ir::passes::{LOAD_PREFIX, STORE_PREFIX};
use undertow_ir::{BlockId, Constant, Function, Instruction, Terminator, ValueId};

use crate::graph::{DataflowGraph, NodeId, OpKind, ValueRef};

/// Build the dataflow graph of `func`. `loops` must describe the same
/// function.
pub fn build_dfg(func: &Function, loops: &LoopInfo) -> DataflowGraph {
    info!(function = %func.name, "building dataflow graph");

    let mut builder = DfgBuilder {
        func,
        loops,
        graph: DataflowGraph::new(),
        branch_steers: IndexMap::new(),
    };
    builder.classify_instructions();
    builder.lower_branches();
    builder.lower_selects();
    builder.wire_data_dependencies();
    builder.lower_phis();
    builder.wire_arguments();

    let graph = builder.graph;
    debug!(
        function = %func.name,
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "dataflow graph complete"
    );
    graph
}

struct DfgBuilder<'a> {
    func: &'a Function,
    loops: &'a LoopInfo,
    graph: DataflowGraph,
    /// Steer pair per conditional branch, keyed by the branch's block.
    branch_steers: IndexMap<BlockId, (NodeId, NodeId)>,
}

impl<'a> DfgBuilder<'a> {
    /// Phase 1: one operator node per instruction, tagged by kind, plus
    /// nodes for every argument and constant operand.
    fn classify_instructions(&mut self) {
        let func = self.func;

        for block in &func.blocks {
            for inst in &block.instructions {
                match inst {
                    // Handled by later phases or by the pass-through
                    // resolver; never materialized.
                    Instruction::Select { .. }
                    | Instruction::Offset { .. }
                    | Instruction::Cast { .. } => continue,

                    Instruction::Binary { result, op, .. } => {
                        self.tag(*result, OpKind::BasicBinaryOp, op.name(), op.symbol());
                    }
                    Instruction::Cmp { result, pred, .. } => {
                        self.tag(*result, OpKind::BasicBinaryOp, "cmp", Some(pred.symbol()));
                    }
                    Instruction::Load { result, .. } => {
                        self.tag(*result, OpKind::Load, "ld", None);
                    }
                    Instruction::Store { result, .. } => {
                        self.tag(*result, OpKind::Store, "st", None);
                    }
                    Instruction::Phi { result, .. } => {
                        // May be re-tagged Carry once loops are consulted.
                        self.tag(*result, OpKind::Merge, "M", None);
                    }
                    Instruction::Call { result, callee, .. } => {
                        if callee.starts_with(LOAD_PREFIX) {
                            self.tag(*result, OpKind::Load, "ld", None);
                        } else if callee.starts_with(STORE_PREFIX) {
                            self.tag(*result, OpKind::Store, "st", None);
                        } else {
                            // Opaque call: closest tag for a single-result
                            // operator with data inputs.
                            self.tag(*result, OpKind::BasicBinaryOp, "call", None);
                        }
                    }
                }
            }

            if let Some(term) = &block.terminator {
                if let Terminator::Return { .. } = term {
                    // Return is a sink; tagging it keeps the final graph
                    // free of Unknown nodes.
                    self.tag(term.id(), OpKind::FunctionOutput, "ret", None);
                }
            }
        }

        for param in &func.params {
            self.graph.get_or_add(func, param.value);
        }

        for block in &func.blocks {
            for inst in &block.instructions {
                for op in inst.operands() {
                    if func.as_const(op).is_some() || func.is_param(op) {
                        self.graph.get_or_add(func, op);
                    }
                }
            }
            if let Some(term) = &block.terminator {
                for op in term.operands() {
                    if func.as_const(op).is_some() || func.is_param(op) {
                        self.graph.get_or_add(func, op);
                    }
                }
            }
        }
    }

    /// Phase 2: a steer pair per conditional branch, gated on the entry
    /// stream token and wired into the first meaningful instruction of each
    /// successor.
    fn lower_branches(&mut self) {
        let func = self.func;

        for block in &func.blocks {
            let Some(Terminator::Branch {
                cond,
                then_block,
                else_block,
                ..
            }) = &block.terminator
            else {
                continue;
            };
            let (cond, then_block, else_block) = (*cond, *then_block, *else_block);

            let (true_steer, false_steer) = self.create_steers(cond, None, None);

            let stream = self.entry_stream();
            self.graph.add_edge(stream, true_steer);
            self.graph.add_edge(stream, false_steer);

            if let Some(first) = self.first_meaningful(then_block) {
                if let Some(dest) = self.graph.get_or_add(func, first) {
                    self.graph.add_edge(true_steer, dest);
                }
            }
            if let Some(first) = self.first_meaningful(else_block) {
                if let Some(dest) = self.graph.get_or_add(func, first) {
                    self.graph.add_edge(false_steer, dest);
                }
            }

            self.branch_steers
                .insert(block.id, (true_steer, false_steer));
        }
    }

    /// Phase 3: selects become steer pairs; every user of the select reads
    /// from both steers. The select itself never becomes a node.
    fn lower_selects(&mut self) {
        let func = self.func;

        for block in &func.blocks {
            for inst in &block.instructions {
                let Instruction::Select {
                    result,
                    cond,
                    on_true,
                    on_false,
                } = inst
                else {
                    continue;
                };
                let (result, cond, on_true, on_false) = (*result, *cond, *on_true, *on_false);

                let (true_steer, false_steer) =
                    self.create_steers(cond, Some(on_true), Some(on_false));

                for user in func.users(result) {
                    if let Some(dest) = self.graph.find_node(ValueRef::Ir(user)) {
                        self.graph.add_edge(true_steer, dest);
                        self.graph.add_edge(false_steer, dest);
                    }
                }
            }
        }
    }

    /// Phase 4: data-dependency edges for everything the earlier phases did
    /// not already cover.
    fn wire_data_dependencies(&mut self) {
        let func = self.func;

        for block in &func.blocks {
            for inst in &block.instructions {
                match inst {
                    Instruction::Load { result, ptr } => {
                        if let Some(node) = self.graph.find_node(ValueRef::Ir(*result)) {
                            self.graph.wire_value_to_node(func, *ptr, node);
                        }
                        self.wire_constants_and_users(inst);
                    }
                    Instruction::Store { result, ptr, value } => {
                        if let Some(node) = self.graph.find_node(ValueRef::Ir(*result)) {
                            self.graph.wire_value_to_node(func, *value, node);
                            self.graph.wire_value_to_node(func, *ptr, node);
                        }
                        // Stores wire nothing further.
                    }
                    Instruction::Offset {
                        result,
                        base,
                        indices,
                    } => {
                        // Pure pass-through: forward operands to every user.
                        for user in func.users(*result) {
                            if let Some(dest) = self.graph.find_node(ValueRef::Ir(user)) {
                                self.graph.wire_value_to_node(func, *base, dest);
                                for index in indices {
                                    self.graph.wire_value_to_node(func, *index, dest);
                                }
                            }
                        }
                    }
                    Instruction::Cast { result, value, .. } => {
                        for user in func.users(*result) {
                            if let Some(dest) = self.graph.find_node(ValueRef::Ir(user)) {
                                self.graph.wire_value_to_node(func, *value, dest);
                            }
                        }
                    }
                    // φ wiring happens in the merge phase; selects became
                    // steers already.
                    Instruction::Phi { .. } | Instruction::Select { .. } => {}

                    Instruction::Call {
                        result,
                        callee,
                        args,
                    } => {
                        if let Some(node) = self.graph.find_node(ValueRef::Ir(*result)) {
                            // Token loads and stores take address / value /
                            // token operands; opaque calls take data edges
                            // from all their operands.
                            for arg in args {
                                self.graph.wire_value_to_node(func, *arg, node);
                            }
                        }
                        if callee.starts_with(STORE_PREFIX) {
                            // A store's token reaches its consumers through
                            // their own operand wiring.
                            continue;
                        }
                        self.wire_constants_and_users(inst);
                    }

                    Instruction::Binary { .. } | Instruction::Cmp { .. } => {
                        self.wire_constants_and_users(inst);
                    }
                }
            }
        }
    }

    /// Phase 5: φ-nodes become Merge operators, or Carry operators at loop
    /// headers with a loop-carried incoming value.
    fn lower_phis(&mut self) {
        let func = self.func;
        let loops = self.loops;

        for block in &func.blocks {
            for inst in &block.instructions {
                let Instruction::Phi { result, incoming } = inst else {
                    continue;
                };
                let result = *result;
                let Some(node) = self.graph.find_node(ValueRef::Ir(result)) else {
                    continue;
                };

                let carry_loop = loops.innermost_containing(block.id).filter(|l| {
                    l.header == block.id && incoming.iter().any(|(_, pred)| l.contains(*pred))
                });

                match carry_loop {
                    Some(l) => self.lower_carry(node, incoming, l),
                    None => self.lower_merge(node, block.id, incoming),
                }

                for user in func.users(result) {
                    if let Some(dest) = self.graph.find_node(ValueRef::Ir(user)) {
                        self.graph.add_edge(node, dest);
                    }
                }
            }
        }
    }

    /// Merge case: route each incoming value through its predecessor's
    /// steer when the predecessor branches conditionally, and wire that
    /// branch's condition in as the decider.
    fn lower_merge(&mut self, node: NodeId, block: BlockId, incoming: &[(ValueId, BlockId)]) {
        let func = self.func;

        for (value, pred) in incoming {
            let mut routed = false;
            if let Some(Terminator::Branch {
                cond, then_block, ..
            }) = func.block(*pred).and_then(|b| b.terminator.as_ref())
            {
                if let Some((true_steer, false_steer)) = self.branch_steers.get(pred).copied() {
                    let steer = if *then_block == block {
                        true_steer
                    } else {
                        false_steer
                    };
                    let cond = *cond;
                    self.graph.wire_value_to_node(func, *value, steer);
                    self.graph.add_edge(steer, node);
                    self.graph.wire_value_to_node(func, cond, node);
                    routed = true;
                }
            }
            if !routed {
                self.graph.wire_value_to_node(func, *value, node);
            }
        }
    }

    /// Carry case: re-tag, wire the loop-exit decider and all incoming
    /// values, and drop a constant input that merely repeats the literal of
    /// the decider comparison.
    fn lower_carry(&mut self, node: NodeId, incoming: &[(ValueId, BlockId)], l: &Loop) {
        let func = self.func;

        if let Some(n) = self.graph.node_mut(node) {
            n.kind = OpKind::Carry;
            n.label = "C".to_string();
        }

        let decider = carry_decider(func, l);
        if let Some(cond) = decider {
            self.graph.wire_value_to_node(func, cond, node);
        }

        for (value, _) in incoming {
            self.graph.wire_value_to_node(func, *value, node);
        }

        // The initial value of an induction variable often restates the
        // literal the exit comparison already captures; such a constant
        // input is redundant. The guard is equality of literals, never node
        // identity.
        if let Some(cond) = decider {
            let mut comparison_literals: Vec<Constant> = Vec::new();
            if let Some(Instruction::Cmp { lhs, rhs, .. }) = func.def(cond) {
                for op in [*lhs, *rhs] {
                    if let Some(c) = func.as_const(op) {
                        comparison_literals.push(c);
                    }
                }
            }
            for (value, _) in incoming {
                if let Some(c) = func.as_const(*value) {
                    if comparison_literals.contains(&c) {
                        if let Some(dup) = self.graph.find_node(ValueRef::Ir(*value)) {
                            debug!(constant = %c, "removing carry input duplicated by decider");
                            self.graph.remove_node(dup);
                        }
                    }
                }
            }
        }
    }

    /// Phase 6: arguments fan out to each of their users through the
    /// pass-through resolver.
    fn wire_arguments(&mut self) {
        let func = self.func;

        for param in &func.params {
            for user in func.users(param.value) {
                if let Some(dest) = self.graph.get_or_add(func, user) {
                    self.graph.wire_value_to_node(func, param.value, dest);
                }
            }
        }
    }

    // ------------------------------------------------------------ helpers

    /// Tag (or create) the node of `value`. Refines `Unknown` kinds and
    /// replaces labels; a node's kind is refined at most once.
    fn tag(&mut self, value: ValueId, kind: OpKind, label: &str, symbol: Option<&str>) {
        let func = self.func;
        if let Some(id) = self.graph.get_or_add(func, value) {
            if let Some(node) = self.graph.node_mut(id) {
                node.kind = kind;
                if !label.is_empty() {
                    node.label = label.to_string();
                }
                node.symbol = symbol.map(|s| s.to_string());
            }
        }
    }

    /// Steer pair on `cond`; data inputs are wired when provided (selects).
    fn create_steers(
        &mut self,
        cond: ValueId,
        true_value: Option<ValueId>,
        false_value: Option<ValueId>,
    ) -> (NodeId, NodeId) {
        let func = self.func;

        // Make sure the condition has a concrete node to wire from.
        if let Some(cn) = self.graph.get_or_add(func, cond) {
            let unknown = self
                .graph
                .node(cn)
                .map(|n| n.kind == OpKind::Unknown)
                .unwrap_or(false);
            if unknown {
                if let Some(node) = self.graph.node_mut(cn) {
                    node.kind = OpKind::BasicBinaryOp;
                }
            }
        }

        let true_steer = self.graph.add_node(OpKind::TrueSteer, None, "T");
        let false_steer = self.graph.add_node(OpKind::FalseSteer, None, "F");

        self.graph.wire_value_to_node(func, cond, true_steer);
        self.graph.wire_value_to_node(func, cond, false_steer);

        if let Some(value) = true_value {
            self.graph.wire_value_to_node(func, value, true_steer);
        }
        if let Some(value) = false_value {
            self.graph.wire_value_to_node(func, value, false_steer);
        }

        (true_steer, false_steer)
    }

    /// Lazily created per-function activation token source.
    fn entry_stream(&mut self) -> NodeId {
        if let Some(node) = self.graph.find_node(ValueRef::EntryStream) {
            return node;
        }
        let node = self.graph.add_node(OpKind::Stream, None, "STR");
        self.graph.bind_value(ValueRef::EntryStream, node);
        node
    }

    /// First instruction of `block` that is not transparent plumbing
    /// (φ, cast, address arithmetic); falls back to a return terminator.
    fn first_meaningful(&self, block: BlockId) -> Option<ValueId> {
        let block = self.func.block(block)?;
        for inst in &block.instructions {
            match inst {
                Instruction::Phi { .. }
                | Instruction::Cast { .. }
                | Instruction::Offset { .. } => continue,
                _ => return Some(inst.result()),
            }
        }
        match &block.terminator {
            Some(term @ Terminator::Return { .. }) => Some(term.id()),
            _ => None,
        }
    }

    /// Constant-operand edges plus fan-out to instruction users, skipping
    /// φ users (deferred) and the already-wired comparison→steer pairs.
    fn wire_constants_and_users(&mut self, inst: &Instruction) {
        let func = self.func;
        let result = inst.result();
        let Some(node) = self.graph.find_node(ValueRef::Ir(result)) else {
            return;
        };

        for op in inst.operands() {
            if func.as_const(op).is_some() {
                if let Some(cn) = self.graph.get_or_add(func, op) {
                    self.graph.add_edge(cn, node);
                }
            }
        }

        let self_is_cmp = matches!(inst, Instruction::Cmp { .. });
        for user in func.users(result) {
            if matches!(func.def(user), Some(Instruction::Phi { .. })) {
                continue;
            }
            let Some(dest) = self.graph.find_node(ValueRef::Ir(user)) else {
                continue;
            };
            let dest_is_steer = self
                .graph
                .node(dest)
                .map(|n| n.kind.is_steer())
                .unwrap_or(false);
            if self_is_cmp && dest_is_steer {
                continue;
            }
            self.graph.add_edge(node, dest);
        }
    }
}

/// The decider governing a loop's Carry operators: the preheader's
/// conditional branch when it has one, else the conditional branch of an
/// exiting block.
fn carry_decider(func: &Function, l: &Loop) -> Option<ValueId> {
    if let Some(preheader) = l.preheader {
        if let Some(Terminator::Branch { cond, .. }) =
            func.block(preheader).and_then(|b| b.terminator.as_ref())
        {
            return Some(*cond);
        }
    }
    for exiting in &l.exiting {
        if let Some(Terminator::Branch { cond, .. }) =
            func.block(*exiting).and_then(|b| b.terminator.as_ref())
        {
            return Some(*cond);
        }
    }
    None
}
