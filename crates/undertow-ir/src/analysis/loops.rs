//! Natural loop discovery.
//!
//! A back edge is an edge `latch -> header` where the header dominates the
//! latch. The loop body is the header plus every block that reaches a latch
//! without passing through the header. Loops sharing a header are merged
//! (single-header natural loops, per the input contract).

use std::collections::HashSet;

use crate::analysis::{compute_dominators, predecessors, successors};
use crate::types::{BlockId, Function};

/// One natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// Blocks inside the loop whose terminator jumps back to the header.
    pub latches: Vec<BlockId>,
    /// All blocks of the loop, header first.
    pub blocks: Vec<BlockId>,
    /// Unique outside predecessor of the header whose only successor is the
    /// header, when such a block exists.
    pub preheader: Option<BlockId>,
    /// Blocks inside the loop with a successor outside it.
    pub exiting: Vec<BlockId>,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// All natural loops of a function.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
}

impl LoopInfo {
    /// The smallest loop containing `block`, if any.
    pub fn innermost_containing(&self, block: BlockId) -> Option<&Loop> {
        self.loops
            .iter()
            .filter(|l| l.contains(block))
            .min_by_key(|l| l.blocks.len())
    }

    pub fn is_header(&self, block: BlockId) -> bool {
        self.loops.iter().any(|l| l.header == block)
    }
}

/// Discover the natural loops of `func`.
pub fn find_loops(func: &Function) -> LoopInfo {
    let doms = compute_dominators(func);
    let preds = predecessors(func);

    // Back edges in block order for determinism; loops sharing a header
    // are merged by grouping the latches.
    let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new();
    for block in &func.blocks {
        for succ in successors(func, block.id) {
            if doms.dominates(succ, block.id) {
                back_edges.push((block.id, succ));
            }
        }
    }
    let mut headers: Vec<BlockId> = Vec::new();
    for (_, header) in &back_edges {
        if !headers.contains(header) {
            headers.push(*header);
        }
    }

    let mut loops = Vec::new();
    for header in headers {
        let latches: Vec<BlockId> = back_edges
            .iter()
            .filter(|(_, h)| *h == header)
            .map(|(latch, _)| *latch)
            .collect();

        // Collect the body: walk predecessors backwards from the latches,
        // stopping at the header.
        let mut body: HashSet<BlockId> = HashSet::new();
        body.insert(header);
        let mut worklist: Vec<BlockId> = latches.clone();
        while let Some(block) = worklist.pop() {
            if !body.insert(block) {
                continue;
            }
            if let Some(block_preds) = preds.get(&block) {
                for pred in block_preds {
                    if !body.contains(pred) {
                        worklist.push(*pred);
                    }
                }
            }
        }

        // Deterministic block list: function order, header first.
        let mut blocks = vec![header];
        for block in &func.blocks {
            if block.id != header && body.contains(&block.id) {
                blocks.push(block.id);
            }
        }

        let outside_preds: Vec<BlockId> = preds
            .get(&header)
            .map(|p| {
                p.iter()
                    .filter(|pred| !body.contains(*pred))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        let preheader = match outside_preds.as_slice() {
            [single] if successors(func, *single) == vec![header] => Some(*single),
            _ => None,
        };

        let exiting: Vec<BlockId> = blocks
            .iter()
            .filter(|b| {
                successors(func, **b)
                    .iter()
                    .any(|succ| !body.contains(succ))
            })
            .copied()
            .collect();

        loops.push(Loop {
            header,
            latches,
            blocks,
            preheader,
            exiting,
        });
    }

    LoopInfo { loops }
}
