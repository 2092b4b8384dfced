//! Basic CFG queries.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::types::{BlockId, Function};

/// Successors of a block, in terminator order.
pub fn successors(func: &Function, block: BlockId) -> Vec<BlockId> {
    func.block(block)
        .and_then(|b| b.terminator.as_ref())
        .map(|t| t.successors())
        .unwrap_or_default()
}

/// Predecessor map for every block, in block order.
pub fn predecessors(func: &Function) -> IndexMap<BlockId, Vec<BlockId>> {
    let mut preds: IndexMap<BlockId, Vec<BlockId>> = IndexMap::new();
    for block in &func.blocks {
        preds.entry(block.id).or_default();
    }
    for block in &func.blocks {
        if let Some(term) = &block.terminator {
            for succ in term.successors() {
                let list = preds.entry(succ).or_default();
                if !list.contains(&block.id) {
                    list.push(block.id);
                }
            }
        }
    }
    preds
}

/// Blocks reachable from the entry block.
pub fn reachable_blocks(func: &Function) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    let Some(entry) = func.entry() else {
        return reachable;
    };
    let mut worklist = vec![entry];
    while let Some(block) = worklist.pop() {
        if !reachable.insert(block) {
            continue;
        }
        for succ in successors(func, block) {
            if !reachable.contains(&succ) {
                worklist.push(succ);
            }
        }
    }
    reachable
}

/// Reverse post-order over the reachable CFG, entry first.
pub fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let mut postorder = Vec::new();
    let mut visited = HashSet::new();
    let Some(entry) = func.entry() else {
        return postorder;
    };

    // Iterative DFS; the second stack element tracks whether children were
    // already pushed.
    let mut stack = vec![(entry, false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        let succs = successors(func, block);
        for succ in succs.into_iter().rev() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }

    postorder.reverse();
    postorder
}
