//! Dominator computation.
//!
//! Standard iterative algorithm over reverse post-order (Cooper, Harvey,
//! Kennedy). Small CFGs dominate here, so the simple fixpoint beats the
//! bookkeeping of Lengauer-Tarjan.

use std::collections::HashMap;

use crate::analysis::{predecessors, reverse_postorder};
use crate::types::{BlockId, Function};

/// Dominator tree, queried through immediate-dominator links.
#[derive(Debug, Clone)]
pub struct Dominators {
    idom: HashMap<BlockId, BlockId>,
    rpo_index: HashMap<BlockId, usize>,
    entry: Option<BlockId>,
}

impl Dominators {
    /// Immediate dominator of `block`. The entry block is its own idom.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    /// Does `a` dominate `b`? Every block dominates itself. Unreachable
    /// blocks are dominated by nothing but themselves.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let entry = match self.entry {
            Some(e) => e,
            None => return false,
        };
        let mut current = b;
        while current != entry {
            match self.idom.get(&current) {
                Some(&parent) => {
                    if parent == a {
                        return true;
                    }
                    current = parent;
                }
                None => return false,
            }
        }
        a == entry
    }
}

/// Compute dominators for the reachable CFG of `func`.
pub fn compute_dominators(func: &Function) -> Dominators {
    let rpo = reverse_postorder(func);
    let preds = predecessors(func);

    let mut rpo_index = HashMap::new();
    for (i, block) in rpo.iter().enumerate() {
        rpo_index.insert(*block, i);
    }

    let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
    let entry = match rpo.first() {
        Some(e) => *e,
        None => {
            return Dominators {
                idom,
                rpo_index,
                entry: None,
            };
        }
    };
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for block in rpo.iter().skip(1) {
            let block_preds = match preds.get(block) {
                Some(p) => p,
                None => continue,
            };
            // First processed predecessor seeds the intersection.
            let mut new_idom: Option<BlockId> = None;
            for pred in block_preds {
                if !idom.contains_key(pred) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => *pred,
                    Some(current) => intersect(&idom, &rpo_index, *pred, current),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom.get(block) != Some(&new_idom) {
                    idom.insert(*block, new_idom);
                    changed = true;
                }
            }
        }
    }

    Dominators {
        idom,
        rpo_index,
        entry: Some(entry),
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}
