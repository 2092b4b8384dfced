//! Dead-block elimination.
//!
//! Drops blocks unreachable from the entry block and prunes φ arms that
//! named a removed (or no longer predecessor) block.

use tracing::debug;

use crate::analysis::{predecessors, reachable_blocks};
use crate::types::{Function, Instruction, Module};

/// Remove unreachable blocks in every function. Returns true on change.
pub fn eliminate_dead_blocks(module: &mut Module) -> bool {
    let mut changed = false;
    for func in &mut module.functions {
        if func.is_declaration {
            continue;
        }
        changed |= eliminate_in_function(func);
    }
    changed
}

fn eliminate_in_function(func: &mut Function) -> bool {
    let reachable = reachable_blocks(func);
    let before = func.blocks.len();
    func.blocks.retain(|b| reachable.contains(&b.id));
    let removed = before - func.blocks.len();
    if removed == 0 {
        return false;
    }

    let preds = predecessors(func);
    for block in &mut func.blocks {
        let block_preds = preds.get(&block.id).cloned().unwrap_or_default();
        for inst in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = inst {
                incoming.retain(|(_, pred)| block_preds.contains(pred));
            }
        }
    }

    debug!(function = %func.name, removed, "dead blocks removed");
    true
}
