//! CFG simplification: fold unconditional fall-throughs.
//!
//! A block ending in `jmp bbT` absorbs `bbT` when `bbT` has no other
//! predecessor, is not the entry block, and is not the block itself. φ-nodes
//! in the absorbed block necessarily have a single arm and are replaced by
//! that arm's value; φ-nodes elsewhere that named the absorbed block as a
//! predecessor are retargeted. Repeats until no merge applies.

use tracing::debug;

use crate::analysis::predecessors;
use crate::types::{BlockId, Function, Instruction, Module, Terminator};

/// Simplify every function of the module. Returns true if anything changed.
pub fn simplify_cfg(module: &mut Module) -> bool {
    let mut changed = false;
    for func in &mut module.functions {
        if func.is_declaration {
            continue;
        }
        changed |= simplify_function(func);
    }
    changed
}

fn simplify_function(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let Some((pred_id, target_id)) = find_merge_pair(func) else {
            break;
        };
        debug!(function = %func.name, pred = %pred_id, target = %target_id, "folding block");
        merge_blocks(func, pred_id, target_id);
        changed = true;
    }
    changed
}

/// Find a `pred -> target` pair where `pred` ends in an unconditional jump
/// and `target` has no other way in.
fn find_merge_pair(func: &Function) -> Option<(BlockId, BlockId)> {
    let entry = func.entry()?;
    let preds = predecessors(func);

    for block in &func.blocks {
        let Some(Terminator::Jump { target, .. }) = &block.terminator else {
            continue;
        };
        let target = *target;
        if target == block.id || target == entry {
            continue;
        }
        if preds.get(&target).map(|p| p.as_slice()) == Some(&[block.id]) {
            return Some((block.id, target));
        }
    }
    None
}

fn merge_blocks(func: &mut Function, pred_id: BlockId, target_id: BlockId) {
    let target_idx = func
        .blocks
        .iter()
        .position(|b| b.id == target_id)
        .expect("merge target exists");
    let target = func.blocks.remove(target_idx);

    // A single-predecessor φ is just a copy of its one arm.
    let mut kept = Vec::new();
    let mut copies = Vec::new();
    for inst in target.instructions {
        match inst {
            Instruction::Phi { result, incoming } => {
                let arm = incoming
                    .iter()
                    .find(|(_, b)| *b == pred_id)
                    .or_else(|| incoming.first())
                    .map(|(v, _)| *v);
                if let Some(value) = arm {
                    copies.push((result, value));
                }
            }
            other => kept.push(other),
        }
    }
    let pred = func
        .blocks
        .iter_mut()
        .find(|b| b.id == pred_id)
        .expect("merge predecessor exists");
    pred.instructions.extend(kept);
    pred.terminator = target.terminator;

    // Only after the spliced instructions are in place: they may use the
    // folded φs themselves.
    for (old, new) in copies {
        func.replace_all_uses(old, new);
    }

    // φ-nodes downstream now see `pred` where they saw `target`.
    for block in &mut func.blocks {
        for inst in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = inst {
                for (_, b) in incoming.iter_mut() {
                    if *b == target_id {
                        *b = pred_id;
                    }
                }
            }
        }
    }
}
