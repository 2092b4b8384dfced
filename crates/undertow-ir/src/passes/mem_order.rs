//! Memory-ordering transform.
//!
//! The dataflow graph has no global store, so memory ordering must be
//! explicit edges. This pass rewrites every load and store into a typed
//! intrinsic call that consumes and/or produces a one-bit token:
//!
//! - `lso.load.<ty>(ptr, tok) -> <ty>`: fires once `tok` is available;
//!   consumes without producing.
//! - `lso.store.<ty>(ptr, val) -> tok`: produces the next token.
//!
//! Inside a block the token threads linearly; at block heads the tokens of
//! all predecessors meet in a one-bit φ. The entry block starts from a
//! constant-true token.
//!
//! The rewrite keeps each instruction's result value, so no use rewriting is
//! needed; a store's identity changes type from `void` to `i1` and becomes
//! the produced token. Functions with no loads or stores are left untouched,
//! which also makes the pass a no-op on already-transformed IR.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::analysis::{predecessors, reachable_blocks};
use crate::types::{BlockId, Constant, Declaration, Function, Instruction, Module, Type, ValueId};

/// Name prefix of the token-consuming load family.
pub const LOAD_PREFIX: &str = "lso.load.";
/// Name prefix of the token-producing store family.
pub const STORE_PREFIX: &str = "lso.store.";
/// Reserved name for an explicit entry-token source. The transform mints the
/// entry token as a constant instead, so this is never emitted today.
pub const ENTRY_TOKEN_NAME: &str = "lso.entry.token";

/// Intrinsic name for loads of `ty`. Deterministic per type.
pub fn load_intrinsic_name(ty: &Type) -> String {
    format!("{}{}", LOAD_PREFIX, type_key(ty))
}

/// Intrinsic name for stores of `ty`. Deterministic per type.
pub fn store_intrinsic_name(ty: &Type) -> String {
    format!("{}{}", STORE_PREFIX, type_key(ty))
}

fn type_key(ty: &Type) -> String {
    ty.to_string().replace(' ', ".")
}

/// Fatal inconsistencies while threading tokens.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MemOrderError {
    #[error("function '{function}': reachable block {block} has predecessors but no token phi")]
    MissingTokenPhi { function: String, block: BlockId },

    #[error("function '{function}': predecessor {pred} of {block} has no recorded out-token")]
    MissingOutToken {
        function: String,
        pred: BlockId,
        block: BlockId,
    },
}

/// Run the transform over every function definition of the module.
/// Returns true if any function changed.
pub fn enforce_mem_order(module: &mut Module) -> Result<bool, MemOrderError> {
    // Per-module, append-only intrinsic cache, seeded with what is already
    // declared so repeated runs do not duplicate declarations.
    let mut declared: IndexMap<String, Declaration> = module
        .declarations
        .iter()
        .map(|d| (d.name.clone(), d.clone()))
        .collect();

    let mut changed = false;
    for func in &mut module.functions {
        if func.is_declaration {
            continue;
        }
        changed |= transform_function(func, &mut declared)?;
    }

    module.declarations = declared.into_values().collect();
    Ok(changed)
}

fn transform_function(
    func: &mut Function,
    declared: &mut IndexMap<String, Declaration>,
) -> Result<bool, MemOrderError> {
    let has_memory_ops = func.blocks.iter().any(|b| {
        b.instructions
            .iter()
            .any(|i| matches!(i, Instruction::Load { .. } | Instruction::Store { .. }))
    });
    if !has_memory_ops {
        return Ok(false);
    }

    let Some(entry) = func.entry() else {
        return Ok(false);
    };
    let reachable = reachable_blocks(func);
    let preds = predecessors(func);

    // Token φs first, one per reachable non-entry block with predecessors;
    // their arms are filled after every block has an out-token.
    let mut token_phis: IndexMap<BlockId, ValueId> = IndexMap::new();
    for bi in 0..func.blocks.len() {
        let block_id = func.blocks[bi].id;
        if block_id == entry || !reachable.contains(&block_id) {
            continue;
        }
        if preds.get(&block_id).map_or(true, |p| p.is_empty()) {
            continue;
        }
        let phi_value = func.new_inst_value(Type::I1);
        func.blocks[bi].instructions.insert(
            0,
            Instruction::Phi {
                result: phi_value,
                incoming: Vec::new(),
            },
        );
        token_phis.insert(block_id, phi_value);
    }

    // Walk each block, threading the current token through its memory ops.
    let mut out_tokens: IndexMap<BlockId, ValueId> = IndexMap::new();
    for bi in 0..func.blocks.len() {
        let block_id = func.blocks[bi].id;
        if !reachable.contains(&block_id) {
            continue;
        }

        let mut current = if block_id == entry {
            func.intern_const(Constant::Bool(true), Type::I1)
        } else {
            match token_phis.get(&block_id) {
                Some(phi) => *phi,
                None => {
                    return Err(MemOrderError::MissingTokenPhi {
                        function: func.name.clone(),
                        block: block_id,
                    });
                }
            }
        };

        for ii in 0..func.blocks[bi].instructions.len() {
            match func.blocks[bi].instructions[ii].clone() {
                Instruction::Load { result, ptr } => {
                    let value_ty = func.type_of(result).clone();
                    let callee = load_intrinsic_name(&value_ty);
                    declare(
                        declared,
                        &callee,
                        vec![func.type_of(ptr).clone(), Type::I1],
                        value_ty,
                    );
                    func.blocks[bi].instructions[ii] = Instruction::Call {
                        result,
                        callee,
                        args: vec![ptr, current],
                    };
                    // Loads consume the token without producing a new one.
                }
                Instruction::Store { result, ptr, value } => {
                    let value_ty = func.type_of(value).clone();
                    let callee = store_intrinsic_name(&value_ty);
                    declare(
                        declared,
                        &callee,
                        vec![func.type_of(ptr).clone(), value_ty],
                        Type::I1,
                    );
                    func.blocks[bi].instructions[ii] = Instruction::Call {
                        result,
                        callee,
                        args: vec![ptr, value],
                    };
                    // The store's identity becomes the produced token.
                    func.value_mut(result).ty = Type::I1;
                    current = result;
                }
                _ => {}
            }
        }

        out_tokens.insert(block_id, current);
    }

    // Fill the token φs from predecessor out-tokens.
    for (block_id, phi_value) in &token_phis {
        let mut incoming = Vec::new();
        for pred in preds.get(block_id).into_iter().flatten() {
            let token = out_tokens
                .get(pred)
                .ok_or_else(|| MemOrderError::MissingOutToken {
                    function: func.name.clone(),
                    pred: *pred,
                    block: *block_id,
                })?;
            incoming.push((*token, *pred));
        }
        let block = func
            .blocks
            .iter_mut()
            .find(|b| b.id == *block_id)
            .expect("token phi block exists");
        let arms = block.instructions.iter_mut().find_map(|inst| match inst {
            Instruction::Phi {
                result,
                incoming: arms,
            } if result == phi_value => Some(arms),
            _ => None,
        });
        if let Some(arms) = arms {
            *arms = incoming;
        }
    }

    debug!(function = %func.name, phis = token_phis.len(), "memory order enforced");
    Ok(true)
}

fn declare(
    declared: &mut IndexMap<String, Declaration>,
    name: &str,
    params: Vec<Type>,
    return_type: Type,
) {
    if declared.contains_key(name) {
        return;
    }
    declared.insert(
        name.to_string(),
        Declaration {
            name: name.to_string(),
            params,
            return_type,
        },
    );
}
