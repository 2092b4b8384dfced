//! IR validation.
//!
//! Checks the structural invariants the rest of the pipeline relies on:
//! every block terminated, φ-nodes at block heads with arms matching the
//! predecessors exactly, every operand defined exactly once, no void value
//! used as an operand, branch targets present.
//!
//! The pipeline aborts on any error; transforms assume validated input.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::analysis::predecessors;
use crate::types::{BlockId, Function, Instruction, Module, Type, ValueId, ValueKind};

/// A single validation failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidateError {
    #[error("function '{function}' has no blocks")]
    EmptyBody { function: String },

    #[error("function '{function}': block {block} has no terminator")]
    MissingTerminator { function: String, block: BlockId },

    #[error("function '{function}': block {block} jumps to unknown block {target}")]
    UnknownTarget {
        function: String,
        block: BlockId,
        target: BlockId,
    },

    #[error("function '{function}': value {value} used but never defined")]
    UndefinedValue { function: String, value: ValueId },

    #[error("function '{function}': value {value} defined more than once")]
    DuplicateDefinition { function: String, value: ValueId },

    #[error("function '{function}': void value {value} used as an operand")]
    VoidOperand { function: String, value: ValueId },

    #[error("function '{function}': block {block} has a phi after a non-phi instruction")]
    PhiNotAtHead { function: String, block: BlockId },

    #[error(
        "function '{function}': phi {value} in block {block} does not cover predecessor {pred}"
    )]
    PhiMissingPred {
        function: String,
        value: ValueId,
        block: BlockId,
        pred: BlockId,
    },

    #[error("function '{function}': phi {value} in block {block} names {pred}, not a predecessor")]
    PhiExtraPred {
        function: String,
        value: ValueId,
        block: BlockId,
        pred: BlockId,
    },

    #[error("function '{function}': {value} loads through non-pointer type {ty}")]
    LoadFromNonPointer {
        function: String,
        value: ValueId,
        ty: Type,
    },

    #[error("function '{function}': store {value} through non-pointer type {ty}")]
    StoreToNonPointer {
        function: String,
        value: ValueId,
        ty: Type,
    },

    #[error("duplicate function name '{name}'")]
    DuplicateFunction { name: String },
}

/// Validate a whole module. Returns all errors found.
pub fn validate_module(module: &Module) -> Result<(), Vec<ValidateError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for func in &module.functions {
        if !names.insert(func.name.as_str()) {
            errors.push(ValidateError::DuplicateFunction {
                name: func.name.clone(),
            });
        }
    }

    for func in &module.functions {
        if func.is_declaration {
            continue;
        }
        validate_function(func, &mut errors);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate a single function definition.
pub fn validate_function(func: &Function, errors: &mut Vec<ValidateError>) {
    let name = func.name.clone();

    if func.blocks.is_empty() {
        errors.push(ValidateError::EmptyBody { function: name });
        return;
    }

    let block_ids: HashSet<BlockId> = func.blocks.iter().map(|b| b.id).collect();
    let preds = predecessors(func);

    // Collect definitions; params and constants are definitions too.
    let mut defined: HashMap<ValueId, usize> = HashMap::new();
    for id in 0..func.value_count() {
        let id = ValueId(id as u32);
        match func.value(id).kind {
            ValueKind::Param { .. } | ValueKind::Const(_) => {
                *defined.entry(id).or_insert(0) += 1;
            }
            ValueKind::Inst | ValueKind::Term => {}
        }
    }
    for block in &func.blocks {
        for inst in &block.instructions {
            *defined.entry(inst.result()).or_insert(0) += 1;
        }
        if let Some(term) = &block.terminator {
            *defined.entry(term.id()).or_insert(0) += 1;
        }
    }
    for (value, count) in &defined {
        if *count > 1 {
            errors.push(ValidateError::DuplicateDefinition {
                function: name.clone(),
                value: *value,
            });
        }
    }

    let mut check_operand = |value: ValueId, errors: &mut Vec<ValidateError>| {
        if !defined.contains_key(&value) {
            errors.push(ValidateError::UndefinedValue {
                function: name.clone(),
                value,
            });
        } else if func.type_of(value).is_void() {
            errors.push(ValidateError::VoidOperand {
                function: name.clone(),
                value,
            });
        }
    };

    for block in &func.blocks {
        // φ-nodes must form a prefix of the block.
        let mut seen_non_phi = false;
        for inst in &block.instructions {
            match inst {
                Instruction::Phi { result, incoming } => {
                    if seen_non_phi {
                        errors.push(ValidateError::PhiNotAtHead {
                            function: name.clone(),
                            block: block.id,
                        });
                    }
                    let pred_list = preds.get(&block.id).cloned().unwrap_or_default();
                    for pred in &pred_list {
                        if !incoming.iter().any(|(_, b)| b == pred) {
                            errors.push(ValidateError::PhiMissingPred {
                                function: name.clone(),
                                value: *result,
                                block: block.id,
                                pred: *pred,
                            });
                        }
                    }
                    for (_, pred) in incoming {
                        if !pred_list.contains(pred) {
                            errors.push(ValidateError::PhiExtraPred {
                                function: name.clone(),
                                value: *result,
                                block: block.id,
                                pred: *pred,
                            });
                        }
                    }
                }
                _ => seen_non_phi = true,
            }

            for op in inst.operands() {
                check_operand(op, errors);
            }

            match inst {
                Instruction::Load { result, ptr } => {
                    let ty = func.type_of(*ptr);
                    if !ty.is_pointer() {
                        errors.push(ValidateError::LoadFromNonPointer {
                            function: name.clone(),
                            value: *result,
                            ty: ty.clone(),
                        });
                    }
                }
                Instruction::Store { result, ptr, .. } => {
                    let ty = func.type_of(*ptr);
                    if !ty.is_pointer() {
                        errors.push(ValidateError::StoreToNonPointer {
                            function: name.clone(),
                            value: *result,
                            ty: ty.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        match &block.terminator {
            None => errors.push(ValidateError::MissingTerminator {
                function: name.clone(),
                block: block.id,
            }),
            Some(term) => {
                for op in term.operands() {
                    check_operand(op, errors);
                }
                for target in term.successors() {
                    if !block_ids.contains(&target) {
                        errors.push(ValidateError::UnknownTarget {
                            function: name.clone(),
                            block: block.id,
                            target,
                        });
                    }
                }
            }
        }
    }
}
