//! Textual IR printer.
//!
//! Produces the `.uir` assembly format, e.g.:
//!
//! ```text
//! fn @scale(%a: i32, %x: ptr i32) -> void {
//! bb0:
//!   %3 = load i32, %x
//!   %4 = mul i32 %3, %a
//!   store i32 %4, %x
//!   ret
//! }
//! ```
//!
//! The output round-trips through [`crate::parse::parse_module`] and is
//! deterministic for a given module.

use std::fmt::Write;

use crate::types::{Block, Function, Instruction, Module, Terminator, ValueId, ValueKind};

/// Print an entire module.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();

    for decl in &module.declarations {
        let params: Vec<String> = decl.params.iter().map(|t| t.to_string()).collect();
        let _ = writeln!(
            out,
            "declare @{}({}) -> {}",
            decl.name,
            params.join(", "),
            decl.return_type
        );
    }
    if !module.declarations.is_empty() {
        out.push('\n');
    }

    for func in &module.functions {
        out.push_str(&print_function(func));
        out.push('\n');
    }

    out
}

/// Print a single function.
pub fn print_function(func: &Function) -> String {
    let mut out = String::new();

    let params: Vec<String> = func
        .params
        .iter()
        .map(|p| format!("%{}: {}", p.name, p.ty))
        .collect();
    let _ = writeln!(
        out,
        "fn @{}({}) -> {} {{",
        func.name,
        params.join(", "),
        func.return_type
    );

    for block in &func.blocks {
        out.push_str(&print_block(func, block));
    }

    out.push_str("}\n");
    out
}

fn print_block(func: &Function, block: &Block) -> String {
    let mut out = format!("{}:\n", block.id);
    for inst in &block.instructions {
        let _ = writeln!(out, "  {}", fmt_instruction(func, inst));
    }
    if let Some(term) = &block.terminator {
        let _ = writeln!(out, "  {}", fmt_terminator(func, term));
    }
    out
}

/// One-line rendering of a value definition, used by graph printers as a
/// compact origin dump.
pub fn value_summary(func: &Function, id: ValueId) -> String {
    match &func.value(id).kind {
        ValueKind::Param { .. } => format!("{}: {}", fmt_value(func, id), func.type_of(id)),
        ValueKind::Const(c) => c.to_string(),
        ValueKind::Inst => match func.def(id) {
            Some(inst) => fmt_instruction(func, inst),
            None => fmt_value(func, id),
        },
        ValueKind::Term => match func.def_terminator(id) {
            Some(term) => fmt_terminator(func, term),
            None => fmt_value(func, id),
        },
    }
}

/// Render an operand: constants inline as literals, everything else as a
/// `%`-reference.
pub fn fmt_value(func: &Function, id: ValueId) -> String {
    match &func.value(id).kind {
        ValueKind::Const(c) => c.to_string(),
        _ => match &func.value(id).name {
            Some(name) => format!("%{}", name),
            None => id.to_string(),
        },
    }
}

pub fn fmt_instruction(func: &Function, inst: &Instruction) -> String {
    match inst {
        Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        } => format!(
            "{} = {} {} {}, {}",
            fmt_value(func, *result),
            op.name(),
            func.type_of(*result),
            fmt_value(func, *lhs),
            fmt_value(func, *rhs)
        ),
        Instruction::Cmp {
            result,
            pred,
            lhs,
            rhs,
        } => format!(
            "{} = cmp {} {} {}, {}",
            fmt_value(func, *result),
            pred.name(),
            func.type_of(*lhs),
            fmt_value(func, *lhs),
            fmt_value(func, *rhs)
        ),
        Instruction::Load { result, ptr } => format!(
            "{} = load {}, {}",
            fmt_value(func, *result),
            func.type_of(*result),
            fmt_value(func, *ptr)
        ),
        Instruction::Store { ptr, value, .. } => format!(
            "store {} {}, {}",
            func.type_of(*value),
            fmt_value(func, *value),
            fmt_value(func, *ptr)
        ),
        Instruction::Offset {
            result,
            base,
            indices,
        } => {
            let idx: Vec<String> = indices.iter().map(|v| fmt_value(func, *v)).collect();
            format!(
                "{} = offset {}, {}, {}",
                fmt_value(func, *result),
                func.type_of(*result),
                fmt_value(func, *base),
                idx.join(", ")
            )
        }
        Instruction::Cast {
            result, op, value, ..
        } => format!(
            "{} = cast {} {} to {}",
            fmt_value(func, *result),
            op.name(),
            fmt_value(func, *value),
            func.type_of(*result)
        ),
        Instruction::Phi { result, incoming } => {
            let arms: Vec<String> = incoming
                .iter()
                .map(|(v, b)| format!("[ {}, {} ]", fmt_value(func, *v), b))
                .collect();
            format!(
                "{} = phi {} {}",
                fmt_value(func, *result),
                func.type_of(*result),
                arms.join(", ")
            )
        }
        Instruction::Select {
            result,
            cond,
            on_true,
            on_false,
        } => format!(
            "{} = select {}, {} {}, {}",
            fmt_value(func, *result),
            fmt_value(func, *cond),
            func.type_of(*result),
            fmt_value(func, *on_true),
            fmt_value(func, *on_false)
        ),
        Instruction::Call {
            result,
            callee,
            args,
        } => {
            let args: Vec<String> = args.iter().map(|v| fmt_value(func, *v)).collect();
            let ty = func.type_of(*result);
            if ty.is_void() {
                format!("call void @{}({})", callee, args.join(", "))
            } else {
                format!(
                    "{} = call {} @{}({})",
                    fmt_value(func, *result),
                    ty,
                    callee,
                    args.join(", ")
                )
            }
        }
    }
}

pub fn fmt_terminator(func: &Function, term: &Terminator) -> String {
    match term {
        Terminator::Jump { target, .. } => format!("jmp {}", target),
        Terminator::Branch {
            cond,
            then_block,
            else_block,
            ..
        } => format!(
            "br {}, {}, {}",
            fmt_value(func, *cond),
            then_block,
            else_block
        ),
        Terminator::Return { value: None, .. } => "ret".to_string(),
        Terminator::Return {
            value: Some(v), ..
        } => format!("ret {}", fmt_value(func, *v)),
    }
}
