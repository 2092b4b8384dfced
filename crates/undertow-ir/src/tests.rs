//! Crate tests: textual format, validator, analyses, passes.

use crate::analysis::{compute_dominators, find_loops};
use crate::parse::parse_module;
use crate::passes::{eliminate_dead_blocks, enforce_mem_order, simplify_cfg};
use crate::print::{print_function, print_module};
use crate::types::*;
use crate::validate::{ValidateError, validate_module};

// ---------------------------------------------------------------- helpers

fn push(func: &mut Function, block: BlockId, inst: Instruction) {
    func.block_mut(block).unwrap().push(inst);
}

fn terminate(func: &mut Function, block: BlockId, term: Terminator) {
    func.block_mut(block).unwrap().terminate(term);
}

fn ret(func: &mut Function, block: BlockId, value: Option<ValueId>) {
    let id = func.new_term_value();
    terminate(func, block, Terminator::Return { id, value });
}

fn jump(func: &mut Function, block: BlockId, target: BlockId) {
    let id = func.new_term_value();
    terminate(func, block, Terminator::Jump { id, target });
}

fn branch(func: &mut Function, block: BlockId, cond: ValueId, t: BlockId, e: BlockId) {
    let id = func.new_term_value();
    terminate(
        func,
        block,
        Terminator::Branch {
            id,
            cond,
            then_block: t,
            else_block: e,
        },
    );
}

fn module_of(func: Function) -> Module {
    let mut module = Module::new();
    module.functions.push(func);
    module
}

// ------------------------------------------------------------------ parse

const SCALE: &str = r"
fn @scale(%a: i32, %x: ptr i32) -> void {
bb0:
  %v = load i32, %x
  %w = mul i32 %v, %a
  store i32 %w, %x
  ret
}
";

#[test]
fn parse_simple_function() {
    let module = parse_module(SCALE).unwrap();
    assert_eq!(module.functions.len(), 1);

    let func = &module.functions[0];
    assert_eq!(func.name, "scale");
    assert_eq!(func.params.len(), 2);
    assert_eq!(func.params[1].ty, Type::Ptr(Box::new(Type::I32)));
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(func.blocks[0].instructions.len(), 3);
    assert!(matches!(
        func.blocks[0].terminator,
        Some(Terminator::Return { value: None, .. })
    ));
}

#[test]
fn parse_loop_with_forward_reference() {
    let src = r"
fn @count(%n: i32) -> i32 {
bb0:
  jmp bb1
bb1:
  %i = phi i32 [ 0, bb0 ], [ %i2, bb1 ]
  %i2 = add i32 %i, 1
  %c = cmp lt i32 %i2, %n
  br %c, bb1, bb2
bb2:
  ret %i2
}
";
    let module = parse_module(src).unwrap();
    assert!(validate_module(&module).is_ok());

    let func = &module.functions[0];
    let phi = &func.block(BlockId(1)).unwrap().instructions[0];
    match phi {
        Instruction::Phi { incoming, .. } => {
            assert_eq!(incoming.len(), 2);
            assert_eq!(incoming[0].1, BlockId(0));
            assert_eq!(incoming[1].1, BlockId(1));
            // The first arm is the interned constant 0.
            assert_eq!(func.as_const(incoming[0].0), Some(Constant::Int(0)));
        }
        other => panic!("expected phi, got {:?}", other),
    }
}

#[test]
fn parse_rejects_undefined_value() {
    let src = r"
fn @bad(%a: i32) -> i32 {
bb0:
  ret %nope
}
";
    let err = parse_module(src).unwrap_err();
    assert!(err.message.contains("undefined value"), "{}", err);
}

#[test]
fn print_parse_round_trip_is_stable() {
    let module = parse_module(SCALE).unwrap();
    let printed = print_module(&module);
    let reparsed = parse_module(&printed).unwrap();
    assert_eq!(printed, print_module(&reparsed));
}

// --------------------------------------------------------------- validate

#[test]
fn validate_accepts_simple_function() {
    let module = parse_module(SCALE).unwrap();
    assert!(validate_module(&module).is_ok());
}

#[test]
fn validate_rejects_missing_terminator() {
    let mut func = Function::new("f", vec![], Type::Void);
    func.alloc_block();
    let errors = validate_module(&module_of(func)).unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ValidateError::MissingTerminator { .. }))
    );
}

#[test]
fn validate_rejects_void_operand() {
    let mut func = Function::new(
        "f",
        vec![("p".into(), Type::Ptr(Box::new(Type::I32)))],
        Type::Void,
    );
    let p = func.params[0].value;
    let bb0 = func.alloc_block();
    let store_id = func.new_inst_value(Type::Void);
    let one = func.intern_const(Constant::Int(1), Type::I32);
    push(
        &mut func,
        bb0,
        Instruction::Store {
            result: store_id,
            ptr: p,
            value: one,
        },
    );
    // Using the store's void identity as an operand is malformed.
    let sum = func.new_inst_value(Type::I32);
    push(
        &mut func,
        bb0,
        Instruction::Binary {
            result: sum,
            op: BinaryOp::Add,
            lhs: store_id,
            rhs: one,
        },
    );
    ret(&mut func, bb0, None);

    let errors = validate_module(&module_of(func)).unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ValidateError::VoidOperand { .. }))
    );
}

#[test]
fn validate_rejects_phi_not_covering_predecessors() {
    let mut func = Function::new("f", vec![("c".into(), Type::I1)], Type::I32);
    let c = func.params[0].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    let bb3 = func.alloc_block();
    branch(&mut func, bb0, c, bb1, bb2);
    let one = func.intern_const(Constant::Int(1), Type::I32);
    jump(&mut func, bb1, bb3);
    jump(&mut func, bb2, bb3);
    let m = func.new_inst_value(Type::I32);
    push(
        &mut func,
        bb3,
        Instruction::Phi {
            result: m,
            // Missing the arm for bb2.
            incoming: vec![(one, bb1)],
        },
    );
    ret(&mut func, bb3, Some(m));

    let errors = validate_module(&module_of(func)).unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ValidateError::PhiMissingPred { pred, .. } if *pred == bb2))
    );
}

// --------------------------------------------------------------- analysis

fn diamond() -> Function {
    let mut func = Function::new("f", vec![("c".into(), Type::I1)], Type::Void);
    let c = func.params[0].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    let bb3 = func.alloc_block();
    branch(&mut func, bb0, c, bb1, bb2);
    jump(&mut func, bb1, bb3);
    jump(&mut func, bb2, bb3);
    ret(&mut func, bb3, None);
    func
}

#[test]
fn dominators_of_diamond() {
    let func = diamond();
    let doms = compute_dominators(&func);

    assert!(doms.dominates(BlockId(0), BlockId(3)));
    assert!(doms.dominates(BlockId(0), BlockId(1)));
    assert!(!doms.dominates(BlockId(1), BlockId(3)));
    assert!(!doms.dominates(BlockId(2), BlockId(3)));
    assert_eq!(doms.idom(BlockId(3)), Some(BlockId(0)));
    assert_eq!(doms.idom(BlockId(1)), Some(BlockId(0)));
}

fn nested_loops() -> Function {
    let mut func = Function::new(
        "f",
        vec![("p".into(), Type::I1), ("q".into(), Type::I1)],
        Type::Void,
    );
    let p = func.params[0].value;
    let q = func.params[1].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    let bb3 = func.alloc_block();
    let bb4 = func.alloc_block();
    jump(&mut func, bb0, bb1);
    jump(&mut func, bb1, bb2);
    branch(&mut func, bb2, p, bb2, bb3);
    branch(&mut func, bb3, q, bb1, bb4);
    ret(&mut func, bb4, None);
    func
}

#[test]
fn loop_discovery_nested() {
    let func = nested_loops();
    let loops = find_loops(&func);
    assert_eq!(loops.loops.len(), 2);

    let outer = loops
        .loops
        .iter()
        .find(|l| l.header == BlockId(1))
        .expect("outer loop");
    assert_eq!(outer.latches, vec![BlockId(3)]);
    assert_eq!(outer.blocks.len(), 3);
    assert_eq!(outer.preheader, Some(BlockId(0)));
    assert_eq!(outer.exiting, vec![BlockId(3)]);

    let inner = loops
        .loops
        .iter()
        .find(|l| l.header == BlockId(2))
        .expect("inner loop");
    assert_eq!(inner.latches, vec![BlockId(2)]);
    assert_eq!(inner.blocks, vec![BlockId(2)]);
    assert_eq!(inner.preheader, Some(BlockId(1)));

    // Innermost query prefers the smaller loop.
    let innermost = loops.innermost_containing(BlockId(2)).unwrap();
    assert_eq!(innermost.header, BlockId(2));
    assert!(loops.is_header(BlockId(1)));
}

// ----------------------------------------------------------------- passes

#[test]
fn simplify_cfg_folds_jump_chains() {
    let mut func = Function::new(
        "f",
        vec![("a".into(), Type::I32), ("b".into(), Type::I32)],
        Type::I32,
    );
    let a = func.params[0].value;
    let b = func.params[1].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    jump(&mut func, bb0, bb1);
    let sum = func.new_inst_value(Type::I32);
    push(
        &mut func,
        bb1,
        Instruction::Binary {
            result: sum,
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        },
    );
    jump(&mut func, bb1, bb2);
    ret(&mut func, bb2, Some(sum));

    let mut module = module_of(func);
    assert!(simplify_cfg(&mut module));

    let func = &module.functions[0];
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(func.blocks[0].instructions.len(), 1);
    assert!(matches!(
        func.blocks[0].terminator,
        Some(Terminator::Return { value: Some(v), .. }) if v == sum
    ));
    assert!(validate_module(&module).is_ok());
}

#[test]
fn simplify_cfg_retargets_phi_arms() {
    let mut func = Function::new(
        "f",
        vec![
            ("c".into(), Type::I1),
            ("x".into(), Type::I32),
            ("y".into(), Type::I32),
        ],
        Type::I32,
    );
    let c = func.params[0].value;
    let x = func.params[1].value;
    let y = func.params[2].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    let bb3 = func.alloc_block();
    let bb4 = func.alloc_block();
    branch(&mut func, bb0, c, bb1, bb3);
    jump(&mut func, bb1, bb2);
    jump(&mut func, bb2, bb4);
    jump(&mut func, bb3, bb4);
    let m = func.new_inst_value(Type::I32);
    push(
        &mut func,
        bb4,
        Instruction::Phi {
            result: m,
            incoming: vec![(x, bb2), (y, bb3)],
        },
    );
    ret(&mut func, bb4, Some(m));

    let mut module = module_of(func);
    assert!(simplify_cfg(&mut module));

    let func = &module.functions[0];
    let phi = func
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .find(|i| matches!(i, Instruction::Phi { .. }))
        .expect("phi survives");
    if let Instruction::Phi { incoming, .. } = phi {
        let blocks: Vec<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
        assert!(blocks.contains(&bb1), "arm retargeted to bb1: {:?}", blocks);
        assert!(!blocks.contains(&bb2));
    }
    assert!(validate_module(&module).is_ok());
}

fn copy_function() -> Function {
    let mut func = Function::new(
        "copy",
        vec![
            ("p".into(), Type::Ptr(Box::new(Type::I32))),
            ("q".into(), Type::Ptr(Box::new(Type::I32))),
        ],
        Type::Void,
    );
    let p = func.params[0].value;
    let q = func.params[1].value;
    let bb0 = func.alloc_block();
    let v = func.new_inst_value(Type::I32);
    push(&mut func, bb0, Instruction::Load { result: v, ptr: p });
    let st = func.new_inst_value(Type::Void);
    push(
        &mut func,
        bb0,
        Instruction::Store {
            result: st,
            ptr: q,
            value: v,
        },
    );
    let v2 = func.new_inst_value(Type::I32);
    push(&mut func, bb0, Instruction::Load { result: v2, ptr: q });
    ret(&mut func, bb0, None);
    func
}

#[test]
fn mem_order_threads_tokens_in_straight_line() {
    let mut module = module_of(copy_function());
    assert!(enforce_mem_order(&mut module).unwrap());

    let func = &module.functions[0];
    let insts = &func.blocks[0].instructions;

    let (first_token, store_result) = match (&insts[0], &insts[1]) {
        (
            Instruction::Call { callee: c0, args: a0, .. },
            Instruction::Call {
                callee: c1,
                result: r1,
                ..
            },
        ) => {
            assert_eq!(c0.as_str(), "lso.load.i32");
            assert_eq!(c1.as_str(), "lso.store.i32");
            (a0[1], *r1)
        }
        other => panic!("expected rewritten calls, got {:?}", other),
    };
    // The entry token is the constant true.
    assert_eq!(func.as_const(first_token), Some(Constant::Bool(true)));
    // The second load consumes the store's token.
    match &insts[2] {
        Instruction::Call { callee, args, .. } => {
            assert_eq!(callee.as_str(), "lso.load.i32");
            assert_eq!(args[1], store_result);
        }
        other => panic!("expected rewritten load, got {:?}", other),
    }
    // The store's identity became the i1 token.
    assert_eq!(*func.type_of(store_result), Type::I1);

    assert_eq!(module.declarations.len(), 2);
    assert!(validate_module(&module).is_ok());
}

#[test]
fn mem_order_merges_tokens_at_joins() {
    let mut func = Function::new(
        "f",
        vec![
            ("c".into(), Type::I1),
            ("p".into(), Type::Ptr(Box::new(Type::I32))),
        ],
        Type::I32,
    );
    let c = func.params[0].value;
    let p = func.params[1].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    let bb3 = func.alloc_block();
    branch(&mut func, bb0, c, bb1, bb2);
    let one = func.intern_const(Constant::Int(1), Type::I32);
    let two = func.intern_const(Constant::Int(2), Type::I32);
    let st1 = func.new_inst_value(Type::Void);
    push(
        &mut func,
        bb1,
        Instruction::Store {
            result: st1,
            ptr: p,
            value: one,
        },
    );
    jump(&mut func, bb1, bb3);
    let st2 = func.new_inst_value(Type::Void);
    push(
        &mut func,
        bb2,
        Instruction::Store {
            result: st2,
            ptr: p,
            value: two,
        },
    );
    jump(&mut func, bb2, bb3);
    let v = func.new_inst_value(Type::I32);
    push(&mut func, bb3, Instruction::Load { result: v, ptr: p });
    ret(&mut func, bb3, Some(v));

    let mut module = module_of(func);
    assert!(enforce_mem_order(&mut module).unwrap());

    let func = &module.functions[0];
    let join = func.block(bb3).unwrap();
    let (phi_result, incoming) = match &join.instructions[0] {
        Instruction::Phi { result, incoming } => (*result, incoming.clone()),
        other => panic!("expected token phi at join head, got {:?}", other),
    };
    assert_eq!(incoming.len(), 2);
    assert!(incoming.contains(&(st1, bb1)));
    assert!(incoming.contains(&(st2, bb2)));

    match &join.instructions[1] {
        Instruction::Call { callee, args, .. } => {
            assert_eq!(callee.as_str(), "lso.load.i32");
            assert_eq!(args[1], phi_result);
        }
        other => panic!("expected rewritten load, got {:?}", other),
    }
    assert!(validate_module(&module).is_ok());
}

#[test]
fn mem_order_token_defs_dominate_loads() {
    let mut module = module_of(copy_function());
    enforce_mem_order(&mut module).unwrap();

    let func = &module.functions[0];
    let doms = compute_dominators(func);
    for block in &func.blocks {
        for inst in &block.instructions {
            if let Instruction::Call { callee, args, .. } = inst {
                if callee.starts_with("lso.load.") {
                    let token = args[1];
                    if let Some(def_block) = func.block_of(token) {
                        assert!(doms.dominates(def_block, block.id));
                    }
                }
            }
        }
    }
}

#[test]
fn mem_order_is_idempotent() {
    let mut module = module_of(copy_function());
    assert!(enforce_mem_order(&mut module).unwrap());
    let printed = print_function(&module.functions[0]);
    let decls = module.declarations.clone();

    assert!(!enforce_mem_order(&mut module).unwrap());
    assert_eq!(printed, print_function(&module.functions[0]));
    assert_eq!(decls, module.declarations);
}

#[test]
fn mem_order_skips_declarations() {
    let mut func = Function::new("ext", vec![], Type::Void);
    func.is_declaration = true;
    let mut module = module_of(func);
    assert!(!enforce_mem_order(&mut module).unwrap());
}

#[test]
fn dce_removes_unreachable_blocks_and_phi_arms() {
    let mut func = Function::new(
        "f",
        vec![("a".into(), Type::I32), ("b".into(), Type::I32)],
        Type::I32,
    );
    let a = func.params[0].value;
    let b = func.params[1].value;
    let bb0 = func.alloc_block();
    let bb1 = func.alloc_block();
    let bb2 = func.alloc_block();
    jump(&mut func, bb0, bb2);
    jump(&mut func, bb1, bb2); // bb1 is unreachable
    let m = func.new_inst_value(Type::I32);
    push(
        &mut func,
        bb2,
        Instruction::Phi {
            result: m,
            incoming: vec![(a, bb0), (b, bb1)],
        },
    );
    ret(&mut func, bb2, Some(m));

    let mut module = module_of(func);
    assert!(eliminate_dead_blocks(&mut module));

    let func = &module.functions[0];
    assert_eq!(func.blocks.len(), 2);
    match &func.block(bb2).unwrap().instructions[0] {
        Instruction::Phi { incoming, .. } => assert_eq!(incoming, &vec![(a, bb0)]),
        other => panic!("expected phi, got {:?}", other),
    }
    assert!(validate_module(&module).is_ok());
    assert!(!eliminate_dead_blocks(&mut module));
}

#[test]
fn users_and_defs_are_consistent() {
    let func = copy_function();
    let v = func.blocks[0].instructions[0].result();
    let users = func.users(v);
    // The store uses the first load's result.
    assert_eq!(users.len(), 1);
    assert_eq!(users[0], func.blocks[0].instructions[1].result());
    assert!(func.def(v).is_some());
    assert_eq!(func.block_of(v), Some(BlockId(0)));
}
