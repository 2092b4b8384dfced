//! End-to-end pipeline tests over textual IR.

use undertow_compiler::{Severity, compile_module};
use undertow_dfg::dot::dfg_to_dot;
use undertow_dfg::{OpKind, ValueRef};
use undertow_ir::parse_module;
use undertow_ir::types::Instruction;

const AXPY: &str = r"
fn @axpy(%A: ptr i32, %n: i32) -> void {
bb0:
  jmp bb1
bb1:
  %i = phi i32 [ 0, bb0 ], [ %i2, bb1 ]
  %p = offset ptr i32, %A, %i
  %v = load i32, %p
  %s = add i32 %v, %i
  store i32 %s, %p
  %i2 = add i32 %i, 1
  %c = cmp lt i32 %i2, %n
  br %c, bb1, bb2
bb2:
  ret
}
";

#[test]
fn pipeline_builds_loop_function() {
    let mut module = parse_module(AXPY).unwrap();
    let built = compile_module(&mut module).unwrap();
    assert_eq!(built.len(), 1);
    let compiled = &built[0];
    assert_eq!(compiled.name, "axpy");

    let graph = &compiled.graph;
    let kinds = |kind: OpKind| graph.nodes().filter(|(_, n)| n.kind == kind).count();

    // Induction variable and memory token are both loop-carried.
    assert_eq!(kinds(OpKind::Carry), 2);
    assert_eq!(kinds(OpKind::TrueSteer), 1);
    assert_eq!(kinds(OpKind::FalseSteer), 1);
    assert_eq!(kinds(OpKind::Stream), 1);
    assert_eq!(kinds(OpKind::Load), 1);
    assert_eq!(kinds(OpKind::Store), 1);
    assert_eq!(kinds(OpKind::Unknown), 0);

    // Memory accesses were rewritten to token intrinsics.
    let func = &module.functions[compiled.index];
    let rewritten = func
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| matches!(i, Instruction::Call { callee, .. } if callee.starts_with("lso.")))
        .count();
    assert_eq!(rewritten, 2);
    assert_eq!(module.declarations.len(), 2);

    // Address arithmetic never materializes.
    let offset_value = func
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .find_map(|i| match i {
            Instruction::Offset { result, .. } => Some(*result),
            _ => None,
        })
        .expect("offset survives in IR");
    assert!(graph.find_node(ValueRef::Ir(offset_value)).is_none());

    let dot = dfg_to_dot(graph, func);
    assert!(dot.starts_with("digraph \"dfg\" {"));
    assert!(dot.contains("shape=\"circle\""));
}

#[test]
fn pipeline_simplifies_forwarding_blocks() {
    let src = r"
fn @fwd(%a: i32) -> i32 {
bb0:
  jmp bb1
bb1:
  %s = add i32 %a, 1
  ret %s
}
";
    let mut module = parse_module(src).unwrap();
    let built = compile_module(&mut module).unwrap();
    assert_eq!(built.len(), 1);
    assert_eq!(module.functions[0].blocks.len(), 1);
}

#[test]
fn pipeline_rejects_malformed_phi() {
    let src = r"
fn @bad(%a: i32, %c: i1) -> i32 {
bb0:
  br %c, bb1, bb2
bb1:
  jmp bb3
bb2:
  jmp bb3
bb3:
  %m = phi i32 [ %a, bb1 ]
  ret %m
}
";
    let mut module = parse_module(src).unwrap();
    let diagnostics = compile_module(&mut module).unwrap_err();
    assert!(!diagnostics.is_empty());
    assert!(diagnostics.iter().all(|d| d.severity == Severity::Error));
    assert!(
        diagnostics.iter().any(|d| d.to_string().contains("phi")),
        "diagnostics: {:?}",
        diagnostics
    );
}

#[test]
fn pipeline_keeps_declarations_opaque() {
    let src = r"
declare @sink(i32) -> void

fn @store_one(%p: ptr i32) -> void {
bb0:
  store i32 1, %p
  ret
}
";
    let mut module = parse_module(src).unwrap();
    let built = compile_module(&mut module).unwrap();
    assert_eq!(built.len(), 1);
    // The pre-existing declaration survives next to the new intrinsics.
    assert!(module.declarations.iter().any(|d| d.name == "sink"));
    assert!(
        module
            .declarations
            .iter()
            .any(|d| d.name == "lso.store.i32")
    );
}
