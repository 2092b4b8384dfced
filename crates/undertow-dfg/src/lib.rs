//! Undertow DFG: dataflow graph construction.
//!
//! Takes validated, memory-order-enforced SSA IR and lowers each function
//! into a RipTide-style operator graph: control flow becomes steers, merges
//! and loop carries; memory ordering rides the explicit token chain; address
//! arithmetic and casts dissolve into wiring. The crate also renders graphs
//! as DOT and models the operators' token-level firing semantics.

pub mod build;
pub mod dot;
pub mod graph;
pub mod sim;

pub use build::build_dfg;
pub use graph::{DataflowGraph, Edge, EdgeId, Node, NodeId, OpKind, ValueRef};
