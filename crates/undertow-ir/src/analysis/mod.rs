//! CFG analyses: predecessors, orderings, dominators, natural loops.

mod cfg;
mod dom;
mod loops;

pub use cfg::{predecessors, reachable_blocks, reverse_postorder, successors};
pub use dom::{Dominators, compute_dominators};
pub use loops::{Loop, LoopInfo, find_loops};
