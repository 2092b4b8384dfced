//! IR-rewriting passes.
//!
//! Run in pipeline order: [`simplify_cfg`], [`enforce_mem_order`],
//! [`eliminate_dead_blocks`]. Each pass takes a mutable module and reports
//! whether it changed anything.

mod dce;
mod mem_order;
mod simplify_cfg;

pub use dce::eliminate_dead_blocks;
pub use mem_order::{
    ENTRY_TOKEN_NAME, LOAD_PREFIX, MemOrderError, STORE_PREFIX, enforce_mem_order,
    load_intrinsic_name, store_intrinsic_name,
};
pub use simplify_cfg::simplify_cfg;
