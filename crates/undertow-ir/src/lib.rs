//! Undertow IR: the SSA intermediate representation.
//!
//! The IR is the input surface of the dataflow pipeline: functions of basic
//! blocks with φ-nodes, address arithmetic, casts, selects and calls, plus
//! the textual `.uir` format, a validator, CFG/dominance/loop analyses, and
//! the rewriting passes the driver runs before graph construction
//! (CFG simplification, memory-order enforcement, dead-block elimination).

pub mod analysis;
pub mod parse;
pub mod passes;
pub mod print;
pub mod types;
pub mod validate;

pub use parse::{ParseError, parse_module};
pub use types::*;
pub use validate::{ValidateError, validate_module};

#[cfg(test)]
mod tests;
