//! Undertow compiler pipeline.
//!
//! Unified entry point over one IR module. The pipeline runs, in order:
//!
//! 1. **Validate**: structural IR checks; any error aborts the run.
//! 2. **Simplify CFG**: fold empty fall-through blocks.
//! 3. **Enforce memory order**: loads/stores become token-threaded
//!    intrinsic calls.
//! 4. **Eliminate dead blocks**: cleanup after simplification.
//! 5. **Re-validate**: the transforms must hand over well-formed IR.
//! 6. **Build**: loop analysis plus dataflow-graph construction per
//!    function definition.
//!
//! Failures surface as a list of [`Diagnostic`]s; the caller decides how to
//! render them (the CLI prints one line each on stderr).

use std::fmt;

use tracing::info;

use undertow_dfg::{DataflowGraph, build_dfg};
use undertow_ir::analysis::find_loops;
use undertow_ir::passes::{eliminate_dead_blocks, enforce_mem_order, simplify_cfg};
use undertow_ir::validate::validate_module;
use undertow_ir::Module;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A unified diagnostic message from any phase of the pipeline.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    /// Function the diagnostic refers to, when attributable.
    pub function: Option<String>,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            function: None,
            severity: Severity::Error,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.function {
            Some(name) => write!(f, "{}: @{}: {}", tag, name, self.message),
            None => write!(f, "{}: {}", tag, self.message),
        }
    }
}

/// One successfully built function.
#[derive(Debug)]
pub struct CompiledFunction {
    /// Index of the function within the (transformed) module.
    pub index: usize,
    pub name: String,
    pub graph: DataflowGraph,
}

/// Run the full pipeline over `module`, mutating it in place (memory
/// ordering, CFG cleanups) and building one dataflow graph per function
/// definition.
pub fn compile_module(module: &mut Module) -> Result<Vec<CompiledFunction>, Vec<Diagnostic>> {
    if let Err(errors) = validate_module(module) {
        return Err(errors.into_iter().map(|e| Diagnostic::error(e.to_string())).collect());
    }

    simplify_cfg(module);

    if let Err(error) = enforce_mem_order(module) {
        return Err(vec![Diagnostic::error(error.to_string())]);
    }

    eliminate_dead_blocks(module);

    // The transforms above must leave the module well-formed; anything else
    // is a pipeline bug surfaced as a diagnostic rather than a panic.
    if let Err(errors) = validate_module(module) {
        return Err(errors
            .into_iter()
            .map(|e| Diagnostic::error(format!("after transforms: {}", e)))
            .collect());
    }

    let mut built = Vec::new();
    for (index, func) in module.functions.iter().enumerate() {
        if func.is_declaration {
            continue;
        }
        let loops = find_loops(func);
        let graph = build_dfg(func, &loops);
        info!(
            function = %func.name,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "function compiled"
        );
        built.push(CompiledFunction {
            index,
            name: func.name.clone(),
            graph,
        });
    }

    Ok(built)
}
