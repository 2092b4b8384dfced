//! Undertow command-line driver.
//!
//! Loads a `.uir` module, runs the compilation pipeline, and writes one
//! `dfg.dot` per function into the output directory (the first function
//! gets the plain `dfg.dot` name). `--emit` adds the transformed IR on
//! stdout or a `cfg.dot`; `--render` shells out to Graphviz.

use std::fs;
use std::path::PathBuf;
use std::process::{self, Command};

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use undertow_compiler::{CompiledFunction, compile_module};
use undertow_dfg::dot::{cfg_to_dot, dfg_to_dot};
use undertow_ir::parse_module;
use undertow_ir::print::print_module;

#[derive(Parser, Debug)]
#[command(name = "undertow")]
#[command(about = "Lower an SSA IR module to CGRA dataflow graphs")]
struct Cli {
    /// Input module in .uir form
    input: PathBuf,

    /// Directory the DOT files are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Additional artifacts: the transformed IR (stdout) or the CFG (DOT)
    #[arg(long, value_enum)]
    emit: Vec<Emit>,

    /// Render every written DOT file to PNG via Graphviz `dot`
    #[arg(long)]
    render: bool,

    /// Build only the named function
    #[arg(long)]
    function: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Emit {
    Ir,
    Cfg,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "undertow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            error!("failed to read {}: {}", cli.input.display(), err);
            process::exit(1);
        }
    };

    let mut module = match parse_module(&source) {
        Ok(module) => module,
        Err(err) => {
            error!("{}: {}", cli.input.display(), err);
            process::exit(1);
        }
    };

    let built = match compile_module(&mut module) {
        Ok(built) => built,
        Err(diagnostics) => {
            for diagnostic in &diagnostics {
                error!("{}", diagnostic);
            }
            process::exit(1);
        }
    };

    if cli.emit.contains(&Emit::Ir) {
        print!("{}", print_module(&module));
    }

    let selected: Vec<&CompiledFunction> = built
        .iter()
        .filter(|c| cli.function.as_deref().is_none_or(|name| c.name == name))
        .collect();
    if selected.is_empty() {
        error!("no function matched");
        process::exit(1);
    }

    let mut written = Vec::new();
    for (position, compiled) in selected.iter().enumerate() {
        let func = &module.functions[compiled.index];

        let dfg_path = if position == 0 {
            cli.out_dir.join("dfg.dot")
        } else {
            cli.out_dir.join(format!("{}.dfg.dot", compiled.name))
        };
        // A failed write is diagnostic-only: the IR result still stands.
        match fs::write(&dfg_path, dfg_to_dot(&compiled.graph, func)) {
            Ok(()) => {
                info!("dataflow graph written to {}", dfg_path.display());
                written.push(dfg_path);
            }
            Err(err) => error!("failed to write {}: {}", dfg_path.display(), err),
        }

        if cli.emit.contains(&Emit::Cfg) {
            let cfg_path = if position == 0 {
                cli.out_dir.join("cfg.dot")
            } else {
                cli.out_dir.join(format!("{}.cfg.dot", compiled.name))
            };
            match fs::write(&cfg_path, cfg_to_dot(func)) {
                Ok(()) => {
                    info!("control-flow graph written to {}", cfg_path.display());
                    written.push(cfg_path);
                }
                Err(err) => error!("failed to write {}: {}", cfg_path.display(), err),
            }
        }
    }

    if cli.render {
        for path in &written {
            let png = path.with_extension("png");
            let status = Command::new("dot")
                .arg("-Tpng")
                .arg(path)
                .arg("-o")
                .arg(&png)
                .status();
            match status {
                Ok(status) if status.success() => info!("rendered {}", png.display()),
                Ok(status) => warn!("dot exited with {} for {}", status, path.display()),
                Err(err) => warn!("could not run graphviz dot: {}", err),
            }
        }
    }
}
