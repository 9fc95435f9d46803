//! Minilisp: a small Lisp with a pluggable tracing garbage collector.
//!
//! The CLI wires configuration (environment keys plus flags) into the
//! collector runtime and dispatches to the REPL, a script file, or a
//! one-shot expression.

mod args;
mod error;
mod pipeline;
mod repl;

use std::process::ExitCode;

use args::ExecutionMode;
use minilisp_gc::{BackendKind, GcConfig};

fn main() -> ExitCode {
    env_logger::init();

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match args::parse_args(&raw_args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("minilisp: {e}");
            return ExitCode::from(error::EXIT_USAGE_ERROR);
        }
    };

    match &parsed.mode {
        ExecutionMode::PrintVersion => {
            println!("{}", args::version_string());
            return ExitCode::SUCCESS;
        }
        ExecutionMode::PrintHelp => {
            println!("{}", args::help_text());
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    // Environment configuration first, command-line flags on top.
    let mut config = GcConfig::from_env();
    if let Some(name) = &parsed.backend {
        config.backend = BackendKind::from_name(Some(name));
    }
    if let Some(bytes) = parsed.heap_bytes {
        config.heap_size = Some(bytes);
    }

    match &parsed.mode {
        ExecutionMode::Script(path) => pipeline::run_file(path, config),
        ExecutionMode::Expr(src) => pipeline::run_expr(src, config),
        ExecutionMode::Repl => repl::run_repl(config, parsed.quiet),
        ExecutionMode::PrintVersion | ExecutionMode::PrintHelp => {
            unreachable!("handled above")
        }
    }
}
