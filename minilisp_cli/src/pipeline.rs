//! Execution pipeline: source text through the interpreter to an exit
//! code, shared by the script and expression modes.

use std::path::Path;
use std::process::ExitCode;

use minilisp_gc::GcConfig;
use minilisp_runtime::Interp;

use crate::error;

/// Run a source file and print its final value.
pub fn run_file(path: &Path, config: GcConfig) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("minilisp: can't open file '{}': {}", path.display(), e);
            return ExitCode::from(error::EXIT_USAGE_ERROR);
        }
    };
    execute_source(&source, config)
}

/// Evaluate an expression given on the command line.
pub fn run_expr(src: &str, config: GcConfig) -> ExitCode {
    execute_source(src, config)
}

fn execute_source(src: &str, config: GcConfig) -> ExitCode {
    let mut interp = match Interp::new(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("minilisp: {e}");
            return ExitCode::from(error::EXIT_ERROR);
        }
    };
    match interp.eval_source(src) {
        Ok(handle) => {
            println!("Result: {}", interp.format_handle(handle));
            ExitCode::from(error::EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(error::EXIT_ERROR)
        }
    }
}
