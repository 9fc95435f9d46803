//! Interactive REPL.
//!
//! `ml>` prompts for a fresh form, `...>` for continuation lines while
//! the parentheses are still open. Errors print without ending the
//! session; Ctrl-D exits.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use minilisp_gc::GcConfig;
use minilisp_runtime::{form_is_incomplete, Interp};

use crate::error;

/// Run the interactive session.
pub fn run_repl(config: GcConfig, quiet: bool) -> ExitCode {
    if !quiet {
        println!(
            "Minilisp {} ({} collector). Press Ctrl-D to exit.",
            minilisp_runtime::VERSION,
            config.backend.as_str(),
        );
    }

    let mut interp = match Interp::new(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("minilisp: {e}");
            return ExitCode::from(error::EXIT_ERROR);
        }
    };

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut buffer = String::new();
    let mut line = String::new();

    loop {
        print!("{}", if buffer.is_empty() { "ml> " } else { "...> " });
        if io::stdout().flush().is_err() {
            break;
        }

        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }

        if line.trim().is_empty() && buffer.is_empty() {
            continue;
        }
        buffer.push_str(&line);
        if form_is_incomplete(&buffer) {
            continue;
        }

        let mark = interp.root_mark();
        match interp.eval_source(&buffer) {
            Ok(handle) => println!("{}", interp.format_handle(handle)),
            Err(e) => eprintln!("Error: {e}"),
        }
        interp.root_release(mark);
        buffer.clear();
    }

    ExitCode::from(error::EXIT_SUCCESS)
}
