//! Command-line argument parsing.

use std::path::PathBuf;

/// What the process should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Interactive session.
    Repl,
    /// Run a source file (`-f path`).
    Script(PathBuf),
    /// Evaluate one expression given on the command line.
    Expr(String),
    /// `-h` / `--help`.
    PrintHelp,
    /// `-V` / `--version`.
    PrintVersion,
}

/// Parsed command line.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Selected mode.
    pub mode: ExecutionMode,
    /// `--gc` backend name override.
    pub backend: Option<String>,
    /// `--gc-heap` initial heap size override, in bytes.
    pub heap_bytes: Option<usize>,
    /// `-q`: skip the REPL banner.
    pub quiet: bool,
}

/// Parse the argument vector (without argv[0]).
pub fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut mode: Option<ExecutionMode> = None;
    let mut backend = None;
    let mut heap_bytes = None;
    let mut quiet = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(with_mode(ExecutionMode::PrintHelp)),
            "-V" | "--version" => return Ok(with_mode(ExecutionMode::PrintVersion)),
            "-q" => quiet = true,
            "-f" => {
                let path = iter
                    .next()
                    .ok_or_else(|| "-f requires a file path".to_owned())?;
                set_mode(&mut mode, ExecutionMode::Script(PathBuf::from(path)))?;
            }
            "--gc" => {
                let name = iter
                    .next()
                    .ok_or_else(|| "--gc requires a backend name".to_owned())?;
                backend = Some(name.clone());
            }
            "--gc-heap" => {
                let bytes = iter
                    .next()
                    .ok_or_else(|| "--gc-heap requires a byte count".to_owned())?;
                let parsed = bytes
                    .parse::<usize>()
                    .map_err(|_| format!("invalid --gc-heap value: {bytes}"))?;
                heap_bytes = Some(parsed);
            }
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("unknown option: {other}"));
            }
            expr => {
                set_mode(&mut mode, ExecutionMode::Expr(expr.to_owned()))?;
            }
        }
    }

    Ok(CliArgs {
        mode: mode.unwrap_or(ExecutionMode::Repl),
        backend,
        heap_bytes,
        quiet,
    })
}

fn with_mode(mode: ExecutionMode) -> CliArgs {
    CliArgs {
        mode,
        backend: None,
        heap_bytes: None,
        quiet: false,
    }
}

fn set_mode(slot: &mut Option<ExecutionMode>, mode: ExecutionMode) -> Result<(), String> {
    if slot.is_some() {
        return Err("only one script or expression may be given".to_owned());
    }
    *slot = Some(mode);
    Ok(())
}

/// Version banner line.
pub fn version_string() -> String {
    format!("minilisp {}", minilisp_runtime::VERSION)
}

/// `--help` text.
pub fn help_text() -> String {
    "usage: minilisp [options] [expr]\n\
     \n\
     With no expression, starts an interactive REPL.\n\
     \n\
     options:\n\
     \x20 -f <file>          run a source file\n\
     \x20 --gc <backend>     collector backend: mark-sweep (default),\n\
     \x20                    copying, generational\n\
     \x20 --gc-heap <bytes>  initial heap size in bytes\n\
     \x20 -q                 suppress the REPL banner\n\
     \x20 -h, --help         show this help\n\
     \x20 -V, --version      show the version\n\
     \n\
     environment:\n\
     \x20 MINILISP_GC_BACKEND     backend name (same values as --gc)\n\
     \x20 MINILISP_GC_HEAP_BYTES  initial heap size in bytes"
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&owned)
    }

    #[test]
    fn test_no_args_is_repl() {
        let parsed = parse(&[]).unwrap();
        assert_eq!(parsed.mode, ExecutionMode::Repl);
        assert!(parsed.backend.is_none());
    }

    #[test]
    fn test_expression_mode() {
        let parsed = parse(&["(+ 1 2)"]).unwrap();
        assert_eq!(parsed.mode, ExecutionMode::Expr("(+ 1 2)".into()));
    }

    #[test]
    fn test_script_mode() {
        let parsed = parse(&["-f", "prog.lisp"]).unwrap();
        assert_eq!(parsed.mode, ExecutionMode::Script(PathBuf::from("prog.lisp")));
    }

    #[test]
    fn test_gc_options() {
        let parsed = parse(&["--gc", "generational", "--gc-heap", "65536", "(gc)"]).unwrap();
        assert_eq!(parsed.backend.as_deref(), Some("generational"));
        assert_eq!(parsed.heap_bytes, Some(65536));
        assert_eq!(parsed.mode, ExecutionMode::Expr("(gc)".into()));
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse(&["--help"]).unwrap().mode, ExecutionMode::PrintHelp);
        assert_eq!(parse(&["-V"]).unwrap().mode, ExecutionMode::PrintVersion);
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["-f"]).is_err());
        assert!(parse(&["--gc"]).is_err());
        assert!(parse(&["--gc-heap", "lots"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
        assert!(parse(&["a", "b"]).is_err());
    }

    #[test]
    fn test_quiet_flag() {
        assert!(parse(&["-q"]).unwrap().quiet);
    }
}
