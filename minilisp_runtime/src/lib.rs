//! # Minilisp Runtime
//!
//! A minimal S-expression interpreter (numbers, symbols, pairs, nil,
//! closures, a handful of special forms and builtins) built as the
//! mutator for the `minilisp_gc` collectors. The interpreter's value is
//! as a deterministic workload generator: every value lives on the GC
//! heap, every pointer store runs the write barrier, and every
//! intermediate result is protected through the temporary-root pool, so
//! each collector backend gets exercised end to end.
//!
//! Components:
//!
//! - **Value system** ([`value`]): POD heap values plus their trace
//!   callbacks.
//! - **Environments** ([`env`]): scope chains of heap-allocated
//!   bindings.
//! - **Roots** ([`shadow`]): the handle-based temporary-root pool.
//! - **Reader** ([`lexer`] and the reader half of [`interp`]).
//! - **Evaluator** ([`interp`], [`builtins`]).

pub mod builtins;
pub mod env;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod printer;
pub mod shadow;
pub mod value;

pub use error::{LispError, LispResult};
pub use interp::Interp;
pub use lexer::form_is_incomplete;
pub use shadow::Handle;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
