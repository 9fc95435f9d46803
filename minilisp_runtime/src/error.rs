//! Error types for the interpreter.

use thiserror::Error;

/// The result type used throughout the runtime.
pub type LispResult<T> = Result<T, LispError>;

/// Interpreter error conditions. All of these are recoverable: the REPL
/// reports them and keeps its session. Collector failures (out of
/// memory, root growth) never surface here; those abort the process.
#[derive(Error, Debug, Clone)]
pub enum LispError {
    /// Reader or token-level failure.
    #[error("SyntaxError: {message}")]
    Syntax {
        /// Error description.
        message: String,
    },

    /// Symbol lookup failed in every enclosing scope.
    #[error("Undefined symbol: {name}")]
    Undefined {
        /// The unresolved name.
        name: String,
    },

    /// Operand of the wrong kind.
    #[error("TypeError: {message}")]
    Type {
        /// Error description.
        message: String,
    },

    /// Wrong number of arguments.
    #[error("ArityError: {message}")]
    Arity {
        /// Error description.
        message: String,
    },

    /// The fixed temporary-root pool is full (runaway recursion or an
    /// enormous literal).
    #[error("temporary root pool exhausted")]
    RootOverflow,
}

impl LispError {
    /// Reader/syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Unresolved symbol.
    pub fn undefined(name: impl Into<String>) -> Self {
        Self::Undefined { name: name.into() }
    }

    /// Type mismatch.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Arity mismatch.
    pub fn arity(message: impl Into<String>) -> Self {
        Self::Arity {
            message: message.into(),
        }
    }
}
