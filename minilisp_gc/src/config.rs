//! Backend selection and sizing configuration.
//!
//! Configuration is assembled once, before the runtime constructs its
//! backend, from environment-style string keys and/or explicit setters.
//! Unrecognized backend names fall back to mark-sweep so a misspelled
//! setting degrades to the default collector instead of failing startup.

/// Environment key naming the backend: `mark-sweep`, `copy`/`copying`/
/// `semispace`, or `gen`/`generational`.
pub const ENV_BACKEND: &str = "MINILISP_GC_BACKEND";

/// Environment key holding the initial heap size in bytes.
pub const ENV_HEAP_BYTES: &str = "MINILISP_GC_HEAP_BYTES";

/// Default mark-sweep heap capacity: 4 MiB.
pub const DEFAULT_MARK_SWEEP_HEAP: usize = 4 * 1024 * 1024;

/// Default copying semi-space size: 32 MiB each.
pub const DEFAULT_SEMI_SPACE: usize = 32 * 1024 * 1024;

/// Default generational nursery semi-space size: 512 KiB each.
pub const DEFAULT_NURSERY_SEMI_SPACE: usize = 512 * 1024;

/// Default generational tenured region capacity: 4 MiB.
pub const DEFAULT_TENURED_HEAP: usize = 4 * 1024 * 1024;

/// Which collector backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Non-moving mark-sweep over a free-list heap (the default).
    #[default]
    MarkSweep,
    /// Semi-space copying (Cheney).
    Copying,
    /// Copying nursery over mark-sweep tenured.
    Generational,
}

impl BackendKind {
    /// Parse a backend name. Absent or unrecognized names select
    /// mark-sweep.
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("copy") | Some("copying") | Some("semispace") => Self::Copying,
            Some("gen") | Some("generational") => Self::Generational,
            _ => Self::MarkSweep,
        }
    }

    /// Canonical name, as accepted by [`BackendKind::from_name`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkSweep => "mark-sweep",
            Self::Copying => "copying",
            Self::Generational => "generational",
        }
    }
}

/// Configuration consulted by each backend's constructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcConfig {
    /// Backend to construct.
    pub backend: BackendKind,
    /// Initial size in bytes of the backend's primary region: the
    /// mark-sweep heap, each copying semi-space, or the generational
    /// tenured region. `None` keeps the per-backend default.
    pub heap_size: Option<usize>,
}

impl GcConfig {
    /// Configuration with a specific backend and default sizing.
    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            heap_size: None,
        }
    }

    /// Read configuration from the process environment.
    ///
    /// Consults [`ENV_BACKEND`] and [`ENV_HEAP_BYTES`]; malformed sizes
    /// are ignored.
    pub fn from_env() -> Self {
        let backend = BackendKind::from_name(std::env::var(ENV_BACKEND).ok().as_deref());
        let heap_size = std::env::var(ENV_HEAP_BYTES)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0);
        Self { backend, heap_size }
    }

    /// Set the initial heap size, builder style.
    #[must_use]
    pub fn heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = Some(bytes);
        self
    }
}
