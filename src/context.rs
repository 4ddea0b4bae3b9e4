//! Process-wide one-shot initialization (§5, §9 "Cyclic/global state").
//!
//! A native GDAL/PROJ-backed implementation would also do signal handlers,
//! locale and log-file setup here; this crate's ambient equivalent is
//! tracing subscriber installation. `Context::init` is the single
//! `OnceLock`-guarded entry point any other one-shot concern should be
//! added to.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static CONTEXT: OnceLock<Context> = OnceLock::new();

/// Process-wide handle. Cheap to clone conceptually (it holds no per-call
/// state today) but kept as a single instance behind `OnceLock` so future
/// global resources (a GDAL/PROJ handle, a DSM cache) have one obvious home.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    _private: (),
}

impl Context {
    /// Initializes the process-wide context, installing the tracing
    /// subscriber on first call. Subsequent calls are no-ops and return the
    /// same handle.
    pub fn init() -> Context {
        *CONTEXT.get_or_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init();
            Context { _private: () }
        })
    }

    /// Returns the process context if [`Context::init`] has already run,
    /// without triggering initialization.
    pub fn get() -> Option<Context> {
        CONTEXT.get().copied()
    }
}
