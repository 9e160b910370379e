use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Error, Result};

/// Installs a global `fmt` subscriber filtered by `level` (an `EnvFilter` directive).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| Error::InvalidArgument(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| Error::InvalidArgument("Logging already initialized".into()))
}

/// Installs a global subscriber configured from `RUST_LOG`, defaulting to `warn`.
pub fn init_logging_from_env() -> Result<()> {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "warn".into());
    init_logging(&directive)
}
