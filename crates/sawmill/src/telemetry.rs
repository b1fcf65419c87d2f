//! Logging initialization.
//!
//! The `--verbosity` flag keeps the level names build-tool operators
//! already use (`panic|fatal|error|warn|info|debug`); the aliases collapse
//! onto tracing's level set. `RUST_LOG` still wins when set, so targeted
//! filters work without touching the flag.

use anyhow::{bail, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a verbosity flag value onto a tracing level directive.
pub fn level_for(verbosity: &str) -> Result<&'static str> {
    Ok(match verbosity.to_ascii_lowercase().as_str() {
        "panic" | "fatal" | "error" => "error",
        "warn" | "warning" => "warn",
        "info" => "info",
        "debug" => "debug",
        other => bail!("unable to parse verbosity level: {other:?}"),
    })
}

/// Initialize the global subscriber. Call once, early in `main`.
pub fn init(verbosity: &str) -> Result<()> {
    let level = level_for(verbosity)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    Ok(())
}
