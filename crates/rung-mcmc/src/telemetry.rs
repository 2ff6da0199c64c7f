//! Tracing subscriber setup for binaries and tests driving the sampler.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding the filter directives, checked before `RUST_LOG`.
pub const FILTER_ENV: &str = "RUNG_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Installs a formatted subscriber filtered by `RUNG_LOG`, `RUST_LOG` or `info`.
pub fn init_tracing() -> Result<(), TelemetryError> {
    INITIALISED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInitialised)?;

    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Install(err.to_string()))
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// [`init_tracing`] already ran in this process.
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    /// Another global subscriber was installed first.
    #[error("failed to install the tracing subscriber: {0}")]
    Install(String),
}
