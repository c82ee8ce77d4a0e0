//! Structured telemetry initialisation for harness diagnostics.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use testbus_config::{HarnessConfig, LogFormat};

/// Filter used when the configuration names none.
pub const DEFAULT_LOG_FILTER: &str = "info";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs a global tracing subscriber on first use.
///
/// Repeated calls are idempotent. When the host test binary already installed
/// its own global subscriber, that subscriber is left in place and this call
/// succeeds without touching it.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the configured filter does not
/// parse, or [`TelemetryError::Subscriber`] when installation fails.
pub fn initialise(config: &HarnessConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

fn install_subscriber(config: &HarnessConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter().unwrap_or(DEFAULT_LOG_FILTER))
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
