//! Shared configuration for the `testbus` message-bus harness.
//!
//! The harness needs to agree with its environment on a handful of knobs: which
//! daemon binary to launch, where the daemon listens, whether a bus monitor is
//! attached, and how long teardown may wait for the session connection to be
//! released. [`HarnessConfig`] captures those values. It derives
//! [`OrthoConfig`](ortho_config::OrthoConfig), so loaders resolve it from
//! these layers, lowest precedence first:
//!
//! 1. built-in defaults (see [`defaults`]),
//! 2. a TOML file named by `--config-path` or `TESTBUS_CONFIG_PATH`, or a
//!    discovered `.testbus.toml`,
//! 3. `TESTBUS_*` environment variables named after the fields, for example
//!    `TESTBUS_DAEMON_PROGRAM` or `TESTBUS_TEARDOWN_TIMEOUT_MS`.
//!
//! Invalid values fail fast with a [`ConfigError`] rather than silently falling
//! back to defaults, so a misconfigured CI job stops before any daemon starts.

pub mod defaults;
mod error;
mod loader;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DAEMON_PROGRAM, DEFAULT_LISTEN_ADDRESS, DEFAULT_MONITOR_PROGRAM,
    DEFAULT_TEARDOWN_TIMEOUT, DEFAULT_TEARDOWN_TIMEOUT_MS, default_log_format,
};
pub use error::ConfigError;
pub use loader::{
    CONFIG_PATH_ENV, ConfigLoader, DAEMON_PROGRAM_ENV, LOG_FILTER_ENV, LOG_FORMAT_ENV,
    MONITOR_ENV, PROGRAM_NAME, StaticConfigLoader, SystemConfigLoader, TEARDOWN_TIMEOUT_ENV,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "TESTBUS")]
pub struct HarnessConfig {
    #[serde(default = "defaults::default_daemon_program")]
    daemon_program: PathBuf,
    #[serde(default)]
    daemon_args: Vec<String>,
    #[serde(default = "defaults::default_listen_address")]
    listen_address: String,
    #[serde(default)]
    monitor: bool,
    #[serde(default = "defaults::default_monitor_program")]
    monitor_program: PathBuf,
    #[serde(default)]
    monitor_args: Vec<String>,
    #[serde(default = "defaults::default_teardown_timeout_ms")]
    teardown_timeout_ms: u64,
    #[serde(default)]
    log_filter: Option<String>,
    #[serde(default = "defaults::default_log_format")]
    log_format: LogFormat,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            daemon_program: defaults::default_daemon_program(),
            daemon_args: Vec::new(),
            listen_address: defaults::default_listen_address(),
            monitor: false,
            monitor_program: defaults::default_monitor_program(),
            monitor_args: Vec::new(),
            teardown_timeout_ms: DEFAULT_TEARDOWN_TIMEOUT_MS,
            log_filter: None,
            log_format: default_log_format(),
        }
    }
}

impl HarnessConfig {
    /// Daemon binary, resolved through `PATH` when relative.
    #[must_use]
    pub fn daemon_program(&self) -> &Path {
        self.daemon_program.as_path()
    }

    /// Arguments placed before the harness-generated daemon arguments.
    #[must_use]
    pub fn daemon_args(&self) -> &[String] {
        &self.daemon_args
    }

    /// Address the daemon is told to listen on.
    #[must_use]
    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    /// Whether a bus monitor is attached after the daemon starts.
    #[must_use]
    pub const fn monitor(&self) -> bool {
        self.monitor
    }

    /// Monitor binary launched when [`Self::monitor`] is enabled.
    #[must_use]
    pub fn monitor_program(&self) -> &Path {
        self.monitor_program.as_path()
    }

    /// Arguments placed before `--address <address>` on the monitor command
    /// line.
    #[must_use]
    pub fn monitor_args(&self) -> &[String] {
        &self.monitor_args
    }

    /// Upper bound on the teardown wait for the session connection.
    #[must_use]
    pub const fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Log filter expression; telemetry is only installed when present.
    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log_filter.as_deref()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Replaces the daemon binary.
    #[must_use]
    pub fn with_daemon_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.daemon_program = program.into();
        self
    }

    /// Replaces the leading daemon arguments.
    #[must_use]
    pub fn with_daemon_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.daemon_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the listen address.
    #[must_use]
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Enables or disables the bus monitor.
    #[must_use]
    pub const fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    /// Replaces the monitor binary.
    #[must_use]
    pub fn with_monitor_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.monitor_program = program.into();
        self
    }

    /// Replaces the leading monitor arguments.
    #[must_use]
    pub fn with_monitor_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitor_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the teardown timeout, kept at millisecond precision.
    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the log filter expression.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Replaces the log output format.
    #[must_use]
    pub const fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }
}
