//! Built-in defaults applied before any configuration layer.

use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;

/// Daemon binary launched when no override is configured.
pub const DEFAULT_DAEMON_PROGRAM: &str = "dbus-daemon";

/// Monitor binary launched when bus monitoring is enabled.
pub const DEFAULT_MONITOR_PROGRAM: &str = "dbus-monitor";

/// Upper bound on the wait for the session connection to be released, in
/// milliseconds.
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 30_000;

/// Upper bound on the wait for the session connection to be released.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TEARDOWN_TIMEOUT_MS);

/// Listen address written into the generated bus configuration.
#[cfg(unix)]
pub const DEFAULT_LISTEN_ADDRESS: &str = "unix:tmpdir=/tmp";

/// Listen address written into the generated bus configuration.
#[cfg(not(unix))]
pub const DEFAULT_LISTEN_ADDRESS: &str = "nonce-tcp:";

/// Owned daemon program used where allocation is required (e.g. serde).
#[must_use]
pub fn default_daemon_program() -> PathBuf {
    PathBuf::from(DEFAULT_DAEMON_PROGRAM)
}

/// Owned monitor program used where allocation is required (e.g. serde).
#[must_use]
pub fn default_monitor_program() -> PathBuf {
    PathBuf::from(DEFAULT_MONITOR_PROGRAM)
}

/// Owned listen address used where allocation is required (e.g. serde).
#[must_use]
pub fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_owned()
}

/// Teardown timeout in milliseconds, for serde defaults.
#[must_use]
pub const fn default_teardown_timeout_ms() -> u64 {
    DEFAULT_TEARDOWN_TIMEOUT_MS
}

/// Default logging format for harness telemetry.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
