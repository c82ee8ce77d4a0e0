//! Error types surfaced by the harness.

use std::io;
use std::path::PathBuf;

use testbus_config::ConfigError;
use testbus_watchdog::WatchdogError;
use thiserror::Error;

use crate::address::AddressError;
use crate::telemetry::TelemetryError;

/// Errors raised while starting the bus daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The daemon configuration file could not be written.
    #[error("failed to write bus daemon configuration: {source}")]
    ConfigWrite {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The channel carrying the daemon's address could not be created.
    #[error("failed to create bus address channel: {source}")]
    AddressChannel {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The daemon binary could not be started.
    #[error("failed to spawn bus daemon '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The watchdog refused to supervise the daemon.
    #[error("failed to supervise bus daemon: {source}")]
    Watchdog {
        /// Underlying watchdog error.
        #[source]
        source: WatchdogError,
    },
    /// Reading the address failed.
    #[error("failed to read bus address: {source}")]
    AddressRead {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The daemon closed its address channel without printing an address.
    #[error("bus daemon exited before printing its address")]
    AddressMissing,
    /// The daemon printed an empty line.
    #[error("bus daemon printed an empty address")]
    AddressEmpty,
    /// The daemon printed something that is not a bus address.
    #[error("bus daemon printed an invalid address '{address}': {source}")]
    AddressInvalid {
        /// Text the daemon printed.
        address: String,
        /// Parse failure.
        #[source]
        source: AddressError,
    },
}

/// Umbrella error returned by [`crate::TestBus::try_up`].
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration failed to load.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The process guard could not be created.
    #[error(transparent)]
    Watchdog(#[from] WatchdogError),
    /// The daemon failed to start.
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}
