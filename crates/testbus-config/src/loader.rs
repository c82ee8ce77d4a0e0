//! Layered configuration loading.

use std::ffi::OsString;

use ortho_config::OrthoConfig;

use crate::HarnessConfig;
use crate::error::ConfigError;

/// Program name handed to the argument layer in place of the host's argv.
pub const PROGRAM_NAME: &str = "testbus";
/// Names a TOML file supplying the file layer.
pub const CONFIG_PATH_ENV: &str = "TESTBUS_CONFIG_PATH";
/// Overrides the daemon binary.
pub const DAEMON_PROGRAM_ENV: &str = "TESTBUS_DAEMON_PROGRAM";
/// Enables the bus monitor when set to `true`.
pub const MONITOR_ENV: &str = "TESTBUS_MONITOR";
/// Overrides the teardown timeout, in milliseconds.
pub const TEARDOWN_TIMEOUT_ENV: &str = "TESTBUS_TEARDOWN_TIMEOUT_MS";
/// Sets the log filter and enables harness telemetry.
pub const LOG_FILTER_ENV: &str = "TESTBUS_LOG_FILTER";
/// Overrides the log format.
pub const LOG_FORMAT_ENV: &str = "TESTBUS_LOG_FORMAT";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the harness configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when any layer is unreadable or invalid.
    fn load(&self) -> Result<HarnessConfig, ConfigError>;
}

/// Loader that delegates to the layered [`OrthoConfig`] loader.
///
/// The host process's own arguments belong to the test runner, so only
/// [`PROGRAM_NAME`] reaches the argument layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<HarnessConfig, ConfigError> {
        Self::load_from_iter([OsString::from(PROGRAM_NAME)])
    }
}

impl SystemConfigLoader {
    /// Resolves the configuration from `args` instead of the bare program
    /// name, then validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when any layer is unreadable or invalid,
    /// or [`ConfigError::InvalidTimeout`] when the teardown timeout is zero.
    pub fn load_from_iter<I>(args: I) -> Result<HarnessConfig, ConfigError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let config = HarnessConfig::load_from_iter(args)?;
        validate(config)
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: HarnessConfig,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: HarnessConfig) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<HarnessConfig, ConfigError> {
        Ok(self.config.clone())
    }
}

fn validate(config: HarnessConfig) -> Result<HarnessConfig, ConfigError> {
    if config.teardown_timeout().is_zero() {
        return Err(ConfigError::InvalidTimeout { millis: 0 });
    }
    Ok(config)
}
