//! Errors raised while resolving the harness configuration.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

/// Errors surfaced by configuration loaders.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read, parsed or merged.
    #[error("failed to load configuration: {source}")]
    Load {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The teardown timeout was zero.
    #[error("invalid teardown timeout of {millis} ms: expected a positive number of milliseconds")]
    InvalidTimeout {
        /// Value as resolved from the layers.
        millis: u64,
    },
}

impl From<Arc<OrthoError>> for ConfigError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Load { source }
    }
}
