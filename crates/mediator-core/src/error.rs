//! Error types for the mediator.
//!
//! Lookup misses are never errors: they surface as `None` or as a zero
//! count. Only callback failures and configuration problems are reported
//! through [`MediatorError`].

use crate::subscriber::SubscriberId;
use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by subscriber callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Mediator errors.
#[derive(Debug, Error)]
pub enum MediatorError {
    /// A subscriber callback failed while publishing.
    #[error("Subscriber {subscriber} on channel '{channel}' failed: {source}")]
    Callback {
        /// Name of the channel the subscriber is registered on.
        channel: String,
        /// The failing subscriber.
        subscriber: SubscriberId,
        /// Error returned by the callback.
        #[source]
        source: CallbackError,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("Failed to read config file {}: {source}", .path.display())]
    ConfigIo {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse config file {}: {source}", .path.display())]
    ConfigParse {
        /// Path that was parsed, empty for in-memory sources.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

impl MediatorError {
    /// Returns the failing subscriber for callback errors.
    #[must_use]
    pub fn subscriber(&self) -> Option<&SubscriberId> {
        match self {
            Self::Callback { subscriber, .. } => Some(subscriber),
            _ => None,
        }
    }
}
