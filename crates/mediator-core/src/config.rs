//! Mediator configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MEDIATOR_*)
//! - TOML configuration file

use crate::channel::DEFAULT_DELIMITER;
use crate::error::MediatorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How a publish reacts to a failing subscriber callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure and return it to the publisher.
    #[default]
    FailFast,
    /// Log the failure and keep delivering to the remaining subscribers.
    Isolate,
}

impl FromStr for FailurePolicy {
    type Err = MediatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Ok(Self::FailFast),
            "isolate" => Ok(Self::Isolate),
            other => Err(MediatorError::Config(format!(
                "Unknown failure policy: {other}"
            ))),
        }
    }
}

/// Mediator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorConfig {
    /// Namespace segment delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Failure handling during publish.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

/// Environment variable overriding the delimiter in [`MediatorConfig::load`].
pub const ENV_DELIMITER: &str = "MEDIATOR_DELIMITER";

/// Environment variable overriding the failure policy in [`MediatorConfig::load`].
pub const ENV_FAILURE_POLICY: &str = "MEDIATOR_FAILURE_POLICY";

// Default value functions
fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::FailFast
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            failure_policy: default_failure_policy(),
        }
    }
}

impl MediatorConfig {
    /// Load configuration from file or defaults, then apply `MEDIATOR_*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// an override is malformed or fails validation.
    pub fn load() -> Result<Self, MediatorError> {
        let config_paths = [
            "mediator.toml",
            "/etc/mediator/mediator.toml",
            "~/.config/mediator/mediator.toml",
        ];

        let mut config = None;
        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                config = Some(Self::from_file(expanded.as_ref())?);
                break;
            }
        }

        config.unwrap_or_default().with_overrides(
            std::env::var(ENV_DELIMITER).ok().as_deref(),
            std::env::var(ENV_FAILURE_POLICY).ok().as_deref(),
        )
    }

    /// Apply override values on top of this configuration and validate the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`MediatorError::Config`] if the delimiter is not a single
    /// character, the policy is unknown, or validation fails.
    pub fn with_overrides(
        mut self,
        delimiter: Option<&str>,
        failure_policy: Option<&str>,
    ) -> Result<Self, MediatorError> {
        if let Some(raw) = delimiter {
            self.delimiter = raw.parse().map_err(|_| {
                MediatorError::Config(format!(
                    "{ENV_DELIMITER} must be a single character, got {raw:?}"
                ))
            })?;
        }
        if let Some(raw) = failure_policy {
            self.failure_policy = raw.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MediatorError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| MediatorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;

        let config: MediatorConfig =
            toml::from_str(&contents).map_err(|source| MediatorError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, MediatorError> {
        let config: MediatorConfig =
            toml::from_str(contents).map_err(|source| MediatorError::ConfigParse {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`MediatorError::Config`] if the delimiter is whitespace or a
    /// control character.
    pub fn validate(&self) -> Result<(), MediatorError> {
        if self.delimiter.is_whitespace() || self.delimiter.is_control() {
            return Err(MediatorError::Config(format!(
                "Delimiter {:?} cannot be whitespace or a control character",
                self.delimiter
            )));
        }
        Ok(())
    }

    /// Set the delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
