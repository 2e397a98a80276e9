//! Domain error types.
//!
//! Errors here are transport-agnostic. Adapters map them to HTTP status
//! codes (see `difybridge-proxy`) or process exit codes (see `difybridge-cli`).

use std::path::PathBuf;

use thiserror::Error;

/// An inbound chat request that cannot be turned into an upstream query.
///
/// Raised before any network call is made and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No message with role `user` exists in the conversation.
    #[error("no user message found")]
    NoUserMessage,

    /// The most recent user message has no usable content.
    #[error("latest user message is empty")]
    EmptyQuery,
}

/// Failure to load or validate the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to open config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`crate::AppConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A mandatory setting is absent or empty.
    #[error("missing {0} in config")]
    MissingField(&'static str),

    /// A setting is present but unusable.
    #[error("invalid {field} in config: {reason}")]
    Invalid { field: &'static str, reason: String },
}
