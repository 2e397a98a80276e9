//! CLI error type and exit codes.

use difybridge_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server failed while running.
    #[error("Server error: {0:#}")]
    Server(#[from] anyhow::Error),
}

impl CliError {
    /// Map error to appropriate exit code (see sysexits.h).
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78, // EX_CONFIG
            Self::Bind { .. } => 74, // EX_IOERR
            Self::Server(_) => 1,
        }
    }
}
