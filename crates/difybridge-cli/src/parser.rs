//! Command-line flags and config resolution.

use std::path::{Path, PathBuf};

use clap::Parser;
use difybridge_core::{AppConfig, ConfigError, ConfigOverrides, DEFAULT_CONFIG_FILE};

/// OpenAI-compatible bridge for a Dify-style chat-messages API.
///
/// Every flag can also be set through its `DIFYBRIDGE_*` environment
/// variable (a `.env` file in the working directory is honoured).
#[derive(Parser, Debug)]
#[command(name = "difybridge")]
#[command(about = "Serve an OpenAI-compatible chat API backed by a Dify app")]
#[command(version)]
pub struct Cli {
    /// YAML config file [default: app.yaml, optional if absent]
    #[arg(short = 'c', long = "config", env = "DIFYBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "DIFYBRIDGE_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(short = 'p', long, env = "DIFYBRIDGE_PORT")]
    pub port: Option<u16>,

    /// Upstream bearer credential
    #[arg(long = "api-key", env = "DIFYBRIDGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Upstream base URL (`/chat-messages` is appended)
    #[arg(long = "api-url", env = "DIFYBRIDGE_API_URL")]
    pub api_url: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.api_key.clone(),
            api_url: self.api_url.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Default `tracing` directive when `RUST_LOG` is not set.
    pub const fn default_log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Load, override and validate the configuration.
    ///
    /// An explicit `--config` must exist. Without one, `app.yaml` is read
    /// when present and the flags alone are used otherwise.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.config.as_deref() {
            Some(path) => AppConfig::load(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    AppConfig::load(default)?
                } else {
                    AppConfig::default()
                }
            }
        };

        config.apply_overrides(&self.overrides());
        config.validate()?;
        Ok(config)
    }
}
