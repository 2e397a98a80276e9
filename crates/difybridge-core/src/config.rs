//! Application configuration types and validation.
//!
//! The configuration is loaded once at startup (see `difybridge-cli`) and
//! handed to the proxy by value; nothing reads it from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default listen port for the bridge.
pub const DEFAULT_PORT: u16 = 8080;

/// Default listen address for the bridge.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default wall-clock ceiling for one upstream call, body included.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "app.yaml";

/// Top-level configuration (`app.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(alias = "dify")]
    pub upstream: UpstreamConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
}

/// Where and how to reach the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Bearer credential sent on every upstream call.
    pub api_key: String,
    /// Base URL; `/chat-messages` is appended.
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: String::new(),
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        }
    }
}

impl UpstreamConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the chat endpoint.
    pub fn chat_messages_url(&self) -> String {
        format!("{}/chat-messages", self.api_url.trim_end_matches('/'))
    }
}

/// The single model advertised on `/models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "dify".to_string(),
            object: "model".to_string(),
            created: 0,
            owned_by: "dify".to_string(),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Option<String>,
    /// `None` or `0` means [`DEFAULT_PORT`].
    pub port: Option<u16>,
    /// Directory served under `/app`, if any.
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Get the effective port (with default fallback).
    pub const fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) if port != 0 => port,
            _ => DEFAULT_PORT,
        }
    }

    pub fn effective_host(&self) -> &str {
        self.host
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST)
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.effective_host(), self.effective_port())
    }
}

/// Values that take precedence over the config file (CLI flags / env vars).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl AppConfig {
    /// Parse a YAML document. Does not validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML config file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Apply overrides, only touching fields that are set.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref key) = overrides.api_key {
            self.upstream.api_key.clone_from(key);
        }
        if let Some(ref url) = overrides.api_url {
            self.upstream.api_url.clone_from(url);
        }
        if let Some(ref host) = overrides.host {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
    }

    /// Check that the bridge can start with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("upstream.api_key"));
        }

        let url = self.upstream.api_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingField("upstream.api_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "upstream.api_url",
                reason: format!("expected an http(s) URL, got '{url}'"),
            });
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "upstream.timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.model.id.trim().is_empty() {
            return Err(ConfigError::MissingField("model.id"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FULL: &str = r#"
dify:
  api_key: "app-123"
  api_url: "https://api.dify.ai/v1/"
model:
  id: "dify-chat"
  object: "model"
  created: 1700000000
  owned_by: "acme"
server:
  port: 9090
"#;

    #[test]
    fn test_parse_dify_section_layout() {
        let config = AppConfig::from_yaml_str(FULL).unwrap();

        assert_eq!(config.upstream.api_key, "app-123");
        assert_eq!(
            config.upstream.chat_messages_url(),
            "https://api.dify.ai/v1/chat-messages"
        );
        assert_eq!(config.upstream.timeout(), Duration::from_secs(60));
        assert_eq!(config.model.id, "dify-chat");
        assert_eq!(config.model.created, 1_700_000_000);
        assert_eq!(config.server.effective_port(), 9090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_optional_sections() {
        let config = AppConfig::from_yaml_str(
            "upstream:\n  api_key: k\n  api_url: http://localhost:5001/v1\n",
        )
        .unwrap();

        assert_eq!(config.model, ModelConfig::default());
        assert_eq!(config.server.effective_port(), DEFAULT_PORT);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8080");
        assert!(config.server.static_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_port_means_default() {
        let server = ServerConfig {
            port: Some(0),
            ..ServerConfig::default()
        };
        assert_eq!(server.effective_port(), DEFAULT_PORT);
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let config = AppConfig::from_yaml_str("upstream:\n  api_url: http://x\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("upstream.api_key"))
        ));

        let config = AppConfig::from_yaml_str("upstream:\n  api_key: k\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("upstream.api_url"))
        ));
    }

    #[test]
    fn test_non_http_url_is_invalid() {
        let config =
            AppConfig::from_yaml_str("upstream:\n  api_key: k\n  api_url: ftp://x\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "upstream.api_url",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let config = AppConfig::from_yaml_str(
            "upstream:\n  api_key: k\n  api_url: http://x\n  timeout_secs: 0\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = AppConfig::from_yaml_str(FULL).unwrap();
        config.apply_overrides(&ConfigOverrides {
            api_key: Some("env-key".into()),
            api_url: None,
            host: Some("127.0.0.1".into()),
            port: Some(7000),
        });

        assert_eq!(config.upstream.api_key, "env-key");
        assert_eq!(config.upstream.api_url, "https://api.dify.ai/v1/");
        assert_eq!(config.server.bind_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.model.owned_by, "acme");
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let err = AppConfig::from_yaml_str("upstream: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
