#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]

pub mod chat;
pub mod config;
pub mod error;
pub mod translate;
pub mod upstream;

// Re-export commonly used types for convenience
pub use chat::{ChatMessage, ChatRequest, Role};
pub use config::{
    AppConfig, ConfigOverrides, DEFAULT_CONFIG_FILE, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_UPSTREAM_TIMEOUT_SECS, ModelConfig, ServerConfig, UpstreamConfig,
};
pub use error::{ConfigError, ValidationError};
pub use translate::translate;
pub use upstream::{
    ErrorEvent, MessageEndEvent, MessageEvent, ResponseMode, UpstreamEvent, UpstreamQuery,
};
