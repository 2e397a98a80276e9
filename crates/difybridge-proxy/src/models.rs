//! OpenAI API data models for the client-facing side.
//!
//! Domain types live in `difybridge-core`; this module handles the API layer mapping.

use difybridge_core::ModelConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `object` tag of a streaming chunk.
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// `object` tag of a non-streaming completion.
pub const COMPLETION_OBJECT: &str = "chat.completion";

/// Finish reason sent on the terminal chunk / blocking choice.
pub const FINISH_STOP: &str = "stop";

// =============================================================================
// Streaming Types
// =============================================================================

/// Streaming chunk of `/v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// A single streaming choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    /// `null` on content chunks, `"stop"` on the terminal chunk.
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// A chunk carrying one answer fragment.
    pub fn content(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// The terminal chunk: empty delta, `finish_reason: "stop"`.
    pub fn stop(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        usage: Option<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: Some(FINISH_STOP.to_string()),
            }],
            usage,
        }
    }
}

// =============================================================================
// Blocking Types
// =============================================================================

/// Response of `/v1/chat/completions` when `stream` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// A single chat completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The assistant turn of a completed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

// =============================================================================
// Models Endpoint Types
// =============================================================================

/// Response from /v1/models endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelsResponse {
    /// The single configured model as an OpenAI model list.
    pub fn from_config(model: &ModelConfig) -> Self {
        Self {
            object: "list".to_string(),
            data: vec![ModelInfo::from(model)],
        }
    }
}

/// Information about a single model (OpenAI format).
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl From<&ModelConfig> for ModelInfo {
    fn from(model: &ModelConfig) -> Self {
        Self {
            id: model.id.clone(),
            object: model.object.clone(),
            created: model.created,
            owned_by: model.owned_by.clone(),
        }
    }
}

// =============================================================================
// Error Response Types
// =============================================================================

/// Error response matching OpenAI format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail within an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
                code: None,
            },
        }
    }

    /// Create an error response with a code.
    pub fn with_code(
        message: impl Into<String>,
        error_type: impl Into<String>,
        code: impl Into<Value>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.into(),
                code: Some(code.into()),
            },
        }
    }

    /// A request the bridge refuses to forward.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error")
    }

    /// The in-stream frame for an upstream `error` event.
    ///
    /// The upstream's own message is not exposed; `code` carries its status.
    pub fn upstream_event(status: Option<Value>) -> Self {
        Self {
            error: ErrorDetail {
                message: "Upstream API error".to_string(),
                r#type: "api_error".to_string(),
                code: Some(status.unwrap_or(Value::Null)),
            },
        }
    }
}
