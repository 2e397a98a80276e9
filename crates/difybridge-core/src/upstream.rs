//! Upstream (`chat-messages`) request and event types.
//!
//! The upstream streams `data: <json>` frames whose JSON carries an `event`
//! discriminator. Only `message`, `message_end` and `error` have meaning to
//! the bridge; everything else decodes to [`UpstreamEvent::Other`] so the
//! caller has to decide, at compile time, what to do with it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the upstream should deliver its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// One JSON object with the complete answer.
    Blocking,
    /// A `data: <json>` event stream.
    Streaming,
}

impl ResponseMode {
    pub const fn from_stream_flag(stream: bool) -> Self {
        if stream { Self::Streaming } else { Self::Blocking }
    }

    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

/// Body of `POST <base>/chat-messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamQuery {
    /// Content of the latest user message.
    pub query: String,
    /// App variables. Always empty: the bridge has no templating.
    #[serde(rename = "inputs")]
    pub variables: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
    /// Never set by the bridge; every request starts a new conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEvent")]
pub enum UpstreamEvent {
    /// An answer fragment (streaming) or the full answer (blocking).
    Message(MessageEvent),
    /// The answer is complete.
    MessageEnd(MessageEndEvent),
    /// The upstream failed mid-answer.
    Error(ErrorEvent),
    /// Any other tag (`ping`, `workflow_started`, `agent_thought`, ...).
    Other { event: String },
}

impl UpstreamEvent {
    /// The wire tag of this event.
    pub fn tag(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::MessageEnd(_) => "message_end",
            Self::Error(_) => "error",
            Self::Other { event } => event,
        }
    }

    /// Decode a complete blocking-mode body.
    ///
    /// The body is a single object. Only an `error` tag keeps its meaning;
    /// any other object, tagged or not, is read as the full answer.
    pub fn from_blocking_body(body: &[u8]) -> serde_json::Result<Self> {
        let raw: RawEvent = serde_json::from_slice(body)?;
        if raw.event == "error" {
            Ok(Self::from(raw))
        } else {
            Ok(Self::Message(raw.into_message()))
        }
    }

    /// Message id carried by the event, empty when the upstream omitted it.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.message_id,
            Self::MessageEnd(m) => &m.message_id,
            Self::Error(e) => &e.message_id,
            Self::Other { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEvent {
    pub task_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub answer: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub metadata: Map<String, Value>,
}

impl MessageEvent {
    /// `metadata.usage`, if the upstream reported token usage.
    pub fn usage(&self) -> Option<&Value> {
        usage_of(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEndEvent {
    pub task_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub metadata: Map<String, Value>,
}

impl MessageEndEvent {
    pub fn usage(&self) -> Option<&Value> {
        usage_of(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorEvent {
    pub task_id: String,
    pub message_id: String,
    /// HTTP-style status reported by the upstream (`metadata.status`, else top-level `status`).
    pub status: Option<Value>,
    pub code: Option<Value>,
    pub message: Option<String>,
}

impl ErrorEvent {
    /// Status as an HTTP code, when the upstream sent a usable number.
    pub fn status_code(&self) -> Option<u16> {
        let status = self.status.as_ref()?;
        status
            .as_u64()
            .or_else(|| status.as_str().and_then(|s| s.parse().ok()))
            .and_then(|n| u16::try_from(n).ok())
    }
}

fn usage_of(metadata: &Map<String, Value>) -> Option<&Value> {
    metadata.get("usage").filter(|usage| !usage.is_null())
}

/// Flat wire shape; every field optional so one missing key never rejects a frame.
#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
}

impl RawEvent {
    /// Read the frame as an answer, whatever its tag.
    fn into_message(self) -> MessageEvent {
        MessageEvent {
            task_id: self.task_id.unwrap_or_default(),
            message_id: self.message_id.unwrap_or_default(),
            conversation_id: self.conversation_id.unwrap_or_default(),
            answer: self.answer.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

impl From<RawEvent> for UpstreamEvent {
    fn from(raw: RawEvent) -> Self {
        match raw.event.as_str() {
            "message" => Self::Message(raw.into_message()),
            "message_end" => Self::MessageEnd(MessageEndEvent {
                task_id: raw.task_id.unwrap_or_default(),
                message_id: raw.message_id.unwrap_or_default(),
                conversation_id: raw.conversation_id.unwrap_or_default(),
                metadata: raw.metadata.unwrap_or_default(),
            }),
            "error" => {
                let metadata = raw.metadata.unwrap_or_default();
                Self::Error(ErrorEvent {
                    task_id: raw.task_id.unwrap_or_default(),
                    message_id: raw.message_id.unwrap_or_default(),
                    status: metadata.get("status").cloned().or(raw.status),
                    code: metadata.get("code").cloned().or(raw.code),
                    message: metadata
                        .get("message")
                        .cloned()
                        .or(raw.message)
                        .map(|m| match m {
                            Value::String(s) => s,
                            other => other.to_string(),
                        }),
                })
            }
            _ => Self::Other { event: raw.event },
        }
    }
}
