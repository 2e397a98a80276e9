//! Blocking re-encoder: one upstream answer → one `chat.completion` object.
//!
//! The upstream body is read exactly once and decoded as a single event.

use axum::{Json, response::IntoResponse, response::Response};
use difybridge_core::UpstreamEvent;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::models::{
    AssistantMessage, COMPLETION_OBJECT, ChatChoice, ChatCompletionResponse, FINISH_STOP,
};

/// Build the aggregated response for a decoded blocking-mode event.
pub fn aggregate(event: UpstreamEvent, model: &str) -> Result<ChatCompletionResponse, ProxyError> {
    match event {
        UpstreamEvent::Message(msg) => {
            let usage = msg.usage().cloned();
            Ok(ChatCompletionResponse {
                id: msg.message_id,
                object: COMPLETION_OBJECT.to_string(),
                created: msg.created_at,
                model: model.to_string(),
                choices: vec![ChatChoice {
                    index: 0,
                    message: AssistantMessage::new(msg.answer),
                    finish_reason: Some(FINISH_STOP.to_string()),
                }],
                usage,
            })
        }
        UpstreamEvent::Error(err) => Err(ProxyError::UpstreamEvent {
            http_status: err.status_code(),
            message: err
                .message
                .unwrap_or_else(|| "upstream error event".to_string()),
            status: err.status,
        }),
        other => Err(ProxyError::UnexpectedEvent(other.tag().to_string())),
    }
}

/// Decode a complete blocking-mode body; anything but an `error` object is the answer.
pub fn decode_body(body: &[u8]) -> Result<UpstreamEvent, ProxyError> {
    UpstreamEvent::from_blocking_body(body).map_err(ProxyError::UpstreamDecode)
}

/// Read the upstream body and answer with a single JSON completion.
pub async fn blocking_response(
    upstream: reqwest::Response,
    model: &str,
    request_id: &str,
) -> Result<Response, ProxyError> {
    let body = upstream.bytes().await.map_err(ProxyError::from_read)?;
    debug!(request_id = %request_id, bytes = body.len(), "Blocking body received");

    let completion = aggregate(decode_body(&body)?, model)?;

    info!(
        request_id = %request_id,
        message_id = %completion.id,
        content_length = completion.choices[0].message.content.len(),
        "Blocking request completed"
    );

    Ok(Json(completion).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_single_message_body() {
        let event = decode_body(
            br#"{"event":"message","message_id":"m1","conversation_id":"c1","answer":"hi","created_at":1705395332}"#,
        )
        .unwrap();
        let completion = aggregate(event, "gpt-x").unwrap();

        assert_eq!(completion.id, "m1");
        assert_eq!(completion.object, "chat.completion");
        assert_eq!(completion.created, 1_705_395_332);
        assert_eq!(completion.model, "gpt-x");
        assert_eq!(completion.choices[0].message.role, "assistant");
        assert_eq!(completion.choices[0].message.content, "hi");
        assert!(completion.usage.is_none());

        let value = serde_json::to_value(&completion).unwrap();
        assert!(value.get("usage").is_none());
    }

    #[test]
    fn test_untagged_body_is_the_answer() {
        let event = decode_body(br#"{"answer":"hi","message_id":"m1"}"#).unwrap();
        let completion = aggregate(event, "gpt-x").unwrap();

        assert_eq!(completion.id, "m1");
        assert_eq!(completion.choices[0].message.content, "hi");
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_usage_is_copied() {
        let event = decode_body(
            br#"{"event":"message","message_id":"m1","answer":"hi","metadata":{"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}}"#,
        )
        .unwrap();
        let completion = aggregate(event, "gpt-x").unwrap();

        assert_eq!(
            completion.usage,
            Some(json!({"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}))
        );
    }

    #[test]
    fn test_invalid_body_is_decode_error() {
        let err = decode_body(b"data: {\"event\":\"message\"}").unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamDecode(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_event_becomes_error_response() {
        let event =
            decode_body(br#"{"event":"error","status":400,"code":"invalid_param","message":"bad"}"#)
                .unwrap();
        let err = aggregate(event, "gpt-x").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_other_event_is_unexpected() {
        let err = aggregate(UpstreamEvent::Other { event: "ping".into() }, "gpt-x").unwrap_err();
        assert!(matches!(err, ProxyError::UnexpectedEvent(ref tag) if tag == "ping"));
    }
}
