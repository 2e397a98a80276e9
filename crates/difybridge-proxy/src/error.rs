//! Proxy error type and its HTTP mapping.
//!
//! Every failure that happens before a stream is opened ends up here and is
//! rendered as an OpenAI-shaped error body. Failures after the stream is open
//! are handled in-band by [`crate::stream`].

use axum::{
    Json,
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use difybridge_core::ValidationError;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request body is not a valid chat request.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The request parsed but cannot be translated.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Connection refused, DNS failure, TLS failure, ...
    #[error("failed to connect to upstream: {0}")]
    UpstreamConnect(#[source] reqwest::Error),

    /// The upstream exceeded the configured wall-clock budget.
    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(#[source] reqwest::Error),

    /// The upstream answered with a non-200 status; passed through as-is.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    /// The upstream body could not be read to the end.
    #[error("failed to read upstream response: {0}")]
    UpstreamRead(#[source] reqwest::Error),

    /// A blocking-mode body was not a single upstream event.
    #[error("failed to parse upstream response: {0}")]
    UpstreamDecode(#[source] serde_json::Error),

    /// A blocking-mode body was an upstream `error` event.
    #[error("upstream reported an error: {message}")]
    UpstreamEvent {
        status: Option<Value>,
        http_status: Option<u16>,
        message: String,
    },

    /// A blocking-mode body carried an event the bridge cannot answer with.
    #[error("unexpected upstream event '{0}'")]
    UnexpectedEvent(String),
}

impl ProxyError {
    /// Classify a failure of `send()`.
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(err)
        } else {
            Self::UpstreamConnect(err)
        }
    }

    /// Classify a failure while reading the upstream body.
    pub fn from_read(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(err)
        } else {
            Self::UpstreamRead(err)
        }
    }

    /// HTTP status the client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamConnect(_) | Self::UpstreamRead(_) | Self::UnexpectedEvent(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus { status, .. } => *status,
            Self::UpstreamDecode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamEvent { http_status, .. } => http_status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            Self::InvalidBody(_) | Self::Validation(_) => {
                ErrorResponse::invalid_request(self.to_string())
            }
            Self::UpstreamConnect(_) => ErrorResponse::with_code(
                "Failed to connect to upstream API",
                "server_error",
                "upstream_error",
            ),
            Self::UpstreamTimeout(_) => ErrorResponse::with_code(
                "Upstream API timed out",
                "server_error",
                "upstream_timeout",
            ),
            Self::UpstreamRead(_) => ErrorResponse::with_code(
                "Failed to read upstream response",
                "server_error",
                "upstream_error",
            ),
            Self::UpstreamDecode(_) => ErrorResponse::with_code(
                "Failed to parse upstream response",
                "server_error",
                "upstream_parse_error",
            ),
            Self::UpstreamEvent { status, .. } => ErrorResponse::upstream_event(status.clone()),
            Self::UnexpectedEvent(_) => ErrorResponse::with_code(
                self.to_string(),
                "server_error",
                "upstream_unexpected_event",
            ),
            // Rendered verbatim in `into_response`.
            Self::UpstreamStatus { .. } => ErrorResponse::new(self.to_string(), "api_error"),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(status = %status.as_u16(), "{self}");
        }

        match self {
            Self::UpstreamStatus {
                status,
                content_type,
                body,
            } => Response::builder()
                .status(status)
                .header(
                    header::CONTENT_TYPE,
                    content_type.unwrap_or_else(|| HeaderValue::from_static("application/json")),
                )
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            other => (status, Json(other.body())).into_response(),
        }
    }
}
