//! Shared fixtures for difybridge-proxy integration tests.
//!
//! Provides a scripted mock upstream (`/chat-messages`) bound on an
//! ephemeral port, and helpers to build and drive the bridge router.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use difybridge_core::{AppConfig, ModelConfig, ServerConfig, UpstreamConfig};
use difybridge_proxy::{ProxyState, create_router};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Credential the bridge is configured with in tests.
pub const TEST_API_KEY: &str = "test-key";

/// What the mock upstream answers with.
#[derive(Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
}

impl MockReply {
    pub fn sse(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn json(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: None,
        }
    }
}

/// A request the mock upstream received.
#[derive(Debug, Clone)]
pub struct Received {
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    received: Arc<Mutex<Vec<Received>>>,
}

async fn chat_messages(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state
        .received
        .lock()
        .unwrap()
        .push(Received { authorization, body });

    if let Some(delay) = state.reply.delay {
        tokio::time::sleep(delay).await;
    }

    (
        state.reply.status,
        [(header::CONTENT_TYPE, state.reply.content_type)],
        state.reply.body.clone(),
    )
        .into_response()
}

/// Handle to a running mock upstream.
pub struct MockUpstream {
    /// Base URL to configure as `upstream.api_url`.
    pub api_url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl MockUpstream {
    pub async fn start(reply: MockReply) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/v1/chat-messages", post(chat_messages))
            .with_state(MockState {
                reply,
                received: Arc::clone(&received),
            });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            api_url: format!("http://{addr}/v1"),
            received,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

/// An `http://127.0.0.1:<port>` URL nothing listens on.
pub async fn unused_api_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/v1")
}

pub fn test_config(api_url: &str) -> AppConfig {
    AppConfig {
        upstream: UpstreamConfig {
            api_key: TEST_API_KEY.to_string(),
            api_url: api_url.to_string(),
            timeout_secs: 5,
        },
        model: ModelConfig {
            id: "dify-test".to_string(),
            object: "model".to_string(),
            created: 1_700_000_000,
            owned_by: "tests".to_string(),
        },
        server: ServerConfig::default(),
    }
}

pub fn bridge(config: &AppConfig) -> Router {
    create_router(ProxyState::new(config).unwrap(), None)
}

/// POST a JSON body to the bridge and return status, content type and body.
pub async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, String, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();

    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("not a data frame: {frame:?}"))
                .to_string()
        })
        .collect()
}
