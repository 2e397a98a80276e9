//! Axum HTTP server for the OpenAI-compatible bridge.
//!
//! This module provides the `serve()` function that runs the bridge
//! on a pre-bound `TcpListener` until the cancellation token fires.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{Method, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use difybridge_core::{AppConfig, ChatRequest, translate};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::blocking::blocking_response;
use crate::error::ProxyError;
use crate::models::ModelsResponse;
use crate::stream::sse_response;
use crate::transport::UpstreamClient;

/// Shared application state for the bridge.
///
/// Cloned per request; holds no mutable state.
#[derive(Clone, Debug)]
pub struct ProxyState {
    /// Reusable client for the upstream API.
    upstream: UpstreamClient,
    /// Static `/models` listing.
    models: Arc<ModelsResponse>,
}

impl ProxyState {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            upstream: UpstreamClient::new(&config.upstream)?,
            models: Arc::new(ModelsResponse::from_config(&config.model)),
        })
    }
}

/// Build CORS layer: any origin, the methods and headers chat clients send.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400))
}

/// OpenAI-compatible routes, mounted both at `/` and under `/v1`.
fn api_routes() -> Router<ProxyState> {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(list_models))
}

/// Build the full router.
///
/// When `static_dir` is set its files are served under `/app`.
pub fn create_router(state: ProxyState, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(api_routes())
        .nest("/v1", api_routes())
        .with_state(state);

    if let Some(dir) = static_dir {
        info!("Serving static assets from: {}", dir.display());
        app = app.nest_service("/app", ServeDir::new(dir));
    }

    app.layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Start the bridge with a pre-bound listener.
///
/// Runs until `cancel` is triggered, then shuts down gracefully.
pub async fn serve(
    listener: TcpListener,
    config: &AppConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let state = ProxyState::new(config)?;

    info!(
        upstream = %state.upstream.url(),
        model = %config.model.id,
        "Bridge configured"
    );

    let app = create_router(state, config.server.static_dir.as_deref());

    info!("Bridge listening on http://{addr}");
    info!("Configure OpenAI clients to use: http://{addr}/v1");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Bridge shut down");
    Ok(())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

/// The configured model in OpenAI list format.
async fn list_models(State(state): State<ProxyState>) -> impl IntoResponse {
    debug!("GET /models");
    Json(state.models.as_ref().clone())
}

/// Translate, forward, and re-encode one chat completion.
async fn chat_completions(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request: ChatRequest =
        serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;

    // Rejected here, before any upstream call.
    let query = translate(&request)?;

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        request_id = %request_id,
        model = %request.model,
        streaming = %request.stream,
        messages = request.messages.len(),
        "Processing chat completion request"
    );

    let upstream = state.upstream.send(&query).await?;

    if query.response_mode.is_streaming() {
        Ok(sse_response(upstream, request.model, request_id))
    } else {
        blocking_response(upstream, &request.model, &request_id).await
    }
}
