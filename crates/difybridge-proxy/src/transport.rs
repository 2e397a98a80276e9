//! Upstream transport: one POST to `<base>/chat-messages`.
//!
//! No retries. A non-200 answer is read to the end and handed back as
//! [`ProxyError::UpstreamStatus`] so the handler can pass it through.

use axum::http::{HeaderValue, StatusCode};
use difybridge_core::{UpstreamConfig, UpstreamQuery};
use reqwest::{Client, header};
use tracing::{debug, warn};

use crate::error::ProxyError;

/// Shared, cheaply cloneable client for the upstream API.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    /// Build the client. The configured timeout covers the whole exchange,
    /// streamed body included.
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            url: config.chat_messages_url(),
            api_key: config.api_key.clone(),
        })
    }

    /// Endpoint this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the query. Returns the live response only for HTTP 200.
    pub async fn send(&self, query: &UpstreamQuery) -> Result<reqwest::Response, ProxyError> {
        debug!(
            url = %self.url,
            response_mode = ?query.response_mode,
            "Forwarding query to upstream"
        );

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(query)
            .send()
            .await
            .map_err(ProxyError::from_send)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) if e.is_timeout() => return Err(ProxyError::from_read(e)),
                Err(e) => {
                    warn!(
                        status = %status.as_u16(),
                        error = %e,
                        "Failed to read upstream error body; passing status through without it"
                    );
                    bytes::Bytes::new()
                }
            };

            return Err(ProxyError::UpstreamStatus {
                status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
                content_type,
                body,
            });
        }

        Ok(response)
    }
}
