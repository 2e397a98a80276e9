//! Streaming re-encoder: upstream events → OpenAI `chat.completion.chunk` SSE.
//!
//! ```text
//! upstream:  data: {"event":"message","answer":"Hi","message_id":"m1",...}
//! client:    data: {"id":"m1","object":"chat.completion.chunk","choices":[{"delta":{"content":"Hi"},...}]}
//!
//! upstream:  data: {"event":"message_end",...}      (or clean EOF)
//! client:    data: {"id":"chatcmpl-...","choices":[{"delta":{},"finish_reason":"stop"}]}
//!            data: [DONE]
//!
//! upstream:  data: {"event":"error","status":429,...}
//! client:    data: {"error":{"message":"Upstream API error","type":"api_error","code":429}}
//! ```
//!
//! Every outbound frame is its own body chunk, so hyper flushes per event.
//! Dropping the body (client went away) drops the upstream byte stream with
//! it, which releases the upstream connection.

use std::collections::VecDeque;
use std::time::Instant;

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use difybridge_core::UpstreamEvent;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::frames::{FrameError, event_frames};
use crate::models::{ChatCompletionChunk, ErrorResponse};

/// Sentinel frame that ends a successful stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Lifecycle of one outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Open,
    Closed(CloseReason),
}

/// Why a stream reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `message_end` or clean EOF; terminal chunk and sentinel were emitted.
    Completed,
    /// Upstream `error` event; one error frame was emitted.
    UpstreamError,
    /// The upstream body failed; nothing was emitted.
    Aborted,
}

impl CloseReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::UpstreamError => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// Per-request state machine turning upstream events into SSE frames.
#[derive(Debug)]
pub struct StreamEncoder {
    model: String,
    request_id: String,
    accumulated: String,
    events: usize,
    state: EncoderState,
}

impl StreamEncoder {
    pub fn new(model: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            request_id: request_id.into(),
            accumulated: String::new(),
            events: 0,
            state: EncoderState::Open,
        }
    }

    pub const fn state(&self) -> EncoderState {
        self.state
    }

    pub const fn is_open(&self) -> bool {
        matches!(self.state, EncoderState::Open)
    }

    /// Every answer fragment seen so far, in arrival order.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Number of upstream events handled.
    pub const fn events(&self) -> usize {
        self.events
    }

    /// Frames to write for one upstream event. Empty once closed.
    pub fn on_event(&mut self, event: UpstreamEvent) -> Vec<Bytes> {
        if !self.is_open() {
            return Vec::new();
        }
        self.events += 1;

        debug!(
            request_id = %self.request_id,
            event = %event.tag(),
            message_id = %event.message_id(),
            "Event received"
        );

        match event {
            UpstreamEvent::Message(msg) => {
                self.accumulated.push_str(&msg.answer);
                let chunk = ChatCompletionChunk::content(
                    msg.message_id,
                    msg.created_at,
                    self.model.as_str(),
                    msg.answer,
                );
                sse_frame(&chunk).into_iter().collect()
            }
            UpstreamEvent::MessageEnd(end) => {
                debug!(
                    request_id = %self.request_id,
                    total_length = self.accumulated.len(),
                    metadata = ?end.metadata,
                    "Message end received"
                );
                self.finish(end.usage().cloned())
            }
            UpstreamEvent::Error(err) => {
                warn!(
                    request_id = %self.request_id,
                    status = ?err.status,
                    code = ?err.code,
                    message = ?err.message,
                    "Upstream error event"
                );
                self.state = EncoderState::Closed(CloseReason::UpstreamError);
                sse_frame(&ErrorResponse::upstream_event(err.status))
                    .into_iter()
                    .collect()
            }
            UpstreamEvent::Other { event } => {
                debug!(request_id = %self.request_id, event = %event, "Ignoring upstream event");
                Vec::new()
            }
        }
    }

    /// Frames to write when the upstream closed cleanly without `message_end`.
    pub fn on_clean_eof(&mut self) -> Vec<Bytes> {
        if !self.is_open() {
            return Vec::new();
        }
        info!(
            request_id = %self.request_id,
            events = self.events,
            content_length = self.accumulated.len(),
            "Received EOF"
        );
        self.finish(None)
    }

    /// The upstream body failed: close without a close-out.
    pub fn on_abort(&mut self, err: &FrameError) {
        if self.is_open() {
            warn!(request_id = %self.request_id, error = %err, "Stream aborted");
            self.state = EncoderState::Closed(CloseReason::Aborted);
        }
    }

    fn finish(&mut self, usage: Option<serde_json::Value>) -> Vec<Bytes> {
        self.state = EncoderState::Closed(CloseReason::Completed);

        let chunk = ChatCompletionChunk::stop(
            format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            chrono::Utc::now().timestamp(),
            self.model.as_str(),
            usage,
        );

        let mut frames: Vec<Bytes> = sse_frame(&chunk).into_iter().collect();
        frames.push(Bytes::from_static(DONE_FRAME.as_bytes()));
        frames
    }
}

/// Serialize one value as an SSE `data:` frame.
fn sse_frame<T: Serialize>(value: &T) -> Option<Bytes> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            warn!("Failed to serialize SSE frame: {e}");
            None
        }
    }
}

/// State threaded through the `unfold` stream.
///
/// Dropping it (normal end or client disconnect) logs the outcome and
/// releases the upstream body.
struct PipelineState {
    events: BoxStream<'static, Result<UpstreamEvent, FrameError>>,
    encoder: StreamEncoder,
    pending: VecDeque<Bytes>,
    start: Instant,
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        let outcome = match self.encoder.state() {
            EncoderState::Closed(reason) if self.pending.is_empty() => reason.as_str(),
            _ => "client_disconnected",
        };
        info!(
            request_id = %self.encoder.request_id,
            duration_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX),
            events = self.encoder.events(),
            content_length = self.encoder.accumulated().len(),
            outcome,
            "Stream request completed"
        );
    }
}

/// Re-encode a sequence of upstream events as outbound SSE bytes.
///
/// Stops pulling from `events` as soon as the encoder closes. An abnormal
/// upstream end surfaces as an `Err` item so the HTTP body is torn down
/// without a terminal chunk.
pub fn encode_events<S>(
    events: S,
    model: String,
    request_id: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<UpstreamEvent, FrameError>> + Send + 'static,
{
    let state = PipelineState {
        events: events.boxed(),
        encoder: StreamEncoder::new(model, request_id),
        pending: VecDeque::new(),
        start: Instant::now(),
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((Ok(frame), st));
            }
            if !st.encoder.is_open() {
                return None;
            }

            match st.events.next().await {
                Some(Ok(event)) => {
                    let frames = st.encoder.on_event(event);
                    st.pending.extend(frames);
                }
                Some(Err(e)) => {
                    st.encoder.on_abort(&e);
                    return Some((Err(std::io::Error::other(e)), st));
                }
                None => {
                    let frames = st.encoder.on_clean_eof();
                    st.pending.extend(frames);
                }
            }
        }
    })
}

/// Translate a live upstream streaming response into an SSE response.
pub fn sse_response(upstream: reqwest::Response, model: String, request_id: String) -> Response {
    info!(request_id = %request_id, model = %model, "Stream request started");

    let events = event_frames(upstream.bytes_stream(), request_id.clone());
    let body = encode_events(events, model, request_id);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no") // Disable nginx buffering
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
