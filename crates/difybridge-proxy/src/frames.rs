//! Event frame parser for the upstream's `data: <json>` stream.
//!
//! Upstream wire format, one frame per line:
//!
//! ```text
//! data: {"event":"message","answer":"Hi","message_id":"m1","created_at":1705395332}
//!
//! event: ping
//!
//! data: {"event":"message_end","message_id":"m1","metadata":{...}}
//! ```
//!
//! Lines are the only unit of buffering. Anything that is not a decodable
//! `data:` frame is logged and skipped; only a failing byte stream ends the
//! sequence abnormally.

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use difybridge_core::UpstreamEvent;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Literal prefix of a protocol frame.
pub const DATA_PREFIX: &str = "data: ";

/// Classification of one upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Empty after trimming; SSE frame separator.
    Blank,
    /// Not a `data: ` frame (`event: ping`, comments, garbage).
    NotData(String),
    /// A `data: ` frame whose payload is not an upstream event.
    Malformed { payload: String, reason: String },
    Event(UpstreamEvent),
}

/// Decode a single line (without its terminating newline).
pub fn decode_line(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() {
        return Frame::Blank;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::NotData(line.to_string());
    };

    match serde_json::from_str::<UpstreamEvent>(payload) {
        Ok(event) => Frame::Event(event),
        Err(e) => Frame::Malformed {
            payload: payload.to_string(),
            reason: e.to_string(),
        },
    }
}

/// The upstream body failed before a clean end-of-input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upstream stream failed: {0}")]
pub struct FrameError(pub String);

struct FrameState<E> {
    stream: BoxStream<'static, Result<Bytes, E>>,
    buf: BytesMut,
    request_id: String,
    eof: bool,
    finished: bool,
}

impl<E> FrameState<E> {
    /// Log and filter one line; `Some` only for a decoded event.
    fn accept(&self, raw: &[u8]) -> Option<UpstreamEvent> {
        let line = String::from_utf8_lossy(raw);
        match decode_line(&line) {
            Frame::Blank => None,
            Frame::NotData(text) => {
                debug!(request_id = %self.request_id, line = %text, "Skipping non-data line");
                None
            }
            Frame::Malformed { payload, reason } => {
                warn!(
                    request_id = %self.request_id,
                    error = %reason,
                    data = %payload,
                    "Skipping malformed upstream frame"
                );
                None
            }
            Frame::Event(event) => {
                trace!(request_id = %self.request_id, raw = %line.trim(), "Upstream frame");
                Some(event)
            }
        }
    }
}

/// Turn an upstream byte stream into a sequence of events.
///
/// - `Some(Ok(event))`: one decoded frame, in upstream order.
/// - `None`: clean end-of-input. A trailing line without `\n` is still decoded first.
/// - `Some(Err(_))`: the byte stream failed; nothing follows.
pub fn event_frames<S, E>(
    byte_stream: S,
    request_id: String,
) -> impl Stream<Item = Result<UpstreamEvent, FrameError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = FrameState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        request_id,
        eof: false,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }

        loop {
            if let Some(line_end) = find_newline(&st.buf) {
                let line = st.buf.split_to(line_end);
                if let Some(event) = st.accept(&line) {
                    return Some((Ok(event), st));
                }
                continue;
            }

            if st.eof {
                st.finished = true;
                return None;
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!(
                        request_id = %st.request_id,
                        error = %e,
                        buffered = st.buf.len(),
                        "Upstream read error"
                    );
                    st.finished = true;
                    return Some((Err(FrameError(e.to_string())), st));
                }
                None => {
                    st.eof = true;
                    if !st.buf.is_empty() {
                        let tail = st.buf.split();
                        if let Some(event) = st.accept(&tail) {
                            return Some((Ok(event), st));
                        }
                    }
                }
            }
        }
    })
}

/// Find the next newline in the buffer, returning the position after it.
fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(
        parts: &'static [&'static str],
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(
        s: impl Stream<Item = Result<UpstreamEvent, FrameError>>,
    ) -> Vec<Result<UpstreamEvent, FrameError>> {
        s.collect().await
    }

    #[test]
    fn test_decode_line_classification() {
        assert_eq!(decode_line("   "), Frame::Blank);
        assert_eq!(
            decode_line("event: ping"),
            Frame::NotData("event: ping".to_string())
        );
        assert!(matches!(
            decode_line("data: {not json"),
            Frame::Malformed { .. }
        ));
        assert!(matches!(
            decode_line("  data: {\"event\":\"message_end\"}\r"),
            Frame::Event(UpstreamEvent::MessageEnd(_))
        ));
    }

    #[test]
    fn test_prefix_requires_space() {
        assert!(matches!(
            decode_line("data:{\"event\":\"message\"}"),
            Frame::NotData(_)
        ));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let events = collect(event_frames(
            chunks(&[
                "data: {\"event\":\"mess",
                "age\",\"answer\":\"Hel\"}\n\nda",
                "ta: {\"event\":\"message\",\"answer\":\"lo\"}\n\n",
            ]),
            "t".to_string(),
        ))
        .await;

        let answers: Vec<String> = events
            .into_iter()
            .map(|e| match e.unwrap() {
                UpstreamEvent::Message(m) => m.answer,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(answers, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_multibyte_utf8_split_across_chunks() {
        let frame = "data: {\"event\":\"message\",\"answer\":\"héllo\"}\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&frame[..split])),
            Ok(Bytes::copy_from_slice(&frame[split..])),
        ];

        let events = collect(event_frames(stream::iter(parts), "t".to_string())).await;
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            UpstreamEvent::Message(m) => assert_eq!(m.answer, "héllo"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_and_bad_json_are_skipped() {
        let events = collect(event_frames(
            chunks(&[
                "garbage\n",
                "data: {bad json}\n",
                "data: {\"event\":\"message\",\"answer\":\"ok\"}\n",
            ]),
            "t".to_string(),
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().tag(), "message");
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_decoded_at_eof() {
        let events = collect(event_frames(
            chunks(&["data: {\"event\":\"message_end\"}"]),
            "t".to_string(),
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().tag(), "message_end");
    }

    #[tokio::test]
    async fn test_empty_body_is_clean_completion() {
        let events = collect(event_frames(chunks(&[]), "t".to_string())).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_ends_sequence() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"event\":\"message\",\"answer\":\"a\"}\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"data: {\"event\":\"message\",\"answer\":\"b\"}\n")),
        ];

        let events = collect(event_frames(stream::iter(parts), "t".to_string())).await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert_eq!(
            events[1].as_ref().unwrap_err(),
            &FrameError("connection reset".to_string())
        );
    }
}
