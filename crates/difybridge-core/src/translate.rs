//! Inbound chat request → upstream query.

use serde_json::Map;

use crate::chat::{ChatRequest, Role};
use crate::error::ValidationError;
use crate::upstream::{ResponseMode, UpstreamQuery};

/// Build the upstream query for a chat request.
///
/// The query is the content of the most recent `user` message; system and
/// assistant turns around it are not forwarded (the bridge is single-turn).
/// Fails without side effects when there is no user message, so callers can
/// reject the request before touching the network.
pub fn translate(req: &ChatRequest) -> Result<UpstreamQuery, ValidationError> {
    let latest = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .ok_or(ValidationError::NoUserMessage)?;

    if latest.content.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    Ok(UpstreamQuery {
        query: latest.content.clone(),
        variables: Map::new(),
        response_mode: ResponseMode::from_stream_flag(req.stream),
        user: req.user.clone(),
        conversation_id: None,
    })
}
