//! Parsing of donor replies into response actions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reply parsing errors.
#[derive(Error, Debug)]
pub enum ReplyParseError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Unrecognised reply: {0}")]
    Unrecognised(String),
}

pub type ReplyResult<T> = Result<T, ReplyParseError>;

/// A donor's answer to an outreach notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Accept,
    Decline,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Accept => "accept",
            ResponseAction::Decline => "decline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(ResponseAction::Accept),
            "decline" => Some(ResponseAction::Decline),
            _ => None,
        }
    }
}

/// Structured reply as sent by app clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredReply {
    pub action: ResponseAction,
    #[serde(default)]
    pub note: Option<String>,
}

const ACCEPT_WORDS: &[&str] = &["yes", "y", "accept", "ok", "okay", "sure", "confirm"];
const DECLINE_WORDS: &[&str] = &["no", "n", "decline", "stop", "cannot", "can't"];

/// Parse a reply that is either a JSON object (possibly wrapped in other text) or a
/// short free-text answer such as "YES" or "no thanks".
pub fn parse_reply(text: &str) -> ReplyResult<ResponseAction> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            let reply: StructuredReply = serde_json::from_str(&text[start..=end])?;
            return Ok(reply.action);
        }
    }

    let first_word = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
        .find(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .ok_or_else(|| ReplyParseError::Unrecognised("empty reply".into()))?;

    if ACCEPT_WORDS.contains(&first_word.as_str()) {
        Ok(ResponseAction::Accept)
    } else if DECLINE_WORDS.contains(&first_word.as_str()) {
        Ok(ResponseAction::Decline)
    } else {
        Err(ReplyParseError::Unrecognised(text.trim().to_string()))
    }
}
