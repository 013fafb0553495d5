//! Wire messages exchanged with subscribers.
//!
//! Outbound (relay → subscriber) messages are [`RelayMessage`], tagged by
//! `type`. Inbound control requests are small JSON objects keyed by
//! `action`; [`parse_control`] turns a raw text frame into a
//! [`ControlAction`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ControlError;

/// Message fanned out to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Human-readable status, optionally carrying upstream connectivity.
    Status {
        /// Text shown to the viewer.
        message: String,
        /// Whether the upstream session is live. Omitted for plain acknowledgements.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connected: Option<bool>,
    },
    /// One comment from the live stream.
    Comment {
        /// Stable user identifier on the upstream platform.
        username: String,
        /// Display name.
        nickname: String,
        /// Comment text.
        comment: String,
    },
}

impl RelayMessage {
    /// Status message without connectivity information.
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            connected: None,
        }
    }

    /// Status message reporting upstream connectivity.
    pub fn connectivity(message: impl Into<String>, connected: bool) -> Self {
        Self::Status {
            message: message.into(),
            connected: Some(connected),
        }
    }

    /// Comment message.
    pub fn comment(
        username: impl Into<String>,
        nickname: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self::Comment {
            username: username.into(),
            nickname: nickname.into(),
            comment: comment.into(),
        }
    }

    /// The `type` tag, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Comment { .. } => "comment",
        }
    }

    /// Acknowledgement sent to the requester of a `connect`.
    pub fn connecting(username: &str) -> Self {
        Self::status(format!("Connecting to @{username}..."))
    }

    /// Broadcast once the upstream session is live.
    pub fn connected(username: &str) -> Self {
        Self::connectivity(format!("Connected to @{username}"), true)
    }

    /// Broadcast when the upstream live ends.
    pub fn live_ended() -> Self {
        Self::connectivity("Livestream ended", false)
    }
}

/// Decoded control request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlAction {
    /// Mirror the given (normalized, non-empty) username.
    Connect {
        /// Target identifier.
        username: String,
    },
    /// Stop mirroring.
    Disconnect,
    /// Any other `action` value, or none. Ignored by the relay.
    Other(Option<String>),
}

impl ControlAction {
    /// Short action name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Other(_) => "other",
        }
    }
}

/// Parse a raw text frame into a control action.
///
/// Non-JSON input and JSON that is not an object are [`ControlError::Malformed`].
/// A `connect` without a non-empty string `username` is
/// [`ControlError::MissingUsername`]. Unknown actions parse successfully as
/// [`ControlAction::Other`].
pub fn parse_control(text: &str) -> Result<ControlAction, ControlError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(obj) = value else {
        return Err(ControlError::Malformed("expected a JSON object".into()));
    };

    match obj.get("action").and_then(Value::as_str) {
        Some("connect") => obj
            .get("username")
            .and_then(Value::as_str)
            .map(normalize_username)
            .filter(|u| !u.is_empty())
            .map(|username| ControlAction::Connect { username })
            .ok_or(ControlError::MissingUsername),
        Some("disconnect") => Ok(ControlAction::Disconnect),
        other => Ok(ControlAction::Other(other.map(str::to_owned))),
    }
}

/// Trim whitespace and a single leading `@` from a username.
pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).trim().to_owned()
}
