//! Error types for upstream sessions and control requests.

use thiserror::Error;

/// Failures of the upstream live-session capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// The connector refused to create a session for the identifier.
    #[error("upstream refused @{identifier}: {reason}")]
    Rejected {
        /// Identifier the session was requested for.
        identifier: String,
        /// Human-readable reason.
        reason: String,
    },
    /// `start()` was called on a session that is already running.
    #[error("upstream session already started")]
    AlreadyStarted,
    /// The session failed while starting.
    #[error("upstream start failed: {0}")]
    StartFailed(String),
    /// The session did not shut down cleanly.
    #[error("upstream stop failed: {0}")]
    StopFailed(String),
}

impl UpstreamError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::AlreadyStarted => "already_started",
            Self::StartFailed(_) => "start_failed",
            Self::StopFailed(_) => "stop_failed",
        }
    }
}

/// Problems with an inbound control request.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The frame was not a JSON object.
    #[error("malformed control message: {0}")]
    Malformed(String),
    /// `connect` arrived without a usable `username`.
    #[error("missing username")]
    MissingUsername,
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_names_identifier() {
        let err = UpstreamError::Rejected {
            identifier: "alice".into(),
            reason: "offline".into(),
        };
        assert_eq!(err.to_string(), "upstream refused @alice: offline");
        assert_eq!(err.error_kind(), "rejected");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(UpstreamError::AlreadyStarted.error_kind(), "already_started");
        assert_eq!(UpstreamError::StartFailed("x".into()).error_kind(), "start_failed");
        assert_eq!(UpstreamError::StopFailed("x".into()).error_kind(), "stop_failed");
    }

    #[test]
    fn json_error_converts_to_malformed() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ControlError = json_err.into();
        assert!(matches!(err, ControlError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed control message"));
    }
}
