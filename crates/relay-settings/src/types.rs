//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may contain any subset of fields; missing ones take their default.
//!
//! ```json
//! {
//!   "server": { "port": 9000 },
//!   "session": { "stopTimeoutMs": 2000 },
//!   "logging": { "format": "json" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and per-subscriber limits.
    pub server: ServerSettings,
    /// Upstream session lifecycle.
    pub session: SessionSettings,
    /// Which upstream implementation to use.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_connections == 0 {
            return Err(SettingsError::invalid("server.maxConnections", "must be at least 1"));
        }
        if server.send_queue_capacity == 0 {
            return Err(SettingsError::invalid("server.sendQueueCapacity", "must be at least 1"));
        }
        if server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::invalid("server.heartbeatIntervalSecs", "must be at least 1"));
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            return Err(SettingsError::invalid(
                "server.heartbeatTimeoutSecs",
                "must not be shorter than the interval",
            ));
        }
        if self.upstream.simulated.comment_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "upstream.simulated.commentIntervalMs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent subscribers.
    pub max_connections: usize,
    /// Outbound queue length per subscriber.
    pub send_queue_capacity: usize,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a Pong before a subscriber is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            max_connections: 256,
            send_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

/// Upstream session lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long to wait for a replaced or disconnected session to stop.
    pub stop_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
        }
    }
}

/// Available upstream implementations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    /// Built-in demo feed.
    #[default]
    Simulated,
}

impl UpstreamKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
        }
    }
}

/// Upstream selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Which implementation to use.
    pub kind: UpstreamKind,
    /// Simulated feed timing.
    pub simulated: SimulatedSettings,
}

/// Simulated feed timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatedSettings {
    /// Delay before the feed reports connected.
    pub connect_delay_ms: u64,
    /// Delay between comments.
    pub comment_interval_ms: u64,
    /// End the live after this many comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_limit: Option<u32>,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            connect_delay_ms: 500,
            comment_interval_ms: 2_000,
            comment_limit: None,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}
