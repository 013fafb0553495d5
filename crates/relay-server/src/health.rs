//! `/health` endpoint body.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session_manager::SessionStatus;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Registered subscribers.
    pub subscribers: usize,
    /// Active upstream session, or `null`.
    pub session: Option<SessionStatus>,
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    subscribers: usize,
    session: Option<SessionStatus>,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        started_at,
        subscribers,
        session,
    }
}
