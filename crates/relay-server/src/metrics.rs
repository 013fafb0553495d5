//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder globally.
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket subscribers accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "relay_ws_connections_total";
/// WebSocket subscribers gone (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "relay_ws_disconnections_total";
/// Subscriber connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "relay_ws_connection_duration_seconds";
/// Upgrades refused because the subscriber cap was reached (counter).
pub const WS_REJECTED_TOTAL: &str = "relay_ws_rejected_total";
/// Registered subscribers (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "relay_subscribers_active";
/// Broadcast passes with at least one recipient (counter, labels: kind).
pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Messages dropped for a full subscriber queue (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Subscribers pruned after a failed delivery (counter).
pub const SUBSCRIBERS_PRUNED_TOTAL: &str = "relay_subscribers_pruned_total";
/// Control messages handled (counter, labels: action).
pub const CONTROL_MESSAGES_TOTAL: &str = "relay_control_messages_total";
/// Control messages that failed to parse (counter).
pub const CONTROL_MALFORMED_TOTAL: &str = "relay_control_malformed_total";
/// Upstream sessions started (counter).
pub const SESSIONS_STARTED_TOTAL: &str = "relay_sessions_started_total";
/// Upstream sessions stopped (counter, labels: reason).
pub const SESSIONS_STOPPED_TOTAL: &str = "relay_sessions_stopped_total";
/// Upstream sessions that failed to start (counter, labels: error_kind).
pub const SESSION_START_FAILURES_TOTAL: &str = "relay_session_start_failures_total";
/// Upstream stops that hit the timeout (counter).
pub const SESSION_STOP_TIMEOUTS_TOTAL: &str = "relay_session_stop_timeouts_total";
/// Comments relayed (counter).
pub const COMMENTS_RELAYED_TOTAL: &str = "relay_comments_relayed_total";
