//! Control requests from subscribers.
//!
//! | action       | effect                                              | reply (unicast)                         |
//! |--------------|-----------------------------------------------------|-----------------------------------------|
//! | `connect`    | [`SessionManager::connect`] with the normalized name | `Connecting to @<user>...`              |
//! | `connect` (bad `username`) | nothing                               | `Missing username`                      |
//! | `connect` (upstream refused) | nothing                             | `Failed to connect to @<user>: <why>`   |
//! | `disconnect` | [`SessionManager::disconnect`] if a session is active | none                                    |
//! | other / none | ignored                                              | none                                    |
//!
//! Malformed frames are logged and dropped. Nothing here closes the connection.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use metrics::counter;
use relay_core::upstream::panic_message;
use relay_core::{ControlAction, ControlError, RelayMessage, UpstreamError, parse_control};
use tracing::{debug, error, info, warn};

use super::broadcast::BroadcastRelay;
use super::connection::Subscriber;
use crate::metrics::{CONTROL_MALFORMED_TOTAL, CONTROL_MESSAGES_TOTAL};
use crate::session_manager::{ConnectOutcome, SessionManager};

/// Reply text for a `connect` without a usable username.
pub const MISSING_USERNAME: &str = "Missing username";

/// What a single inbound frame led to.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a JSON object.
    Malformed,
    /// `connect` without a usable username.
    MissingUsername,
    /// `connect` accepted.
    Connect(ConnectOutcome),
    /// `connect` refused by the upstream.
    ConnectFailed(UpstreamError),
    /// `disconnect` stopped the active session.
    Disconnected,
    /// `disconnect` with nothing active.
    NothingToDisconnect,
    /// Unrecognized or missing action.
    Ignored,
    /// Handling panicked; the panic was contained.
    Panicked,
}

/// Turns subscriber frames into session manager calls.
#[derive(Clone)]
pub struct ControlDispatcher {
    manager: SessionManager,
}

impl ControlDispatcher {
    /// Create a dispatcher driving `manager`.
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    fn relay(&self) -> &BroadcastRelay {
        self.manager.relay()
    }

    /// Handle one text frame from `subscriber`. Never panics.
    pub async fn dispatch(&self, subscriber: &Subscriber, text: &str) -> Dispatch {
        match AssertUnwindSafe(self.process(subscriber, text))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!(
                    subscriber_id = %subscriber.id,
                    panic = panic_message(payload.as_ref()),
                    "control message handler panicked"
                );
                Dispatch::Panicked
            }
        }
    }

    async fn process(&self, subscriber: &Subscriber, text: &str) -> Dispatch {
        let action = match parse_control(text) {
            Ok(action) => action,
            Err(ControlError::MissingUsername) => {
                warn!(subscriber_id = %subscriber.id, "connect without username");
                counter!(CONTROL_MESSAGES_TOTAL, "action" => "connect").increment(1);
                let _ = self
                    .relay()
                    .send_to(subscriber, &RelayMessage::status(MISSING_USERNAME));
                return Dispatch::MissingUsername;
            }
            Err(err) => {
                warn!(subscriber_id = %subscriber.id, error = %err, len = text.len(), "ignoring malformed control message");
                counter!(CONTROL_MALFORMED_TOTAL).increment(1);
                return Dispatch::Malformed;
            }
        };
        counter!(CONTROL_MESSAGES_TOTAL, "action" => action.name()).increment(1);

        match action {
            ControlAction::Connect { username } => self.connect(subscriber, &username).await,
            ControlAction::Disconnect => {
                if !self.manager.is_active() {
                    debug!(subscriber_id = %subscriber.id, "disconnect with no active session");
                    return Dispatch::NothingToDisconnect;
                }
                if self.manager.disconnect().await {
                    info!(subscriber_id = %subscriber.id, "upstream disconnected on request");
                    Dispatch::Disconnected
                } else {
                    Dispatch::NothingToDisconnect
                }
            }
            ControlAction::Other(name) => {
                debug!(subscriber_id = %subscriber.id, action = ?name, "ignoring unrecognized action");
                Dispatch::Ignored
            }
        }
    }

    async fn connect(&self, subscriber: &Subscriber, username: &str) -> Dispatch {
        info!(subscriber_id = %subscriber.id, username, "connect requested");
        match self.manager.connect(username).await {
            Ok(outcome) => {
                let _ = self
                    .relay()
                    .send_to(subscriber, &RelayMessage::connecting(username));
                Dispatch::Connect(outcome)
            }
            Err(err) => {
                warn!(subscriber_id = %subscriber.id, username, error = %err, "connect failed");
                let reason = match &err {
                    UpstreamError::Rejected { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                let _ = self.relay().send_to(
                    subscriber,
                    &RelayMessage::connectivity(
                        format!("Failed to connect to @{username}: {reason}"),
                        false,
                    ),
                );
                Dispatch::ConnectFailed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use relay_core::SubscriberId;
    use relay_core::upstream::mock::MockConnector;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::websocket::registry::SubscriberRegistry;

    struct Harness {
        dispatcher: ControlDispatcher,
        manager: SessionManager,
        connector: Arc<MockConnector>,
        a: Arc<Subscriber>,
        a_rx: mpsc::Receiver<Arc<String>>,
        b_rx: mpsc::Receiver<Arc<String>>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SubscriberRegistry::new());
        let relay = Arc::new(BroadcastRelay::new(Arc::clone(&registry)));
        let connector = Arc::new(MockConnector::new());
        let manager = SessionManager::new(connector.clone(), relay, Duration::from_secs(1));

        let (a_tx, a_rx) = mpsc::channel(32);
        let (b_tx, b_rx) = mpsc::channel(32);
        let a = Arc::new(Subscriber::new(SubscriberId::new(), a_tx));
        registry.register(a.clone());
        registry.register(Arc::new(Subscriber::new(SubscriberId::new(), b_tx)));

        Harness {
            dispatcher: ControlDispatcher::new(manager.clone()),
            manager,
            connector,
            a,
            a_rx,
            b_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn connect_acknowledges_sender_only() {
        let mut h = harness();
        let outcome = h
            .dispatcher
            .dispatch(&h.a, r#"{"action":"connect","username":"alice"}"#)
            .await;
        assert_matches!(outcome, Dispatch::Connect(ConnectOutcome::Started(_)));
        assert_eq!(
            drain(&mut h.a_rx),
            vec![json!({"type": "status", "message": "Connecting to @alice..."})]
        );
        assert!(drain(&mut h.b_rx).is_empty());
        assert_eq!(h.manager.active_identifier().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn connect_normalizes_username() {
        let mut h = harness();
        let _ = h
            .dispatcher
            .dispatch(&h.a, r#"{"action":"connect","username":"  @alice "}"#)
            .await;
        assert_eq!(h.connector.last().unwrap().identifier(), "alice");
        assert_eq!(drain(&mut h.a_rx)[0]["message"], "Connecting to @alice...");

        let again = h
            .dispatcher
            .dispatch(&h.a, r#"{"action":"connect","username":"alice"}"#)
            .await;
        assert_matches!(again, Dispatch::Connect(ConnectOutcome::AlreadyActive(_)));
        assert_eq!(h.connector.created_count(), 1);
    }

    #[tokio::test]
    async fn missing_username_is_reported_to_sender() {
        let mut h = harness();
        for frame in [
            r#"{"action":"connect"}"#,
            r#"{"action":"connect","username":""}"#,
            r#"{"action":"connect","username":"  @ "}"#,
            r#"{"action":"connect","username":42}"#,
        ] {
            assert_eq!(h.dispatcher.dispatch(&h.a, frame).await, Dispatch::MissingUsername);
        }
        let replies = drain(&mut h.a_rx);
        assert_eq!(replies.len(), 4);
        assert!(replies.iter().all(|r| *r == json!({"type": "status", "message": "Missing username"})));
        assert!(drain(&mut h.b_rx).is_empty());
        assert_eq!(h.connector.created_count(), 0);
    }

    #[tokio::test]
    async fn refused_connect_reports_failure() {
        let mut h = harness();
        h.connector.set_rejecting(Some("user is offline"));
        let outcome = h
            .dispatcher
            .dispatch(&h.a, r#"{"action":"connect","username":"alice"}"#)
            .await;
        assert_matches!(outcome, Dispatch::ConnectFailed(UpstreamError::Rejected { .. }));
        assert_eq!(
            drain(&mut h.a_rx),
            vec![json!({
                "type": "status",
                "message": "Failed to connect to @alice: user is offline",
                "connected": false
            })]
        );
    }

    #[tokio::test]
    async fn panicking_start_is_reported_and_retryable() {
        let mut h = harness();
        h.connector.set_start_panic(Some("driver exploded"));
        let connect = r#"{"action":"connect","username":"alice"}"#;

        let first = h.dispatcher.dispatch(&h.a, connect).await;
        assert_matches!(first, Dispatch::ConnectFailed(UpstreamError::StartFailed(_)));
        assert!(!h.manager.is_active());
        let reply = drain(&mut h.a_rx);
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0]["connected"], false);

        h.connector.set_start_panic(None);
        let second = h.dispatcher.dispatch(&h.a, connect).await;
        assert_matches!(second, Dispatch::Connect(ConnectOutcome::Started(_)));
        assert_eq!(h.connector.created_count(), 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_quietly() {
        let mut h = harness();
        for frame in ["not json", "[1,2]", "\"connect\"", ""] {
            assert_eq!(h.dispatcher.dispatch(&h.a, frame).await, Dispatch::Malformed);
        }
        assert!(drain(&mut h.a_rx).is_empty());
    }

    #[tokio::test]
    async fn malformed_then_disconnect_still_processed() {
        let h = harness();
        let _ = h
            .dispatcher
            .dispatch(&h.a, r#"{"action":"connect","username":"alice"}"#)
            .await;
        assert_eq!(h.dispatcher.dispatch(&h.a, "not json").await, Dispatch::Malformed);
        assert_eq!(
            h.dispatcher.dispatch(&h.a, r#"{"action":"disconnect"}"#).await,
            Dispatch::Disconnected
        );
        assert!(!h.manager.is_active());
        assert_eq!(h.connector.last().unwrap().stop_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_noop() {
        let mut h = harness();
        assert_eq!(
            h.dispatcher.dispatch(&h.a, r#"{"action":"disconnect"}"#).await,
            Dispatch::NothingToDisconnect
        );
        assert!(drain(&mut h.a_rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let mut h = harness();
        for frame in [r#"{"action":"dance"}"#, r#"{"username":"alice"}"#, "{}"] {
            assert_eq!(h.dispatcher.dispatch(&h.a, frame).await, Dispatch::Ignored);
        }
        assert!(drain(&mut h.a_rx).is_empty());
        assert_eq!(h.connector.created_count(), 0);
    }
}
