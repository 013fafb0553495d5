//! The single active upstream session.
//!
//! [`SessionManager`] owns at most one [`UpstreamSession`] at a time and is
//! the [`UpstreamListener`] every session reports to. Each session gets a
//! fresh [`SessionKey`]; events carrying any other key come from a session
//! that was already replaced or stopped and are dropped.
//!
//! Lifecycle per session: `Connecting → Live → (ended | replaced | disconnected)`.
//! `connect` and `disconnect` are serialized so a replacement always finishes
//! tearing down the old session before the new one is created.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use relay_core::upstream::{
    CommentEvent, ConnectEvent, UpstreamConnector, UpstreamListener, UpstreamSession,
    panic_message,
};
use relay_core::{RelayMessage, SessionKey, UpstreamError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{
    COMMENTS_RELAYED_TOTAL, SESSION_START_FAILURES_TOTAL, SESSION_STOP_TIMEOUTS_TOTAL,
    SESSIONS_STARTED_TOTAL, SESSIONS_STOPPED_TOTAL,
};
use crate::websocket::broadcast::BroadcastRelay;

/// Where the active session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Started, waiting for the upstream connect event.
    Connecting,
    /// Connected and relaying comments.
    Live,
}

/// Point-in-time view of the active session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Identifier being mirrored.
    pub username: String,
    /// Lifecycle state.
    pub state: SessionState,
    /// Comments relayed so far.
    pub comments: u64,
    /// Distinct commenters seen so far.
    pub unique_commenters: usize,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
}

/// Result of a successful [`SessionManager::connect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new session was created and started.
    Started(SessionKey),
    /// The identifier is already the active one; nothing changed.
    AlreadyActive(SessionKey),
}

/// Why a session was torn down.
#[derive(Clone, Copy, Debug)]
enum StopReason {
    Replaced,
    Disconnected,
    Ended,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Replaced => "replaced",
            Self::Disconnected => "disconnected",
            Self::Ended => "ended",
        }
    }
}

struct ActiveSession {
    key: SessionKey,
    identifier: String,
    session: Box<dyn UpstreamSession>,
    state: SessionState,
    started_at: DateTime<Utc>,
    comments: u64,
    commenters: HashSet<String>,
}

impl ActiveSession {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            username: self.identifier.clone(),
            state: self.state,
            comments: self.comments,
            unique_commenters: self.commenters.len(),
            started_at: self.started_at,
        }
    }
}

struct ManagerInner {
    connector: Arc<dyn UpstreamConnector>,
    relay: Arc<BroadcastRelay>,
    active: Mutex<Option<ActiveSession>>,
    transition: tokio::sync::Mutex<()>,
    next_key: AtomicU64,
    stop_timeout: Duration,
}

/// Owns the single active upstream session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager that builds sessions with `connector` and broadcasts
    /// their events through `relay`.
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        relay: Arc<BroadcastRelay>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                relay,
                active: Mutex::new(None),
                transition: tokio::sync::Mutex::new(()),
                next_key: AtomicU64::new(0),
                stop_timeout,
            }),
        }
    }

    /// Mirror `identifier`.
    ///
    /// Same identifier as the active session: no-op. Different identifier:
    /// the old session is stopped first (bounded by the stop timeout; a
    /// failed or slow stop is logged and ignored). Returns once the new
    /// session has been started, not once it is live.
    pub async fn connect(&self, identifier: &str) -> Result<ConnectOutcome, UpstreamError> {
        let _transition = self.inner.transition.lock().await;

        let current = self
            .inner
            .active
            .lock()
            .as_ref()
            .filter(|a| a.identifier == identifier)
            .map(|a| a.key);
        if let Some(key) = current {
            info!(username = identifier, session_key = %key, "already connected, ignoring");
            return Ok(ConnectOutcome::AlreadyActive(key));
        }

        let previous = self.inner.active.lock().take();
        if let Some(previous) = previous {
            self.inner.teardown(previous, StopReason::Replaced).await;
        }

        let key = SessionKey::new(self.inner.next_key.fetch_add(1, Ordering::Relaxed) + 1);
        let listener: Arc<dyn UpstreamListener> = Arc::new(ListenerBridge {
            manager: Arc::downgrade(&self.inner),
        });

        let session = match self.inner.connector.create(key, identifier, listener) {
            Ok(session) => session,
            Err(err) => {
                warn!(username = identifier, connector = self.inner.connector.name(), error = %err, "failed to create upstream session");
                counter!(SESSION_START_FAILURES_TOTAL, "error_kind" => err.error_kind()).increment(1);
                return Err(err);
            }
        };

        // Stored before start so events emitted right away find their key.
        let started = {
            let mut slot = self.inner.active.lock();
            let active = slot.insert(ActiveSession {
                key,
                identifier: identifier.to_owned(),
                session,
                state: SessionState::Connecting,
                started_at: Utc::now(),
                comments: 0,
                commenters: HashSet::new(),
            });
            let session = &mut active.session;
            std::panic::catch_unwind(AssertUnwindSafe(|| session.start())).unwrap_or_else(
                |payload| {
                    Err(UpstreamError::StartFailed(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                },
            )
        };

        if let Err(err) = started {
            let failed = self.inner.active.lock().take();
            drop(failed);
            warn!(username = identifier, session_key = %key, error = %err, "failed to start upstream session");
            counter!(SESSION_START_FAILURES_TOTAL, "error_kind" => err.error_kind()).increment(1);
            return Err(err);
        }

        info!(username = identifier, session_key = %key, connector = self.inner.connector.name(), "upstream session started");
        counter!(SESSIONS_STARTED_TOTAL).increment(1);
        Ok(ConnectOutcome::Started(key))
    }

    /// Stop the active session, if any. Returns `false` when idle.
    pub async fn disconnect(&self) -> bool {
        let _transition = self.inner.transition.lock().await;

        let taken = self.inner.active.lock().take();
        let Some(active) = taken else {
            debug!("disconnect requested with no active session");
            return false;
        };
        self.inner.teardown(active, StopReason::Disconnected).await;
        true
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Identifier of the active session.
    pub fn active_identifier(&self) -> Option<String> {
        self.inner.active.lock().as_ref().map(|a| a.identifier.clone())
    }

    /// Key of the active session.
    pub fn active_key(&self) -> Option<SessionKey> {
        self.inner.active.lock().as_ref().map(|a| a.key)
    }

    /// Snapshot of the active session.
    pub fn status(&self) -> Option<SessionStatus> {
        self.inner.active.lock().as_ref().map(ActiveSession::status)
    }

    /// The relay events are broadcast through.
    pub fn relay(&self) -> &Arc<BroadcastRelay> {
        &self.inner.relay
    }
}

impl ManagerInner {
    async fn teardown(&self, mut active: ActiveSession, reason: StopReason) {
        let key = active.key;
        let username = active.identifier.as_str();

        match tokio::time::timeout(self.stop_timeout, active.session.stop()).await {
            Ok(Ok(())) => {
                info!(username, session_key = %key, reason = reason.as_str(), "upstream session stopped");
            }
            Ok(Err(err)) => {
                warn!(username, session_key = %key, reason = reason.as_str(), error = %err, "upstream session did not stop cleanly");
            }
            Err(_) => {
                warn!(username, session_key = %key, reason = reason.as_str(), timeout = ?self.stop_timeout, "upstream session stop timed out");
                counter!(SESSION_STOP_TIMEOUTS_TOTAL).increment(1);
            }
        }
        counter!(SESSIONS_STOPPED_TOTAL, "reason" => reason.as_str()).increment(1);
    }

    fn handle_connect(&self, key: SessionKey, event: &ConnectEvent) {
        let accepted = {
            let mut slot = self.active.lock();
            match slot.as_mut() {
                Some(active) if active.key == key => {
                    active.state = SessionState::Live;
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            debug!(session_key = %key, "ignoring connect from stale session");
            return;
        }

        info!(username = %event.unique_id, session_key = %key, "upstream session live");
        let _ = self.relay.broadcast(&RelayMessage::connected(&event.unique_id));
    }

    fn handle_comment(&self, key: SessionKey, event: CommentEvent) {
        let accepted = {
            let mut slot = self.active.lock();
            match slot.as_mut() {
                Some(active) if active.key == key => {
                    active.comments += 1;
                    let _ = active.commenters.insert(event.user_id.clone());
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            debug!(session_key = %key, "ignoring comment from stale session");
            return;
        }

        debug!(session_key = %key, user_id = %event.user_id, "relaying comment");
        counter!(COMMENTS_RELAYED_TOTAL).increment(1);
        let _ = self.relay.broadcast(&RelayMessage::comment(
            event.user_id,
            event.nickname,
            event.comment,
        ));
    }

    fn handle_end(self: &Arc<Self>, key: SessionKey) {
        let ended = {
            let mut slot = self.active.lock();
            if slot.as_ref().is_some_and(|a| a.key == key) {
                slot.take()
            } else {
                None
            }
        };
        let Some(ended) = ended else {
            debug!(session_key = %key, "ignoring end from stale session");
            return;
        };

        info!(username = %ended.identifier, session_key = %key, "livestream ended");
        let _ = self.relay.broadcast(&RelayMessage::live_ended());

        // The session is usually reporting from its own task, which `stop`
        // joins, so the teardown runs detached. It still queues behind any
        // connect or disconnect in progress.
        let inner = Arc::clone(self);
        drop(tokio::spawn(async move {
            let _transition = inner.transition.lock().await;
            inner.teardown(ended, StopReason::Ended).await;
        }));
    }
}

/// Listener handed to sessions. Holds the manager weakly so a session never
/// keeps its owner alive.
struct ListenerBridge {
    manager: Weak<ManagerInner>,
}

#[async_trait]
impl UpstreamListener for ListenerBridge {
    async fn on_connect(&self, key: SessionKey, event: ConnectEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_connect(key, &event);
        }
    }

    async fn on_comment(&self, key: SessionKey, event: CommentEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_comment(key, event);
        }
    }

    async fn on_end(&self, key: SessionKey) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_end(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_core::SubscriberId;
    use relay_core::upstream::mock::{MockCall, MockConnector};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::websocket::connection::Subscriber;
    use crate::websocket::registry::SubscriberRegistry;

    struct Harness {
        manager: SessionManager,
        connector: Arc<MockConnector>,
        rx: mpsc::Receiver<Arc<String>>,
    }

    fn harness_with_timeout(stop_timeout: Duration) -> Harness {
        let registry = Arc::new(SubscriberRegistry::new());
        let relay = Arc::new(BroadcastRelay::new(Arc::clone(&registry)));
        let (tx, rx) = mpsc::channel(64);
        registry.register(Arc::new(Subscriber::new(SubscriberId::new(), tx)));

        let connector = Arc::new(MockConnector::new());
        let manager = SessionManager::new(connector.clone(), relay, stop_timeout);
        Harness {
            manager,
            connector,
            rx,
        }
    }

    fn harness() -> Harness {
        harness_with_timeout(Duration::from_secs(5))
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_starts_session_in_connecting_state() {
        let h = harness();
        let outcome = h.manager.connect("alice").await.unwrap();
        assert_matches!(outcome, ConnectOutcome::Started(_));

        let session = h.connector.last().unwrap();
        assert_eq!(session.identifier(), "alice");
        assert_eq!(session.start_count(), 1);

        let status = h.manager.status().unwrap();
        assert_eq!(status.username, "alice");
        assert_eq!(status.state, SessionState::Connecting);
        assert_eq!(h.manager.active_key(), Some(session.key()));
    }

    #[tokio::test]
    async fn same_identifier_is_noop() {
        let h = harness();
        let first = h.manager.connect("alice").await.unwrap();
        let second = h.manager.connect("alice").await.unwrap();

        let ConnectOutcome::Started(key) = first else {
            panic!("expected a new session");
        };
        assert_eq!(second, ConnectOutcome::AlreadyActive(key));
        assert_eq!(h.connector.created_count(), 1);
        assert_eq!(h.connector.last().unwrap().stop_count(), 0);
    }

    #[tokio::test]
    async fn different_identifier_tears_down_old_exactly_once() {
        let h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        let _ = h.manager.connect("carol").await.unwrap();

        let sessions = h.connector.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].stop_count(), 1);
        assert_eq!(sessions[1].stop_count(), 0);
        assert_eq!(sessions[1].start_count(), 1);
        assert!(sessions[1].key() > sessions[0].key());
        assert_eq!(h.manager.active_identifier().as_deref(), Some("carol"));

        let (old, new) = (sessions[0].key(), sessions[1].key());
        assert_eq!(
            h.connector.calls(),
            vec![
                MockCall::Start(old),
                MockCall::Stopping(old),
                MockCall::Stopped(old),
                MockCall::Start(new),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stop_is_bounded_and_replacement_proceeds() {
        let h = harness_with_timeout(Duration::from_millis(100));
        h.connector.set_stop_delay(Some(Duration::from_secs(60)));
        let _ = h.manager.connect("alice").await.unwrap();
        h.connector.set_stop_delay(None);

        let before = tokio::time::Instant::now();
        let outcome = h.manager.connect("carol").await.unwrap();
        assert_matches!(outcome, ConnectOutcome::Started(_));
        assert_eq!(h.manager.active_identifier().as_deref(), Some("carol"));
        assert!(before.elapsed() < Duration::from_secs(1));

        // The old stop was abandoned at the deadline, before the new start.
        let sessions = h.connector.sessions();
        let (old, new) = (sessions[0].key(), sessions[1].key());
        assert_eq!(
            h.connector.calls(),
            vec![MockCall::Start(old), MockCall::Stopping(old), MockCall::Start(new)]
        );
    }

    #[tokio::test]
    async fn rejected_create_leaves_manager_idle() {
        let h = harness();
        h.connector.set_rejecting(Some("user not live"));
        let err = h.manager.connect("alice").await.unwrap_err();
        assert_matches!(err, UpstreamError::Rejected { ref reason, .. } if reason == "user not live");
        assert!(!h.manager.is_active());
    }

    #[tokio::test]
    async fn failed_start_leaves_manager_idle() {
        let h = harness();
        h.connector.set_start_failure(Some("socket reset"));
        let err = h.manager.connect("alice").await.unwrap_err();
        assert_eq!(err, UpstreamError::StartFailed("socket reset".into()));
        assert!(!h.manager.is_active());
    }

    #[tokio::test]
    async fn panicking_start_leaves_manager_idle() {
        let h = harness();
        h.connector.set_start_panic(Some("driver exploded"));
        let err = h.manager.connect("alice").await.unwrap_err();
        assert_matches!(err, UpstreamError::StartFailed(ref reason) if reason.contains("driver exploded"));
        assert!(!h.manager.is_active());
        assert!(h.manager.status().is_none());

        // A retry is a fresh attempt, not a no-op against a dead session.
        h.connector.set_start_panic(None);
        let outcome = h.manager.connect("alice").await.unwrap();
        assert_matches!(outcome, ConnectOutcome::Started(_));
        assert_eq!(h.connector.created_count(), 2);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let h = harness();
        assert!(!h.manager.disconnect().await);
        assert!(!h.manager.is_active());
    }

    #[tokio::test]
    async fn disconnect_stops_and_clears() {
        let h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        assert!(h.manager.disconnect().await);
        assert!(!h.manager.is_active());
        assert_eq!(h.connector.last().unwrap().stop_count(), 1);
    }

    #[tokio::test]
    async fn events_are_broadcast_in_order() {
        let mut h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        let session = h.connector.last().unwrap();

        session.emit_connect().await;
        session.emit_comment("bob1", "Bob", "hi").await;
        session.emit_comment("bob1", "Bob", "again").await;
        session.emit_comment("eve", "Eve", "yo").await;

        let messages = drain(&mut h.rx);
        assert_eq!(
            messages,
            vec![
                json!({"type": "status", "message": "Connected to @alice", "connected": true}),
                json!({"type": "comment", "username": "bob1", "nickname": "Bob", "comment": "hi"}),
                json!({"type": "comment", "username": "bob1", "nickname": "Bob", "comment": "again"}),
                json!({"type": "comment", "username": "eve", "nickname": "Eve", "comment": "yo"}),
            ]
        );

        let status = h.manager.status().unwrap();
        assert_eq!(status.state, SessionState::Live);
        assert_eq!(status.comments, 3);
        assert_eq!(status.unique_commenters, 2);
    }

    #[tokio::test]
    async fn end_broadcasts_and_clears_then_stops() {
        let mut h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        let session = h.connector.last().unwrap();

        session.emit_end().await;
        assert!(!h.manager.is_active());
        assert_eq!(
            drain(&mut h.rx),
            vec![json!({"type": "status", "message": "Livestream ended", "connected": false})]
        );

        settle().await;
        assert_eq!(session.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_end_waits_for_old_stop() {
        let h = harness();
        h.connector.set_stop_delay(Some(Duration::from_secs(1)));
        let _ = h.manager.connect("alice").await.unwrap();
        let ended = h.connector.last().unwrap();
        h.connector.set_stop_delay(None);

        ended.emit_end().await;
        settle().await;
        let _ = h.manager.connect("carol").await.unwrap();

        let (old, new) = (ended.key(), h.connector.last().unwrap().key());
        assert_eq!(
            h.connector.calls(),
            vec![
                MockCall::Start(old),
                MockCall::Stopping(old),
                MockCall::Stopped(old),
                MockCall::Start(new),
            ]
        );
    }

    #[tokio::test]
    async fn stale_session_events_are_ignored() {
        let mut h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        let old = h.connector.last().unwrap();
        let _ = h.manager.connect("carol").await.unwrap();

        old.emit_connect().await;
        old.emit_comment("x", "X", "late").await;
        old.emit_end().await;

        assert!(drain(&mut h.rx).is_empty());
        assert_eq!(h.manager.active_identifier().as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn events_after_disconnect_are_ignored() {
        let mut h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        let session = h.connector.last().unwrap();
        let _ = h.manager.disconnect().await;

        session.emit_comment("x", "X", "late").await;
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn reconnect_after_end_creates_new_session() {
        let h = harness();
        let _ = h.manager.connect("alice").await.unwrap();
        h.connector.last().unwrap().emit_end().await;
        settle().await;

        let outcome = h.manager.connect("alice").await.unwrap();
        assert_matches!(outcome, ConnectOutcome::Started(_));
        assert_eq!(h.connector.created_count(), 2);
    }

    #[test]
    fn status_serializes_lowercase_state() {
        let status = SessionStatus {
            username: "alice".into(),
            state: SessionState::Live,
            comments: 2,
            unique_commenters: 1,
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "live");
        assert_eq!(json["unique_commenters"], 1);
    }
}
