//! Scriptable upstream for deterministic tests.
//!
//! [`MockConnector`] records every session it creates. Tests drive a session
//! through its [`MockSessionHandle`] (`emit_connect`, `emit_comment`,
//! `emit_end`) and inspect how often it was started and stopped. Starts
//! and stops across all sessions of one connector are also recorded in order
//! as [`MockCall`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    CommentEvent, ConnectEvent, UpstreamConnector, UpstreamEvent, UpstreamListener,
    UpstreamSession, deliver,
};
use crate::errors::UpstreamError;
use crate::ids::SessionKey;

/// One lifecycle call observed by a [`MockConnector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockCall {
    /// `start()` was called on the session with this key.
    Start(SessionKey),
    /// `stop()` was entered.
    Stopping(SessionKey),
    /// `stop()` ran to completion.
    Stopped(SessionKey),
}

/// How `start()` misbehaves, if at all.
#[derive(Clone, Debug)]
enum StartFault {
    Fail(String),
    Panic(String),
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

/// Connector that hands out [`MockSession`]s.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<MockSessionHandle>>,
    calls: CallLog,
    reject_with: Mutex<Option<String>>,
    start_fault: Mutex<Option<StartFault>>,
    stop_delay: Mutex<Option<Duration>>,
}

impl MockConnector {
    /// Create a connector that accepts every identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse subsequent `create` calls with `reason` (or accept again with `None`).
    pub fn set_rejecting(&self, reason: Option<&str>) {
        *self.reject_with.lock() = reason.map(str::to_owned);
    }

    /// Make `start()` on sessions created from now on fail with `reason`.
    pub fn set_start_failure(&self, reason: Option<&str>) {
        *self.start_fault.lock() = reason.map(|r| StartFault::Fail(r.to_owned()));
    }

    /// Make `start()` on sessions created from now on panic with `message`.
    pub fn set_start_panic(&self, message: Option<&str>) {
        *self.start_fault.lock() = message.map(|m| StartFault::Panic(m.to_owned()));
    }

    /// Make `stop()` on sessions created from now on take `delay`.
    pub fn set_stop_delay(&self, delay: Option<Duration>) {
        *self.stop_delay.lock() = delay;
    }

    /// Every session created so far, oldest first.
    pub fn sessions(&self) -> Vec<MockSessionHandle> {
        self.sessions.lock().clone()
    }

    /// Most recently created session.
    pub fn last(&self) -> Option<MockSessionHandle> {
        self.sessions.lock().last().cloned()
    }

    /// Number of sessions created.
    pub fn created_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Every start and stop so far, in the order they happened.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }
}

impl UpstreamConnector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(
        &self,
        key: SessionKey,
        identifier: &str,
        listener: Arc<dyn UpstreamListener>,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        if let Some(reason) = self.reject_with.lock().clone() {
            return Err(UpstreamError::Rejected {
                identifier: identifier.to_owned(),
                reason,
            });
        }

        let handle = MockSessionHandle {
            shared: Arc::new(MockShared {
                key,
                identifier: identifier.to_owned(),
                listener,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }),
        };
        self.sessions.lock().push(handle.clone());

        Ok(Box::new(MockSession {
            handle,
            calls: Arc::clone(&self.calls),
            start_fault: self.start_fault.lock().clone(),
            stop_delay: *self.stop_delay.lock(),
        }))
    }
}

struct MockShared {
    key: SessionKey,
    identifier: String,
    listener: Arc<dyn UpstreamListener>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Test-side view of a mock session.
#[derive(Clone)]
pub struct MockSessionHandle {
    shared: Arc<MockShared>,
}

impl MockSessionHandle {
    /// Key the session was created with.
    pub fn key(&self) -> SessionKey {
        self.shared.key
    }

    /// Identifier the session was created for.
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// How many times `start()` was called.
    pub fn start_count(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// How many times `stop()` was called.
    pub fn stop_count(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Emit a connect event carrying the session identifier.
    pub async fn emit_connect(&self) {
        let event = ConnectEvent {
            unique_id: self.shared.identifier.clone(),
        };
        self.emit(UpstreamEvent::Connect(event)).await;
    }

    /// Emit a comment event.
    pub async fn emit_comment(&self, user_id: &str, nickname: &str, comment: &str) {
        self.emit(UpstreamEvent::Comment(CommentEvent::new(user_id, nickname, comment)))
            .await;
    }

    /// Emit end-of-session.
    pub async fn emit_end(&self) {
        self.emit(UpstreamEvent::End).await;
    }

    async fn emit(&self, event: UpstreamEvent) {
        let _ = deliver(self.shared.listener.as_ref(), self.shared.key, event).await;
    }
}

/// Session produced by [`MockConnector`]. Does no I/O.
pub struct MockSession {
    handle: MockSessionHandle,
    calls: CallLog,
    start_fault: Option<StartFault>,
    stop_delay: Option<Duration>,
}

impl MockSession {
    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl UpstreamSession for MockSession {
    fn key(&self) -> SessionKey {
        self.handle.shared.key
    }

    fn identifier(&self) -> &str {
        &self.handle.shared.identifier
    }

    fn start(&mut self) -> Result<(), UpstreamError> {
        if self.handle.shared.starts.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(UpstreamError::AlreadyStarted);
        }
        self.record(MockCall::Start(self.handle.shared.key));
        match &self.start_fault {
            Some(StartFault::Fail(reason)) => Err(UpstreamError::StartFailed(reason.clone())),
            Some(StartFault::Panic(message)) => panic!("{message}"),
            None => Ok(()),
        }
    }

    async fn stop(&mut self) -> Result<(), UpstreamError> {
        let key = self.handle.shared.key;
        let _ = self.handle.shared.stops.fetch_add(1, Ordering::SeqCst);
        self.record(MockCall::Stopping(key));
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(MockCall::Stopped(key));
        Ok(())
    }
}
