//! Upstream live-session capability.
//!
//! A session is created by an [`UpstreamConnector`] for one identifier and a
//! [`SessionKey`], started without blocking, and later stopped. While running
//! it reports what happens upstream through an [`UpstreamListener`]: one
//! connect, any number of comments, and at most one end-of-session.
//!
//! Implementations invoke the listener through [`deliver`] so a panicking
//! handler is logged instead of killing the session task.

pub mod mock;
pub mod simulated;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::UpstreamError;
use crate::ids::SessionKey;

/// The upstream session reached the live stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectEvent {
    /// Identifier as resolved by the upstream platform.
    pub unique_id: String,
}

/// A viewer commented on the live stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    /// Commenter's stable identifier.
    pub user_id: String,
    /// Commenter's display name.
    pub nickname: String,
    /// Comment text.
    pub comment: String,
}

impl CommentEvent {
    /// Build a comment event.
    pub fn new(
        user_id: impl Into<String>,
        nickname: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: nickname.into(),
            comment: comment.into(),
        }
    }
}

/// Any notification a session emits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// See [`UpstreamListener::on_connect`].
    Connect(ConnectEvent),
    /// See [`UpstreamListener::on_comment`].
    Comment(CommentEvent),
    /// See [`UpstreamListener::on_end`].
    End,
}

impl UpstreamEvent {
    /// Event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Comment(_) => "comment",
            Self::End => "end",
        }
    }
}

/// Receives a session's notifications. Every call carries the key of the
/// session that produced it.
#[async_trait]
pub trait UpstreamListener: Send + Sync {
    /// The session is live.
    async fn on_connect(&self, key: SessionKey, event: ConnectEvent);
    /// A comment arrived.
    async fn on_comment(&self, key: SessionKey, event: CommentEvent);
    /// The live stream ended. Emitted at most once per session.
    async fn on_end(&self, key: SessionKey);
}

/// One connection to the upstream platform.
#[async_trait]
pub trait UpstreamSession: Send {
    /// Key this session was created with.
    fn key(&self) -> SessionKey;

    /// Identifier being mirrored.
    fn identifier(&self) -> &str;

    /// Begin connecting in the background. Returns before the session is live.
    fn start(&mut self) -> Result<(), UpstreamError>;

    /// Request teardown and wait for the background work to finish.
    async fn stop(&mut self) -> Result<(), UpstreamError>;
}

/// Creates sessions for identifiers.
pub trait UpstreamConnector: Send + Sync {
    /// Connector name for logs.
    fn name(&self) -> &str;

    /// Build a session bound to `key` and `identifier` that reports to `listener`.
    fn create(
        &self,
        key: SessionKey,
        identifier: &str,
        listener: Arc<dyn UpstreamListener>,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError>;
}

/// Invoke the listener method matching `event`.
///
/// A panic inside the handler is caught and logged; returns `false` in that
/// case so the caller can keep going.
pub async fn deliver(listener: &dyn UpstreamListener, key: SessionKey, event: UpstreamEvent) -> bool {
    let name = event.name();
    let call = async move {
        match event {
            UpstreamEvent::Connect(ev) => listener.on_connect(key, ev).await,
            UpstreamEvent::Comment(ev) => listener.on_comment(key, ev).await,
            UpstreamEvent::End => listener.on_end(key).await,
        }
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(()) => true,
        Err(payload) => {
            error!(
                session_key = %key,
                event = name,
                panic = panic_message(payload.as_ref()),
                "upstream event handler panicked"
            );
            false
        }
    }
}

/// Best-effort text from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
