//! Simulated live feed.
//!
//! Connects after a short delay, then emits a rotating set of viewer
//! comments on a fixed interval. With a comment limit configured the live
//! ends after that many comments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    CommentEvent, ConnectEvent, UpstreamConnector, UpstreamEvent, UpstreamListener,
    UpstreamSession, deliver,
};
use crate::errors::UpstreamError;
use crate::ids::SessionKey;

const VIEWERS: &[(&str, &str, &str)] = &[
    ("mia.codes", "Mia", "hello from the chat!"),
    ("dev_raj", "Raj", "what editor is that?"),
    ("lucas_42", "Lucas", "first time here, loving it"),
    ("yuki.tan", "Yuki", "can you zoom in a bit?"),
    ("sam_ok", "Sam", "gg"),
];

/// Timing of the simulated feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedConfig {
    /// Delay before the connect event.
    pub connect_delay: Duration,
    /// Delay between comments.
    pub comment_interval: Duration,
    /// End the live after this many comments. `None` runs until stopped.
    pub comment_limit: Option<u32>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_millis(500),
            comment_interval: Duration::from_secs(2),
            comment_limit: None,
        }
    }
}

/// Connector producing [`SimulatedSession`]s.
#[derive(Clone, Debug, Default)]
pub struct SimulatedConnector {
    config: SimulatedConfig,
}

impl SimulatedConnector {
    /// Create a connector with the given timing.
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }
}

impl UpstreamConnector for SimulatedConnector {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create(
        &self,
        key: SessionKey,
        identifier: &str,
        listener: Arc<dyn UpstreamListener>,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        Ok(Box::new(SimulatedSession {
            key,
            identifier: identifier.to_owned(),
            listener,
            config: self.config.clone(),
            cancel: CancellationToken::new(),
            task: None,
        }))
    }
}

/// A running simulated feed.
pub struct SimulatedSession {
    key: SessionKey,
    identifier: String,
    listener: Arc<dyn UpstreamListener>,
    config: SimulatedConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl UpstreamSession for SimulatedSession {
    fn key(&self) -> SessionKey {
        self.key
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn start(&mut self) -> Result<(), UpstreamError> {
        if self.task.is_some() {
            return Err(UpstreamError::AlreadyStarted);
        }
        info!(session_key = %self.key, username = %self.identifier, "starting simulated feed");
        self.task = Some(tokio::spawn(run_feed(
            self.key,
            self.identifier.clone(),
            Arc::clone(&self.listener),
            self.config.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), UpstreamError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| UpstreamError::StopFailed(e.to_string()))?;
        }
        debug!(session_key = %self.key, "simulated feed stopped");
        Ok(())
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_feed(
    key: SessionKey,
    identifier: String,
    listener: Arc<dyn UpstreamListener>,
    config: SimulatedConfig,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(config.connect_delay) => {}
    }
    let _ = deliver(
        listener.as_ref(),
        key,
        UpstreamEvent::Connect(ConnectEvent { unique_id: identifier }),
    )
    .await;

    let mut ticker = tokio::time::interval(config.comment_interval);
    let _ = ticker.tick().await;
    let mut sent: u32 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if config.comment_limit.is_some_and(|limit| sent >= limit) {
            let _ = deliver(listener.as_ref(), key, UpstreamEvent::End).await;
            return;
        }

        let (user, nick, text) = VIEWERS[sent as usize % VIEWERS.len()];
        let _ = deliver(
            listener.as_ref(),
            key,
            UpstreamEvent::Comment(CommentEvent::new(user, nick, text)),
        )
        .await;
        sent += 1;
    }
}
