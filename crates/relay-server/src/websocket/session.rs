//! Per-subscriber connection loop, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use relay_core::SubscriberId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::Subscriber;
use super::dispatcher::ControlDispatcher;
use super::registry::SubscriberRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Ping cadence and the silence after which a subscriber is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between server Ping frames.
    pub interval: Duration,
    /// Maximum time without inbound activity.
    pub timeout: Duration,
}

/// Decision taken on each heartbeat tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Beat {
    /// Send another Ping.
    Ping,
    /// The subscriber has been silent too long.
    Expired,
}

impl Heartbeat {
    /// Evaluate `subscriber` at a tick.
    pub fn check(&self, subscriber: &Subscriber) -> Beat {
        if !subscriber.check_alive() && subscriber.last_pong_elapsed() > self.timeout {
            Beat::Expired
        } else {
            Beat::Ping
        }
    }
}

/// Everything a connection loop needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Live subscriber set.
    pub registry: Arc<SubscriberRegistry>,
    /// Control request handler.
    pub dispatcher: ControlDispatcher,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    /// Liveness policy.
    pub heartbeat: Heartbeat,
    /// Outbound queue length.
    pub send_queue_capacity: usize,
}

/// Registry membership tied to the connection's lifetime. Dropping it
/// unregisters, whichever way the loop exits.
struct Membership {
    registry: Arc<SubscriberRegistry>,
    id: SubscriberId,
}

impl Membership {
    fn join(registry: Arc<SubscriberRegistry>, subscriber: Arc<Subscriber>) -> Self {
        let id = subscriber.id.clone();
        registry.register(subscriber);
        Self { registry, id }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.registry.unregister(&self.id) {
            debug!(subscriber_id = %self.id, "unregistered");
        }
    }
}

/// Run one subscriber connection.
///
/// 1. Registers the subscriber
/// 2. Forwards queued relay messages to the socket, pinging on the heartbeat
/// 3. Hands text (and UTF-8 binary) frames to the dispatcher
/// 4. Exits on close, socket error, heartbeat expiry, or shutdown
/// 5. Unregisters
#[instrument(skip_all, fields(subscriber_id = %id))]
pub async fn run_subscriber(ws: WebSocket, id: SubscriberId, ctx: ConnectionContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(ctx.send_queue_capacity);
    let subscriber = Arc::new(Subscriber::new(id, send_tx));
    let membership = Membership::join(Arc::clone(&ctx.registry), Arc::clone(&subscriber));

    info!(subscribers = ctx.registry.count(), "subscriber connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let outbound_sub = Arc::clone(&subscriber);
    let outbound_shutdown = ctx.shutdown.clone();
    let heartbeat = ctx.heartbeat;
    let mut outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat.interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                () = outbound_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if heartbeat.check(&outbound_sub) == Beat::Expired {
                        warn!(timeout = ?heartbeat.timeout, "subscriber unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut outbound_finished = false;
    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            _ = &mut outbound => {
                outbound_finished = true;
                break;
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break;
                    }
                    None => break,
                };
                subscriber.mark_alive();

                let text = match msg {
                    Message::Text(t) => t.as_str().to_owned(),
                    Message::Binary(data) => {
                        if let Ok(s) = std::str::from_utf8(&data) {
                            s.to_owned()
                        } else {
                            debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    }
                    Message::Close(_) => {
                        debug!("subscriber sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let outcome = ctx.dispatcher.dispatch(&subscriber, &text).await;
                debug!(?outcome, "control message handled");
            }
        }
    }

    if !outbound_finished {
        // Lets the writer flush its Close frame.
        if tokio::time::timeout(Duration::from_secs(1), &mut outbound)
            .await
            .is_err()
        {
            outbound.abort();
        }
    }
    drop(membership);

    info!(
        dropped = subscriber.drop_count(),
        subscribers = ctx.registry.count(),
        "subscriber disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(subscriber.age().as_secs_f64());
}
