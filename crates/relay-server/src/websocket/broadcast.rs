//! Fan-out of relay messages to every registered subscriber.

use std::sync::Arc;

use metrics::counter;
use relay_core::RelayMessage;
use tracing::{debug, warn};

use super::connection::{DeliveryError, Subscriber};
use super::registry::SubscriberRegistry;
use crate::metrics::{BROADCAST_DROPS_TOTAL, BROADCASTS_TOTAL, SUBSCRIBERS_PRUNED_TOTAL};

/// What happened during one broadcast pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot.
    pub recipients: usize,
    /// Messages queued successfully.
    pub delivered: usize,
    /// Messages dropped for a full queue.
    pub dropped: usize,
    /// Subscribers removed because their channel was closed.
    pub pruned: usize,
}

/// Serializes once and delivers to a registry snapshot.
pub struct BroadcastRelay {
    registry: Arc<SubscriberRegistry>,
}

impl BroadcastRelay {
    /// Create a relay over `registry`.
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this relay delivers to.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Deliver `message` to everyone registered right now.
    ///
    /// Never fails. Subscribers whose channel is closed are removed after the
    /// pass; a full queue only loses this message.
    pub fn broadcast(&self, message: &RelayMessage) -> BroadcastReport {
        let subscribers = self.registry.snapshot();
        if subscribers.is_empty() {
            return BroadcastReport::default();
        }
        let Some(json) = encode(message) else {
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport {
            recipients: subscribers.len(),
            ..BroadcastReport::default()
        };
        let mut failed = Vec::new();

        for subscriber in &subscribers {
            match subscriber.send(Arc::clone(&json)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    report.dropped += 1;
                    warn!(subscriber_id = %subscriber.id, kind = message.kind(), "subscriber queue full, message dropped");
                }
                Err(DeliveryError::Closed) => failed.push(subscriber.id.clone()),
            }
        }

        for id in &failed {
            if self.registry.unregister(id) {
                report.pruned += 1;
                debug!(subscriber_id = %id, "pruned subscriber after failed delivery");
            }
        }

        counter!(BROADCASTS_TOTAL, "kind" => message.kind()).increment(1);
        if report.dropped > 0 {
            counter!(BROADCAST_DROPS_TOTAL).increment(report.dropped as u64);
        }
        if report.pruned > 0 {
            counter!(SUBSCRIBERS_PRUNED_TOTAL).increment(report.pruned as u64);
        }
        debug!(
            kind = message.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "broadcast"
        );
        report
    }

    /// Deliver `message` to one subscriber only.
    pub fn send_to(&self, subscriber: &Subscriber, message: &RelayMessage) -> bool {
        let Some(json) = encode(message) else {
            return false;
        };
        match subscriber.send(json) {
            Ok(()) => true,
            Err(err) => {
                debug!(subscriber_id = %subscriber.id, kind = message.kind(), error = %err, "unicast not delivered");
                false
            }
        }
    }
}

fn encode(message: &RelayMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "failed to serialize relay message");
            None
        }
    }
}
