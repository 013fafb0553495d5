//! The live set of subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use relay_core::SubscriberId;

use super::connection::Subscriber;
use crate::metrics::SUBSCRIBERS_ACTIVE;

/// Subscribers indexed by id.
///
/// Broadcasts iterate a [`snapshot`](Self::snapshot), so registrations and
/// removals that happen mid-broadcast never touch the set being iterated.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Registering the same id again replaces the entry.
    pub fn register(&self, subscriber: Arc<Subscriber>) {
        let count = {
            let mut subs = self.subscribers.write();
            let _ = subs.insert(subscriber.id.clone(), subscriber);
            subs.len()
        };
        record_count(count);
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let (removed, count) = {
            let mut subs = self.subscribers.write();
            let removed = subs.remove(id).is_some();
            (removed, subs.len())
        };
        if removed {
            record_count(count);
        }
        removed
    }

    /// Copy of the current membership.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().values().cloned().collect()
    }

    /// Whether `id` is registered.
    #[cfg(test)]
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Number of registered subscribers.
    pub fn count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// `true` when nobody is registered.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_count(count: usize) {
    gauge!(SUBSCRIBERS_ACTIVE).set(count as f64);
}
