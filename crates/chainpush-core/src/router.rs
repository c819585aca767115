//! Matches transaction outputs against subscriptions and fans out notifications.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chainpush_codec::Transaction;
use tracing::{debug, info};

use crate::error::PushError;
use crate::persist::PersistWrite;
use crate::pipeline::WorkQueue;
use crate::types::Subscription;

/// Delivers a matched transaction to whoever holds `subscription`.
///
/// Implementations must not block; the caller is a queue worker.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, tx: &Transaction, subscription: &Subscription);
}

/// Broadcaster that drops everything. Used by one-shot commands.
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast(&self, _tx: &Transaction, _subscription: &Subscription) {}
}

/// The global, deduplicated subscription set and its matching logic.
pub struct SubscriptionRouter {
    subscriptions: RwLock<HashSet<Subscription>>,
    broadcaster: Arc<dyn Broadcaster>,
    persist: WorkQueue<PersistWrite>,
}

impl SubscriptionRouter {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, persist: WorkQueue<PersistWrite>) -> Self {
        Self {
            subscriptions: RwLock::new(HashSet::new()),
            broadcaster,
            persist,
        }
    }

    /// Seed the set from storage at startup. Nothing is persisted.
    pub fn load(&self, subscriptions: impl IntoIterator<Item = Subscription>) {
        let mut set = self.subscriptions.write().unwrap();
        set.extend(subscriptions);
        info!(count = set.len(), "subscriptions loaded");
    }

    /// Add a subscription and queue it for persistence.
    ///
    /// Returns `true` if it was not already in the set. The persistence write
    /// is queued either way; the store treats duplicates as no-ops.
    pub fn subscribe(&self, subscription: Subscription) -> Result<bool, PushError> {
        let added = self
            .subscriptions
            .write()
            .unwrap()
            .insert(subscription.clone());
        if added {
            debug!(kind = %subscription.kind, target = %subscription.target, "subscription added");
        }
        self.persist.enqueue(PersistWrite::Subscription(subscription))?;
        Ok(added)
    }

    /// Snapshot of the current set.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every output against every subscription.
    ///
    /// Each (output, subscription) match triggers one broadcast and one
    /// persistence write. Returns the number of matches.
    pub fn route(&self, tx: &Transaction) -> Result<usize, PushError> {
        let matched: Vec<Subscription> = {
            let set = self.subscriptions.read().unwrap();
            tx.outputs
                .iter()
                .flat_map(|output| set.iter().filter(move |sub| sub.matches(output)))
                .cloned()
                .collect()
        };

        for sub in &matched {
            debug!(txid = %tx.txid, kind = %sub.kind, target = %sub.target, "subscription matched");
            self.broadcaster.broadcast(tx, sub);
            self.persist.enqueue(PersistWrite::Transaction(tx.clone()))?;
        }
        Ok(matched.len())
    }
}
