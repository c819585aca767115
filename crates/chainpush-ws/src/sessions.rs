//! Connected clients and the subscriptions each one holds.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chainpush_codec::Transaction;
use chainpush_core::router::Broadcaster;
use chainpush_core::types::Subscription;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::messages::ServerMessage;

/// Identifies one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Session {
    subscriptions: HashSet<Subscription>,
    /// Serialized messages waiting to be written to the socket.
    outbound: mpsc::UnboundedSender<String>,
}

/// All open sessions. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with no subscriptions.
    pub fn register(&self) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().insert(
            id,
            Session {
                subscriptions: HashSet::new(),
                outbound: tx,
            },
        );
        (id, rx)
    }

    /// Returns `false` if the session is gone.
    pub fn subscribe(&self, id: SessionId, subscription: Subscription) -> bool {
        match self.sessions.lock().unwrap().get_mut(&id) {
            Some(session) => {
                session.subscriptions.insert(subscription);
                true
            }
            None => false,
        }
    }

    /// Drop a subscription from one session only.
    pub fn unsubscribe(&self, id: SessionId, subscription: &Subscription) -> bool {
        match self.sessions.lock().unwrap().get_mut(&id) {
            Some(session) => {
                session.subscriptions.remove(subscription);
                true
            }
            None => false,
        }
    }

    pub fn subscriptions_of(&self, id: SessionId) -> Vec<Subscription> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .map(|s| s.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Close a session. Its subscriptions stay in the router.
    pub fn remove(&self, id: SessionId) {
        self.sessions.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Broadcaster for SessionRegistry {
    fn broadcast(&self, tx: &Transaction, subscription: &Subscription) {
        let sessions = self.sessions.lock().unwrap();
        let mut holders = sessions
            .iter()
            .filter(|(_, s)| s.subscriptions.contains(subscription))
            .peekable();
        if holders.peek().is_none() {
            return;
        }

        let message = match ServerMessage::push(tx).to_json() {
            Ok(m) => m,
            Err(e) => {
                warn!(txid = %tx.txid, error = %e, "failed to encode push");
                return;
            }
        };
        for (id, session) in holders {
            if session.outbound.send(message.clone()).is_err() {
                debug!(session = %id, "session closing, push dropped");
            }
        }
    }
}
