//! The persistence worker: the only writer of the chain store.

use std::sync::Arc;

use async_trait::async_trait;
use chainpush_codec::{Block, Transaction};
use tracing::{debug, error, warn};

use crate::error::PushError;
use crate::pipeline::WorkHandler;
use crate::router::SubscriptionRouter;
use crate::store::ChainStore;
use crate::tracker::{ChainStateTracker, IngestOutcome};
use crate::types::Subscription;

/// A write for the persistence queue.
#[derive(Debug, Clone)]
pub enum PersistWrite {
    Transaction(Transaction),
    Block(Block),
    Subscription(Subscription),
}

/// Applies [`PersistWrite`]s to the store, running blocks through the tracker.
pub struct PersistHandler {
    store: Arc<dyn ChainStore>,
    tracker: ChainStateTracker,
    router: Arc<SubscriptionRouter>,
}

impl PersistHandler {
    pub fn new(
        store: Arc<dyn ChainStore>,
        tracker: ChainStateTracker,
        router: Arc<SubscriptionRouter>,
    ) -> Self {
        Self {
            store,
            tracker,
            router,
        }
    }

    async fn write_block(&self, block: Block) -> Result<IngestOutcome, PushError> {
        let hash = block.hash().to_string();
        let outcome = match self.tracker.ingest(block.clone()).await {
            Err(PushError::Rpc(e)) => {
                warn!(hash = %hash, error = %e, "block ingestion failed, retrying once");
                self.tracker.ingest(block).await.map_err(|e| {
                    error!(hash = %hash, error = %e, "block not stored, ancestors stay missing");
                    e
                })?
            }
            other => other?,
        };
        // the block's own transactions were routed at ingestion
        for block in outcome.blocks_to_route() {
            for tx in &block.transactions {
                self.router.route(tx)?;
            }
        }
        Ok(outcome)
    }

    /// Insert on first sight; afterwards only a changed inclusion is written.
    async fn write_transaction(&self, mut tx: Transaction) -> Result<(), PushError> {
        if let Some(hash) = tx.included_in.clone() {
            match self.store.get_block(&hash).await? {
                Some(block) => tx.included_at_height = block.height,
                None => {
                    // routed again when a backfill stores the block
                    debug!(txid = %tx.txid, block = %hash, "inclusion block not stored");
                    tx.set_inclusion(None, tx.last_updated);
                }
            }
        }

        let Some(mut stored) = self.store.get_transaction(&tx.txid).await? else {
            self.store.put_transaction(&tx).await?;
            debug!(txid = %tx.txid, confirmed = tx.is_confirmed(), "transaction stored");
            return Ok(());
        };

        let changed = tx.is_confirmed()
            && (stored.included_in != tx.included_in
                || stored.included_at_height != tx.included_at_height);
        if !changed {
            debug!(txid = %tx.txid, "transaction unchanged");
            return Ok(());
        }

        let inclusion = tx.included_in.map(|hash| (hash, tx.included_at_height));
        stored.set_inclusion(inclusion, chrono::Utc::now().timestamp());
        self.store.put_transaction(&stored).await?;
        debug!(
            txid = %stored.txid,
            height = stored.included_at_height,
            "transaction inclusion updated"
        );
        Ok(())
    }
}

#[async_trait]
impl WorkHandler<PersistWrite> for PersistHandler {
    async fn handle(&self, item: PersistWrite) -> Result<(), PushError> {
        match item {
            PersistWrite::Block(block) => self.write_block(block).await.map(|_| ()),
            PersistWrite::Transaction(tx) => self.write_transaction(tx).await,
            PersistWrite::Subscription(sub) => {
                if self.store.put_subscription(&sub).await? {
                    debug!(kind = %sub.kind, target = %sub.target, "subscription stored");
                }
                Ok(())
            }
        }
    }
}
