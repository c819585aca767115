//! Handlers for the raw feed queues.

use std::sync::Arc;

use async_trait::async_trait;
use chainpush_codec::{Block, Network, Transaction};
use tracing::{debug, info, warn};

use crate::error::PushError;
use crate::persist::PersistWrite;
use crate::pipeline::{WorkHandler, WorkQueue};
use crate::router::SubscriptionRouter;

/// Decodes `rawtx` payloads and routes them.
pub struct TxIngest {
    network: Network,
    router: Arc<SubscriptionRouter>,
}

impl TxIngest {
    pub fn new(network: Network, router: Arc<SubscriptionRouter>) -> Self {
        Self { network, router }
    }
}

#[async_trait]
impl WorkHandler<Vec<u8>> for TxIngest {
    async fn handle(&self, raw: Vec<u8>) -> Result<(), PushError> {
        let tx = match Transaction::decode(&raw, self.network) {
            Ok(tx) => tx.seen_at(chrono::Utc::now().timestamp()),
            Err(e) => {
                warn!(size = raw.len(), error = %e, "discarding undecodable transaction");
                return Ok(());
            }
        };

        let matches = self.router.route(&tx)?;
        debug!(txid = %tx.txid, matches, "transaction ingested");
        Ok(())
    }
}

/// Decodes `rawblock` payloads, hands them to the persistence worker, then
/// routes their transactions.
pub struct BlockIngest {
    network: Network,
    router: Arc<SubscriptionRouter>,
    persist: WorkQueue<PersistWrite>,
}

impl BlockIngest {
    pub fn new(
        network: Network,
        router: Arc<SubscriptionRouter>,
        persist: WorkQueue<PersistWrite>,
    ) -> Self {
        Self {
            network,
            router,
            persist,
        }
    }
}

#[async_trait]
impl WorkHandler<Vec<u8>> for BlockIngest {
    async fn handle(&self, raw: Vec<u8>) -> Result<(), PushError> {
        let block = match Block::decode(&raw, self.network) {
            Ok(block) => block.seen_at(chrono::Utc::now().timestamp()),
            Err(e) => {
                warn!(size = raw.len(), error = %e, "discarding undecodable block");
                return Ok(());
            }
        };
        info!(
            hash = %block.hash(),
            txs = block.transactions.len(),
            size = block.size,
            "block received"
        );

        // queue the block first so its height is known when the matched
        // transactions reach the persistence worker
        let txs = block.transactions.clone();
        self.persist.enqueue(PersistWrite::Block(block))?;
        for tx in &txs {
            self.router.route(tx)?;
        }
        Ok(())
    }
}
