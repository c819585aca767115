//! The persisted chain view consumed by the tracker and the persistence worker.
//!
//! Implementations live in `chainpush-storage` (memory, SQLite).

use async_trait::async_trait;
use chainpush_codec::{Block, Transaction};

use crate::error::PushError;
use crate::types::Subscription;

/// Key-indexed storage for blocks, transactions, and subscriptions.
///
/// Blocks are keyed by hash with a secondary index on height; transactions
/// by txid with a secondary index on inclusion height. All writes are upserts.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Look up a block by hash.
    async fn get_block(&self, hash: &str) -> Result<Option<Block>, PushError>;

    /// Insert or replace a block.
    async fn put_block(&self, block: &Block) -> Result<(), PushError>;

    /// Update only the orphaned / chain-tip flags of a stored block.
    async fn set_block_state(
        &self,
        hash: &str,
        orphaned: bool,
        is_chain_tip: bool,
    ) -> Result<(), PushError>;

    /// The block currently flagged as chain tip.
    async fn chain_tip(&self) -> Result<Option<Block>, PushError>;

    /// The highest stored block, orphaned or not.
    async fn last_block(&self) -> Result<Option<Block>, PushError>;

    /// All stored blocks with `height >= from`, ascending.
    async fn blocks_from_height(&self, from: u64) -> Result<Vec<Block>, PushError>;

    /// Look up a transaction by txid.
    async fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>, PushError>;

    /// Insert or replace a transaction.
    async fn put_transaction(&self, tx: &Transaction) -> Result<(), PushError>;

    /// All transactions with `included_at_height >= from`.
    async fn transactions_included_from(&self, from: u64) -> Result<Vec<Transaction>, PushError>;

    /// Every stored subscription.
    async fn subscriptions(&self) -> Result<Vec<Subscription>, PushError>;

    /// Insert a subscription. Returns `false` if it was already stored.
    async fn put_subscription(&self, subscription: &Subscription) -> Result<bool, PushError>;

    /// Returns `true` if no block has been stored yet.
    async fn is_empty(&self) -> Result<bool, PushError> {
        Ok(self.last_block().await?.is_none())
    }
}
