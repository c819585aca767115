//! In-memory storage backend.
//!
//! Keeps blocks, transactions, and subscriptions in RAM.
//! Useful for testing and for nodes that rebuild their view on every start.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use chainpush_codec::{Block, Transaction};
use chainpush_core::error::PushError;
use chainpush_core::store::ChainStore;
use chainpush_core::types::Subscription;

/// In-memory chain store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<String, Block>>,
    transactions: Mutex<HashMap<String, Transaction>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks, orphans included.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// Number of stored transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn get_block(&self, hash: &str) -> Result<Option<Block>, PushError> {
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }

    async fn put_block(&self, block: &Block) -> Result<(), PushError> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.hash().to_string(), block.clone());
        debug!(hash = %block.hash(), height = block.height, "block stored");
        Ok(())
    }

    async fn set_block_state(
        &self,
        hash: &str,
        orphaned: bool,
        is_chain_tip: bool,
    ) -> Result<(), PushError> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks
            .get_mut(hash)
            .ok_or_else(|| PushError::Storage(format!("unknown block {hash}")))?;
        block.orphaned = orphaned;
        block.is_chain_tip = is_chain_tip;
        Ok(())
    }

    async fn chain_tip(&self) -> Result<Option<Block>, PushError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .values()
            .find(|b| b.is_chain_tip)
            .cloned())
    }

    async fn last_block(&self) -> Result<Option<Block>, PushError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .values()
            .max_by_key(|b| b.height)
            .cloned())
    }

    async fn blocks_from_height(&self, from: u64) -> Result<Vec<Block>, PushError> {
        let mut blocks: Vec<Block> = self
            .blocks
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.height >= from)
            .cloned()
            .collect();
        blocks.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash().cmp(b.hash())));
        Ok(blocks)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>, PushError> {
        Ok(self.transactions.lock().unwrap().get(txid).cloned())
    }

    async fn put_transaction(&self, tx: &Transaction) -> Result<(), PushError> {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.txid.clone(), tx.clone());
        debug!(txid = %tx.txid, "transaction stored");
        Ok(())
    }

    async fn transactions_included_from(&self, from: u64) -> Result<Vec<Transaction>, PushError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|tx| tx.is_confirmed() && tx.included_at_height >= from)
            .cloned()
            .collect())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, PushError> {
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<bool, PushError> {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.contains(subscription) {
            return Ok(false);
        }
        subs.push(subscription.clone());
        Ok(true)
    }
}
