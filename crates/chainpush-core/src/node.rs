//! The node surface used for backfill, catch-up, and mempool sweeps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// One entry of the node's `getchaintips` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: String,
    /// Length of the branch back to the main chain (0 for the active tip).
    pub branchlen: u64,
    /// `active`, `valid-fork`, `valid-headers`, `headers-only`, or `invalid`.
    pub status: String,
}

/// Request/response access to a full node.
///
/// Raw payloads are returned as bytes, already hex-decoded.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Height of the node's best chain.
    async fn block_count(&self) -> Result<u64, PushError>;

    /// Hash of the best-chain block at `height`.
    async fn block_hash(&self, height: u64) -> Result<String, PushError>;

    /// Serialized block bytes for `hash`.
    async fn raw_block(&self, hash: &str) -> Result<Vec<u8>, PushError>;

    /// Height of the block with `hash`.
    async fn block_height(&self, hash: &str) -> Result<u64, PushError>;

    /// Serialized transaction bytes for `txid`.
    async fn raw_transaction(&self, txid: &str) -> Result<Vec<u8>, PushError>;

    /// Txids currently in the node's mempool.
    async fn mempool(&self) -> Result<Vec<String>, PushError>;

    /// Known chain tips, active branch included.
    async fn chain_tips(&self) -> Result<Vec<ChainTip>, PushError>;
}
