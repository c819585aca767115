//! Fakes and wire builders shared by this crate's unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chainpush_codec::{
    hash::from_display_hex, write_varint, Block, Network, Opcode, ScriptBuilder, Transaction,
};

use crate::error::PushError;
use crate::node::{ChainTip, NodeRpc};
use crate::router::Broadcaster;
use crate::store::ChainStore;
use crate::types::Subscription;

pub const GENESIS_PREV: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ─── Wire builders ───────────────────────────────────────────────────────────

pub fn p2pkh_script(fill: u8) -> Vec<u8> {
    ScriptBuilder::new()
        .op(Opcode::Dup)
        .op(Opcode::Hash160)
        .push(&[fill; 20])
        .op(Opcode::EqualVerify)
        .op(Opcode::CheckSig)
        .into_bytes()
}

pub fn data_script(payload: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .op(Opcode::Return)
        .push(payload)
        .into_bytes()
}

/// A legacy transaction with one input (spending `[tag; 32]:0`) and one
/// output per script.
pub fn raw_tx(tag: u8, scripts: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_le_bytes());
    write_varint(&mut out, 1);
    out.extend_from_slice(&[tag; 32]);
    out.extend_from_slice(&0u32.to_le_bytes());
    write_varint(&mut out, 0);
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    write_varint(&mut out, scripts.len() as u64);
    for script in scripts {
        out.extend_from_slice(&1_000u64.to_le_bytes());
        write_varint(&mut out, script.len() as u64);
        out.extend_from_slice(script);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

pub fn build_tx(tag: u8, scripts: &[Vec<u8>], network: Network) -> Transaction {
    Transaction::decode(&raw_tx(tag, scripts), network).unwrap()
}

/// A block on top of `prev` (display hex). `nonce` distinguishes siblings.
pub fn raw_block(prev: &str, nonce: u32, txs: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&from_display_hex(prev).unwrap());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    out.extend_from_slice(&0x207f_ffffu32.to_le_bytes());
    out.extend_from_slice(&nonce.to_le_bytes());
    write_varint(&mut out, txs.len() as u64);
    for tx in txs {
        out.extend_from_slice(tx);
    }
    out
}

pub fn build_block(prev: &str, nonce: u32, txs: &[Vec<u8>]) -> Block {
    Block::decode(&raw_block(prev, nonce, txs), Network::Mainnet).unwrap()
}

/// `count` linked raw blocks on top of `prev`, each carrying one unique
/// transaction paying `p2pkh_script(salt)`.
pub fn raw_chain(prev: &str, count: usize, salt: u8) -> Vec<Vec<u8>> {
    let mut raws = Vec::with_capacity(count);
    let mut prev = prev.to_string();
    for i in 0..count {
        let tx = raw_tx(salt.wrapping_add(i as u8), &[p2pkh_script(salt)]);
        let raw = raw_block(&prev, u32::from(salt) << 16 | i as u32, &[tx]);
        prev = Block::decode(&raw, Network::Mainnet).unwrap().hash().to_string();
        raws.push(raw);
    }
    raws
}

pub fn decode_all(raws: &[Vec<u8>]) -> Vec<Block> {
    raws.iter()
        .map(|raw| Block::decode(raw, Network::Mainnet).unwrap())
        .collect()
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct TestStore {
    blocks: Mutex<HashMap<String, Block>>,
    txs: Mutex<HashMap<String, Transaction>>,
    subs: Mutex<Vec<Subscription>>,
}

impl TestStore {
    pub fn block(&self, hash: &str) -> Block {
        self.blocks.lock().unwrap()[hash].clone()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn tx(&self, txid: &str) -> Option<Transaction> {
        self.txs.lock().unwrap().get(txid).cloned()
    }

    pub fn tips(&self) -> Vec<String> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.is_chain_tip)
            .map(|b| b.hash().to_string())
            .collect()
    }
}

#[async_trait]
impl ChainStore for TestStore {
    async fn get_block(&self, hash: &str) -> Result<Option<Block>, PushError> {
        Ok(self.blocks.lock().unwrap().get(hash).cloned())
    }

    async fn put_block(&self, block: &Block) -> Result<(), PushError> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.hash().to_string(), block.clone());
        Ok(())
    }

    async fn set_block_state(
        &self,
        hash: &str,
        orphaned: bool,
        is_chain_tip: bool,
    ) -> Result<(), PushError> {
        if let Some(b) = self.blocks.lock().unwrap().get_mut(hash) {
            b.orphaned = orphaned;
            b.is_chain_tip = is_chain_tip;
        }
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
        let mut out: Vec<Block> = self
            .blocks
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.height >= from)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.height);
        Ok(out)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>, PushError> {
        Ok(self.tx(txid))
    }

    async fn put_transaction(&self, tx: &Transaction) -> Result<(), PushError> {
        self.txs.lock().unwrap().insert(tx.txid.clone(), tx.clone());
        Ok(())
    }

    async fn transactions_included_from(&self, from: u64) -> Result<Vec<Transaction>, PushError> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.included_at_height >= from)
            .cloned()
            .collect())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, PushError> {
        Ok(self.subs.lock().unwrap().clone())
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<bool, PushError> {
        let mut subs = self.subs.lock().unwrap();
        if subs.contains(subscription) {
            return Ok(false);
        }
        subs.push(subscription.clone());
        Ok(true)
    }
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// A node that knows a fixed set of raw blocks and transactions.
#[derive(Default)]
pub struct FakeNode {
    blocks: Mutex<HashMap<String, (u64, Vec<u8>)>>,
    best: Mutex<Vec<String>>,
    txs: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<Vec<String>>,
    failures: Mutex<u32>,
}

impl FakeNode {
    /// Register raw blocks as the node's best chain starting at `first_height`.
    pub fn with_chain(self, first_height: u64, raws: &[Vec<u8>]) -> Self {
        {
            let mut map = self.blocks.lock().unwrap();
            let mut best = self.best.lock().unwrap();
            best.resize(first_height as usize, String::new());
            for (i, raw) in raws.iter().enumerate() {
                let hash = Block::decode(raw, Network::Mainnet).unwrap().hash().to_string();
                map.insert(hash.clone(), (first_height + i as u64, raw.clone()));
                best.push(hash);
            }
        }
        self
    }

    pub fn with_tx(self, raw: Vec<u8>) -> Self {
        let txid = Transaction::decode(&raw, Network::Mainnet).unwrap().txid;
        self.txs.lock().unwrap().insert(txid, raw);
        self
    }

    /// Make the next `count` `raw_block` calls fail with an RPC error.
    pub fn failing_fetches(self, count: u32) -> Self {
        *self.failures.lock().unwrap() = count;
        self
    }

    /// Hashes requested through `raw_block`, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn block_count(&self) -> Result<u64, PushError> {
        Ok(self.best.lock().unwrap().len().saturating_sub(1) as u64)
    }

    async fn block_hash(&self, height: u64) -> Result<String, PushError> {
        self.best
            .lock()
            .unwrap()
            .get(height as usize)
            .filter(|h| !h.is_empty())
            .cloned()
            .ok_or_else(|| PushError::Rpc(format!("no block at height {height}")))
    }

    async fn raw_block(&self, hash: &str) -> Result<Vec<u8>, PushError> {
        self.fetches.lock().unwrap().push(hash.to_string());
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PushError::Rpc("connection reset".into()));
            }
        }
        self.blocks
            .lock()
            .unwrap()
            .get(hash)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| PushError::Rpc(format!("block not found: {hash}")))
    }

    async fn block_height(&self, hash: &str) -> Result<u64, PushError> {
        self.blocks
            .lock()
            .unwrap()
            .get(hash)
            .map(|(height, _)| *height)
            .ok_or_else(|| PushError::Rpc(format!("block not found: {hash}")))
    }

    async fn raw_transaction(&self, txid: &str) -> Result<Vec<u8>, PushError> {
        self.txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| PushError::Rpc(format!("no such mempool transaction: {txid}")))
    }

    async fn mempool(&self) -> Result<Vec<String>, PushError> {
        Ok(self.txs.lock().unwrap().keys().cloned().collect())
    }

    async fn chain_tips(&self) -> Result<Vec<ChainTip>, PushError> {
        let best = self.best.lock().unwrap();
        Ok(best
            .last()
            .map(|hash| ChainTip {
                height: best.len() as u64 - 1,
                hash: hash.clone(),
                branchlen: 0,
                status: "active".into(),
            })
            .into_iter()
            .collect())
    }
}

// ─── Broadcaster ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingBroadcaster {
    deliveries: Mutex<Vec<(String, String)>>,
}

impl RecordingBroadcaster {
    /// `(txid, subscription target)` pairs in delivery order.
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, tx: &Transaction, subscription: &Subscription) {
        self.deliveries
            .lock()
            .unwrap()
            .push((tx.txid.clone(), subscription.target.clone()));
    }
}
