//! Chain-state tracking: height assignment, gap backfill, and reorg repair.
//!
//! The tracker is stateless; the canonical view lives in the [`ChainStore`].
//! It must only be driven from the persistence worker so that it is the
//! single writer of block state.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chainpush_codec::{Block, Network};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::PushError;
use crate::node::NodeRpc;
use crate::store::ChainStore;
use crate::types::ReorgEvent;

/// Tuning for the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum number of missing ancestors fetched for one block.
    #[serde(default = "default_max_backfill_depth")]
    pub max_backfill_depth: usize,
}

fn default_max_backfill_depth() -> usize {
    1_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_backfill_depth: default_max_backfill_depth(),
        }
    }
}

/// What happened while ingesting one block.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Hashes of every block inserted, in insertion order.
    pub inserted: Vec<String>,
    /// Ancestors fetched from the node and inserted before the block itself.
    pub backfilled: Vec<Block>,
    /// Previously stored blocks that became canonical again, ascending.
    pub reconnected: Vec<Block>,
    pub reorgs: Vec<ReorgEvent>,
}

impl IngestOutcome {
    /// Blocks whose transactions must be (re)routed by the caller.
    pub fn blocks_to_route(&self) -> impl Iterator<Item = &Block> {
        self.backfilled.iter().chain(self.reconnected.iter())
    }
}

enum Applied {
    Duplicate,
    Stored,
    /// Missing ancestors, ascending, followed by the block that needed them.
    Deferred(Vec<Block>),
}

/// Keeps the stored chain consistent with arriving blocks.
pub struct ChainStateTracker {
    store: Arc<dyn ChainStore>,
    node: Arc<dyn NodeRpc>,
    network: Network,
    config: TrackerConfig,
}

impl ChainStateTracker {
    pub fn new(
        store: Arc<dyn ChainStore>,
        node: Arc<dyn NodeRpc>,
        network: Network,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            node,
            network,
            config,
        }
    }

    /// Integrate a decoded block into the stored chain.
    ///
    /// Missing ancestors are fetched and inserted first. A block whose parent
    /// is not the current tip triggers reorg repair. The block always ends up
    /// as the chain tip unless it was already stored.
    pub async fn ingest(&self, block: Block) -> Result<IngestOutcome, PushError> {
        let mut outcome = IngestOutcome::default();
        let mut fetched: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([block]);

        while let Some(block) = queue.pop_front() {
            let was_fetched = fetched.contains(block.hash());
            match self.apply(block, was_fetched, &mut outcome).await? {
                Applied::Duplicate | Applied::Stored => {}
                Applied::Deferred(pending) => {
                    // the deferred block is last; everything before it came from the node
                    let ancestors = pending.len().saturating_sub(1);
                    fetched.extend(pending[..ancestors].iter().map(|b| b.hash().to_string()));
                    for b in pending.into_iter().rev() {
                        queue.push_front(b);
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn apply(
        &self,
        mut block: Block,
        was_fetched: bool,
        outcome: &mut IngestOutcome,
    ) -> Result<Applied, PushError> {
        if self.store.get_block(block.hash()).await?.is_some() {
            debug!(hash = %block.hash(), "block already stored");
            return Ok(Applied::Duplicate);
        }

        // first block ever: trust the node for its height
        if self.store.is_empty().await? {
            let height = self.node.block_height(block.hash()).await?;
            block.assign_height(height);
            self.insert_tip(block, was_fetched, outcome).await?;
            return Ok(Applied::Stored);
        }

        let parent = match self.store.get_block(block.prev_hash()).await? {
            Some(parent) => parent,
            None => return self.backfill(block).await.map(Applied::Deferred),
        };
        block.assign_height(parent.height + 1);

        match self.store.chain_tip().await? {
            Some(tip) if tip.hash() != block.prev_hash() => {
                self.store
                    .set_block_state(tip.hash(), tip.orphaned, false)
                    .await?;
                self.reorganize(&block, tip, parent, outcome).await?;
            }
            Some(tip) => {
                self.store.set_block_state(tip.hash(), false, false).await?;
            }
            None => {}
        }

        self.insert_tip(block, was_fetched, outcome).await?;
        Ok(Applied::Stored)
    }

    /// Fetch ancestors of `block` from the node until one is already stored.
    async fn backfill(&self, block: Block) -> Result<Vec<Block>, PushError> {
        let now = now();
        let mut pending: Vec<Block> = Vec::new();
        let mut prev = block.prev_hash().to_string();

        loop {
            if pending.len() >= self.config.max_backfill_depth {
                error!(
                    hash = %block.hash(),
                    depth = pending.len(),
                    "no stored ancestor within backfill depth"
                );
                return Err(PushError::ConsistencyFatal(format!(
                    "no stored ancestor of {} within {} blocks",
                    block.hash(),
                    self.config.max_backfill_depth
                )));
            }

            let raw = self.node.raw_block(&prev).await?;
            let ancestor = Block::decode(&raw, self.network)?.seen_at(now);
            prev = ancestor.prev_hash().to_string();
            debug!(hash = %ancestor.hash(), "fetched missing ancestor");
            pending.push(ancestor);

            if self.store.get_block(&prev).await?.is_some() {
                break;
            }
        }

        info!(
            hash = %block.hash(),
            missing = pending.len(),
            "backfilling missing ancestors"
        );
        pending.reverse();
        pending.push(block);
        Ok(pending)
    }

    /// Re-point the canonical chain from `tip` to the branch ending at `parent`.
    async fn reorganize(
        &self,
        block: &Block,
        tip: Block,
        parent: Block,
        outcome: &mut IngestOutcome,
    ) -> Result<(), PushError> {
        let mut old = tip;
        let mut new = parent;
        let mut old_side: Vec<Block> = Vec::new();
        let mut new_side: Vec<Block> = Vec::new();

        while old.height > new.height {
            let prev = self.stored_parent(&old).await?;
            old_side.push(std::mem::replace(&mut old, prev));
        }
        while new.height > old.height {
            let prev = self.stored_parent(&new).await?;
            new_side.push(std::mem::replace(&mut new, prev));
        }
        while old.hash() != new.hash() {
            let old_prev = self.stored_parent(&old).await?;
            let new_prev = self.stored_parent(&new).await?;
            old_side.push(std::mem::replace(&mut old, old_prev));
            new_side.push(std::mem::replace(&mut new, new_prev));
        }
        let ancestor = old;

        for b in &old_side {
            self.store.set_block_state(b.hash(), true, false).await?;
        }
        for b in &new_side {
            self.store.set_block_state(b.hash(), false, false).await?;
        }

        let fork_height = ancestor.height + 1;
        let mut unconfirmed = 0;
        if !old_side.is_empty() {
            let now = now();
            for mut tx in self.store.transactions_included_from(fork_height).await? {
                tx.set_inclusion(None, now);
                self.store.put_transaction(&tx).await?;
                unconfirmed += 1;
            }

            let mut reconnected: Vec<String> = vec![block.hash().to_string()];
            reconnected.extend(new_side.iter().map(|b| b.hash().to_string()));
            let event = ReorgEvent {
                fork_height,
                depth: old_side.len() as u64,
                orphaned: old_side.iter().map(|b| b.hash().to_string()).collect(),
                reconnected,
                unconfirmed,
            };
            warn!(
                depth = event.depth,
                fork_height,
                new_tip = %block.hash(),
                unconfirmed,
                "Reorg detected"
            );
            outcome.reorgs.push(event);
        }

        new_side.reverse();
        outcome.reconnected.extend(new_side);
        Ok(())
    }

    async fn stored_parent(&self, block: &Block) -> Result<Block, PushError> {
        match self.store.get_block(block.prev_hash()).await? {
            Some(parent) => Ok(parent),
            None => {
                error!(
                    hash = %block.hash(),
                    prev = %block.prev_hash(),
                    "fork point unreachable from stored blocks"
                );
                Err(PushError::ConsistencyFatal(format!(
                    "parent {} of stored block {} is missing",
                    block.prev_hash(),
                    block.hash()
                )))
            }
        }
    }

    async fn insert_tip(
        &self,
        mut block: Block,
        was_fetched: bool,
        outcome: &mut IngestOutcome,
    ) -> Result<(), PushError> {
        block.orphaned = false;
        block.is_chain_tip = true;
        self.store.put_block(&block).await?;
        info!(hash = %block.hash(), height = block.height, "block stored");

        outcome.inserted.push(block.hash().to_string());
        if was_fetched {
            outcome.backfilled.push(block);
        }
        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{
        build_block, decode_all, p2pkh_script, raw_chain, raw_tx, FakeNode, TestStore,
        GENESIS_PREV,
    };

    fn tracker(store: &Arc<TestStore>, node: FakeNode, config: TrackerConfig) -> ChainStateTracker {
        ChainStateTracker::new(store.clone(), Arc::new(node), Network::Mainnet, config)
    }

    async fn ingest_all(tracker: &ChainStateTracker, blocks: &[Block]) {
        for block in blocks {
            tracker.ingest(block.clone()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_block_takes_height_from_node() {
        let raws = raw_chain(GENESIS_PREV, 1, 1);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(840, &raws), TrackerConfig::default());

        let outcome = t.ingest(chain[0].clone()).await.unwrap();
        assert_eq!(outcome.inserted, vec![chain[0].hash().to_string()]);

        let stored = store.block(chain[0].hash());
        assert_eq!(stored.height, 840);
        assert!(stored.is_chain_tip);
        assert!(!stored.orphaned);
        assert_eq!(stored.transactions[0].included_at_height, 840);
    }

    #[tokio::test]
    async fn extension_moves_the_tip() {
        let raws = raw_chain(GENESIS_PREV, 3, 2);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(1, &raws), TrackerConfig::default());

        ingest_all(&t, &chain).await;

        assert_eq!(store.tips(), vec![chain[2].hash().to_string()]);
        let heights: Vec<u64> = chain.iter().map(|b| store.block(b.hash()).height).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn redelivered_block_is_a_noop() {
        let raws = raw_chain(GENESIS_PREV, 2, 3);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(1, &raws), TrackerConfig::default());

        ingest_all(&t, &chain).await;
        let outcome = t.ingest(chain[0].clone()).await.unwrap();

        assert!(outcome.inserted.is_empty());
        assert!(outcome.reorgs.is_empty());
        assert_eq!(store.tips(), vec![chain[1].hash().to_string()]);
    }

    #[tokio::test]
    async fn competing_tip_triggers_one_reorg() {
        let raws = raw_chain(GENESIS_PREV, 5, 4);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(1, &raws), TrackerConfig::default());
        ingest_all(&t, &chain).await;

        // transactions as the persistence worker would have recorded them
        let mut in_tip = chain[4].transactions[0].clone();
        in_tip.included_at_height = 5;
        let mut below_tip = chain[3].transactions[0].clone();
        below_tip.included_at_height = 4;
        store.put_transaction(&in_tip).await.unwrap();
        store.put_transaction(&below_tip).await.unwrap();

        let rival = build_block(chain[3].hash(), 7, &[raw_tx(200, &[p2pkh_script(200)])]);
        let outcome = t.ingest(rival.clone()).await.unwrap();

        assert_eq!(
            outcome.reorgs,
            vec![ReorgEvent {
                fork_height: 5,
                depth: 1,
                orphaned: vec![chain[4].hash().to_string()],
                reconnected: vec![rival.hash().to_string()],
                unconfirmed: 1,
            }]
        );
        assert!(outcome.reconnected.is_empty());

        let old_tip = store.block(chain[4].hash());
        assert!(old_tip.orphaned);
        assert!(!old_tip.is_chain_tip);
        let new_tip = store.block(rival.hash());
        assert_eq!(new_tip.height, 5);
        assert_eq!(store.tips(), vec![rival.hash().to_string()]);

        let cleared = store.tx(&in_tip.txid).unwrap();
        assert_eq!(cleared.included_in, None);
        assert_eq!(cleared.included_at_height, 0);
        let kept = store.tx(&below_tip.txid).unwrap();
        assert_eq!(kept.included_in.as_deref(), Some(chain[3].hash()));
        assert_eq!(kept.included_at_height, 4);
    }

    #[tokio::test]
    async fn longer_branch_replaces_shorter_one() {
        let base_raw = raw_chain(GENESIS_PREV, 1, 5);
        let base = decode_all(&base_raw);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(10, &base_raw), TrackerConfig::default());

        let old = decode_all(&raw_chain(base[0].hash(), 2, 6));
        let new = decode_all(&raw_chain(base[0].hash(), 3, 7));
        ingest_all(&t, &base).await;
        ingest_all(&t, &old).await;
        // the first two blocks of the new branch are stored without becoming canonical
        ingest_all(&t, &new[..2]).await;
        assert_eq!(store.tips(), vec![new[1].hash().to_string()]);

        // back to `old`, then `new` wins for good
        let old_next = build_block(old[1].hash(), 1, &[raw_tx(61, &[p2pkh_script(61)])]);
        t.ingest(old_next.clone()).await.unwrap();
        let outcome = t.ingest(new[2].clone()).await.unwrap();

        let reorg = &outcome.reorgs[0];
        assert_eq!(reorg.fork_height, 11);
        assert_eq!(reorg.depth, 3);
        assert_eq!(
            reorg.orphaned,
            vec![
                old_next.hash().to_string(),
                old[1].hash().to_string(),
                old[0].hash().to_string()
            ]
        );
        let reconnected: Vec<&str> = outcome.reconnected.iter().map(|b| b.hash()).collect();
        assert_eq!(reconnected, vec![new[0].hash(), new[1].hash()]);

        for b in &new {
            assert!(!store.block(b.hash()).orphaned);
        }
        for b in old.iter().chain([&old_next]) {
            assert!(store.block(b.hash()).orphaned);
        }
        assert_eq!(store.block(new[2].hash()).height, 13);
        assert_eq!(store.tips(), vec![new[2].hash().to_string()]);
    }

    #[tokio::test]
    async fn rollback_clears_canonical_inclusions_above_the_fork() {
        let base_raw = raw_chain(GENESIS_PREV, 1, 11);
        let base = decode_all(&base_raw);
        let store = Arc::new(TestStore::default());
        let t = tracker(&store, FakeNode::default().with_chain(20, &base_raw), TrackerConfig::default());

        let old = decode_all(&raw_chain(base[0].hash(), 1, 12));
        let new = decode_all(&raw_chain(base[0].hash(), 2, 13));
        ingest_all(&t, &base).await;
        ingest_all(&t, &old).await;
        // new[0] ties with old[0] and takes the tip, then old wins back
        t.ingest(new[0].clone()).await.unwrap();
        let old_next = build_block(old[0].hash(), 2, &[raw_tx(121, &[p2pkh_script(121)])]);
        t.ingest(old_next.clone()).await.unwrap();
        assert!(store.block(new[0].hash()).orphaned);

        // new[0] returns to the canonical chain below, at the fork height
        let mut on_new_side = new[0].transactions[0].clone();
        on_new_side.included_at_height = 21;
        store.put_transaction(&on_new_side).await.unwrap();
        let mut below_fork = base[0].transactions[0].clone();
        below_fork.included_at_height = 20;
        store.put_transaction(&below_fork).await.unwrap();

        let outcome = t.ingest(new[1].clone()).await.unwrap();
        let reorg = &outcome.reorgs[0];
        assert_eq!(reorg.fork_height, 21);
        assert_eq!(reorg.unconfirmed, 1);
        // new[0] is canonical again yet its transaction lost the inclusion
        assert!(!store.block(new[0].hash()).orphaned);
        let reconnected: Vec<&str> = outcome.reconnected.iter().map(|b| b.hash()).collect();
        assert_eq!(reconnected, vec![new[0].hash()]);

        let cleared = store.tx(&on_new_side.txid).unwrap();
        assert_eq!(cleared.included_in, None);
        assert_eq!(cleared.included_at_height, 0);
        assert_eq!(store.tx(&below_fork.txid).unwrap().included_at_height, 20);
    }

    #[tokio::test]
    async fn gap_is_backfilled_from_the_node() {
        let raws = raw_chain(GENESIS_PREV, 5, 8);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let node = FakeNode::default().with_chain(1, &raws);
        let t = tracker(&store, node, TrackerConfig::default());

        t.ingest(chain[0].clone()).await.unwrap();
        let outcome = t.ingest(chain[4].clone()).await.unwrap();

        let backfilled: Vec<&str> = outcome.backfilled.iter().map(|b| b.hash()).collect();
        assert_eq!(backfilled, vec![chain[1].hash(), chain[2].hash(), chain[3].hash()]);
        assert_eq!(
            outcome.inserted,
            chain[1..].iter().map(|b| b.hash().to_string()).collect::<Vec<_>>()
        );
        assert!(outcome.reorgs.is_empty());

        for (i, b) in chain.iter().enumerate() {
            let stored = store.block(b.hash());
            assert_eq!(stored.height, i as u64 + 1);
            assert!(!stored.orphaned);
        }
        assert_eq!(store.tips(), vec![chain[4].hash().to_string()]);
    }

    #[tokio::test]
    async fn backfill_depth_is_bounded() {
        let raws = raw_chain(GENESIS_PREV, 5, 9);
        let chain = decode_all(&raws);
        let store = Arc::new(TestStore::default());
        let t = tracker(
            &store,
            FakeNode::default().with_chain(1, &raws),
            TrackerConfig {
                max_backfill_depth: 2,
            },
        );

        t.ingest(chain[0].clone()).await.unwrap();
        let err = t.ingest(chain[4].clone()).await.unwrap_err();

        assert!(err.is_fatal(), "{err}");
        assert_eq!(store.block_count(), 1);
    }
}
