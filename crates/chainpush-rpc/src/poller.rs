//! Polling feed: turns node state changes into raw payloads on the ingestion queues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use chainpush_core::error::PushError;
use chainpush_core::node::NodeRpc;
use chainpush_core::pipeline::WorkQueue;

/// Configuration for [`NodePoller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Also forward new mempool transactions.
    pub mempool: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            mempool: true,
        }
    }
}

/// Counts from one poll round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub blocks: usize,
    pub transactions: usize,
}

/// Polls `getblockcount` / `getrawmempool` and enqueues what is new.
pub struct NodePoller {
    node: Arc<dyn NodeRpc>,
    rawblock: WorkQueue<Vec<u8>>,
    rawtx: WorkQueue<Vec<u8>>,
    config: PollerConfig,
    /// Height and hash of the best block at the last poll.
    tip: Option<(u64, String)>,
    /// Mempool txids already forwarded.
    seen: HashSet<String>,
}

impl NodePoller {
    pub fn new(
        node: Arc<dyn NodeRpc>,
        rawblock: WorkQueue<Vec<u8>>,
        rawtx: WorkQueue<Vec<u8>>,
        config: PollerConfig,
    ) -> Self {
        Self {
            node,
            rawblock,
            rawtx,
            config,
            tip: None,
            seen: HashSet::new(),
        }
    }

    /// Treat `tip` as already delivered; the first poll only forwards what
    /// comes after it.
    pub fn starting_at(mut self, height: u64, hash: impl Into<String>) -> Self {
        self.tip = Some((height, hash.into()));
        self
    }

    /// Treat `txids` as already delivered.
    pub fn with_seen_mempool(mut self, txids: impl IntoIterator<Item = String>) -> Self {
        self.seen.extend(txids);
        self
    }

    /// Run one round: new blocks first, then new mempool transactions.
    pub async fn poll_once(&mut self) -> Result<PollStats, PushError> {
        let mut stats = PollStats::default();

        let count = self.node.block_count().await?;
        let best = self.node.block_hash(count).await?;
        let from = match &self.tip {
            Some((height, hash)) if *height == count && *hash == best => None,
            Some((height, _)) if count > *height => Some(height + 1),
            // first poll, or the tip was replaced at the same or a lower height
            _ => Some(count),
        };

        if let Some(from) = from {
            for height in from..=count {
                let hash = if height == count {
                    best.clone()
                } else {
                    self.node.block_hash(height).await?
                };
                let raw = self.node.raw_block(&hash).await?;
                self.rawblock.enqueue(raw)?;
                debug!(height, %hash, "new block forwarded");
                stats.blocks += 1;
            }
            self.tip = Some((count, best));
        }

        if self.config.mempool {
            stats.transactions = self.poll_mempool().await?;
        }
        Ok(stats)
    }

    async fn poll_mempool(&mut self) -> Result<usize, PushError> {
        let txids = self.node.mempool().await?;
        let mut forwarded = 0;
        for txid in &txids {
            if self.seen.contains(txid) {
                continue;
            }
            match self.node.raw_transaction(txid).await {
                Ok(raw) => {
                    self.rawtx.enqueue(raw)?;
                    forwarded += 1;
                }
                // evicted or mined between the listing and the fetch
                Err(e) => debug!(%txid, error = %e, "mempool transaction vanished"),
            }
            self.seen.insert(txid.clone());
        }

        // forget what has left the mempool so the set stays bounded
        let current: HashSet<&String> = txids.iter().collect();
        self.seen.retain(|txid| current.contains(txid));
        Ok(forwarded)
    }

    /// Poll until `shutdown` flips to `true`. Poll failures are logged and
    /// retried on the next tick; a closed queue ends the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.config.interval.as_millis() as u64, "poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => match self.poll_once().await {
                    Ok(stats) if stats != PollStats::default() => {
                        debug!(blocks = stats.blocks, txs = stats.transactions, "poll round");
                    }
                    Ok(_) => {}
                    Err(e @ PushError::QueueClosed { .. }) => {
                        warn!(error = %e, "ingestion queue closed, poller exiting");
                        break;
                    }
                    Err(e) => warn!(error = %e, "poll failed"),
                },
            }
        }
        info!("poller stopped");
    }
}
