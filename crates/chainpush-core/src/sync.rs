//! Startup catch-up against the node.

use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::PushError;

/// How many recent stored heights are compared with the node at startup.
pub const RESUME_CHECK_DEPTH: u64 = 6;

/// Enqueue every block the store is missing, by height.
///
/// Starts right after the highest stored block, or at the lowest recent
/// height where the stored chain left the node's best chain while the
/// service was down. An empty store only takes the node's current tip;
/// history before that is never fetched. Returns the number of blocks
/// enqueued.
pub async fn catch_up(ctx: &AppContext) -> Result<u64, PushError> {
    let count = ctx.node.block_count().await?;
    let start = match ctx.store.last_block().await? {
        Some(last) => match first_divergence(ctx, last.height, count).await? {
            Some(height) => {
                warn!(height, "stored chain left the node's best chain while offline");
                height
            }
            None => last.height + 1,
        },
        None => count,
    };
    if start > count {
        info!(height = count, "store is up to date");
        return Ok(0);
    }

    info!(from = start, to = count, "catching up");
    for height in start..=count {
        let hash = ctx.node.block_hash(height).await?;
        let raw = ctx.node.raw_block(&hash).await?;
        ctx.rawblock.enqueue(raw)?;
    }
    Ok(count - start + 1)
}

/// Lowest canonical stored height within the check window whose hash the
/// node no longer reports at that height.
async fn first_divergence(
    ctx: &AppContext,
    last_height: u64,
    count: u64,
) -> Result<Option<u64>, PushError> {
    let from = last_height.saturating_sub(RESUME_CHECK_DEPTH - 1);
    for block in ctx.store.blocks_from_height(from).await? {
        if block.orphaned {
            continue;
        }
        if block.height > count {
            break;
        }
        if ctx.node.block_hash(block.height).await? != block.hash() {
            return Ok(Some(block.height));
        }
    }
    Ok(None)
}

/// Enqueue every transaction currently in the node's mempool.
///
/// Transactions that leave the mempool between listing and fetching are
/// skipped. Returns the number enqueued.
pub async fn sweep_mempool(ctx: &AppContext) -> Result<usize, PushError> {
    let txids = ctx.node.mempool().await?;
    let mut enqueued = 0;
    for txid in &txids {
        match ctx.node.raw_transaction(txid).await {
            Ok(raw) => {
                ctx.rawtx.enqueue(raw)?;
                enqueued += 1;
            }
            Err(e) => warn!(%txid, error = %e, "mempool transaction unavailable"),
        }
    }
    info!(listed = txids.len(), enqueued, "mempool swept");
    Ok(enqueued)
}
