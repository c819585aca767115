//! `chainpush status` — what the configured node reports.

use anyhow::{Context, Result};
use chainpush_rpc::BitcoindClient;

use crate::config::Config;

pub async fn run(config: &Config) -> Result<()> {
    let client = BitcoindClient::new(config.node.client_config())?;
    let count = client
        .get_block_count()
        .await
        .with_context(|| format!("node at {} unreachable", client.url()))?;
    let tips = client.get_chain_tips().await?;

    println!("Node:        {}", client.url());
    println!("Network:     {}", config.network);
    println!("Block count: {count}");
    println!("Chain tips:");
    for tip in tips {
        println!(
            "  {:>8}  {}  branchlen={}  {}",
            tip.height, tip.hash, tip.branchlen, tip.status
        );
    }
    Ok(())
}
