//! `chainpush decode` — decode a raw transaction or block offline.

use anyhow::{Context, Result};
use chainpush_codec::{Block, Network, Transaction};

pub fn run(hex: &str, block: bool, network: Network) -> Result<()> {
    let json = if block {
        let block = Block::decode_hex(hex, network).context("invalid block")?;
        serde_json::to_string_pretty(&block)?
    } else {
        let tx = Transaction::decode_hex(hex, network).context("invalid transaction")?;
        serde_json::to_string_pretty(&tx)?
    };
    println!("{json}");
    Ok(())
}
