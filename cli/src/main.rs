//! ChainPush CLI.
//!
//! # Commands
//! ```text
//! chainpush run    [--config <file>] [--listen <addr>] [--node-url <url>]
//! chainpush status [--config <file>]
//! chainpush decode --kind tx|block [--network mainnet|testnet] <hex>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use chainpush_codec::Network;

mod cmd_decode;
mod cmd_run;
mod cmd_status;
mod config;
mod logging;

use config::Config;

#[derive(Parser)]
#[command(
    name = "chainpush",
    about = "Push Bitcoin transactions to WebSocket subscribers",
    long_about = "
ChainPush follows a Bitcoin Core node over JSON-RPC, decodes every new block
and mempool transaction, and pushes the ones paying a subscribed address (or
carrying a subscribed OP_RETURN prefix) to WebSocket clients.
",
    version
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the push service
    Run {
        /// WebSocket listen address, e.g. 0.0.0.0:8181
        #[arg(long)]
        listen: Option<String>,
        /// Bitcoin Core RPC URL
        #[arg(long)]
        node_url: Option<String>,
    },

    /// Print the node's block count and chain tips
    Status,

    /// Decode a raw transaction or block and print it as JSON
    Decode {
        #[arg(long, value_enum, default_value_t = DecodeKind::Tx)]
        kind: DecodeKind,
        #[arg(long, value_enum, default_value_t = NetworkArg::Mainnet)]
        network: NetworkArg,
        /// Serialized bytes, hex-encoded
        hex: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecodeKind {
    Tx,
    Block,
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkArg {
    Mainnet,
    Testnet,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Testnet => Network::Testnet,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config,
        log_level,
        command,
    } = Cli::parse();
    let read_config = || load(config.as_deref(), log_level.as_deref());

    match command {
        Commands::Run { listen, node_url } => {
            let mut config = read_config()?;
            if let Some(listen) = listen {
                config.websocket.listen = listen;
            }
            if let Some(url) = node_url {
                config.node.url = url;
            }
            logging::init_tracing(&config.log);
            cmd_run::run(config).await
        }

        Commands::Status => cmd_status::run(&read_config()?).await,

        Commands::Decode { kind, network, hex } => {
            cmd_decode::run(&hex, matches!(kind, DecodeKind::Block), network.into())
        }
    }
}

fn load(path: Option<&Path>, log_level: Option<&str>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(level) = log_level {
        config.log.level = level.to_string();
    }
    Ok(config)
}
