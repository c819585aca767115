//! `chainpush run` — the long-running service.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chainpush_core::sync::{catch_up, sweep_mempool};
use chainpush_core::{AppContext, ChainStore, NodeRpc};
use chainpush_rpc::{BitcoindClient, NodePoller};
use chainpush_storage::{MemoryStore, SqliteStore};
use chainpush_ws::{PushServer, SessionRegistry};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::{Config, StorageBackend, StorageConfig};

pub async fn run(config: Config) -> Result<()> {
    let client = BitcoindClient::new(config.node.client_config())?;
    let height = client
        .get_block_count()
        .await
        .with_context(|| format!("node at {} unreachable", client.url()))?;
    info!(url = client.url(), height, network = %config.network, "node connected");
    let node: Arc<dyn NodeRpc> = Arc::new(client);

    let store = open_store(&config.storage).await?;
    let subscriptions = store
        .subscriptions()
        .await
        .context("cannot load subscriptions")?;

    let sessions = SessionRegistry::new();
    let (alerts_tx, mut alerts) = mpsc::unbounded_channel();
    let (ctx, workers) = AppContext::start(
        config.network,
        store,
        node.clone(),
        Arc::new(sessions.clone()),
        config.tracker.clone(),
        Some(alerts_tx),
    );
    ctx.router.load(subscriptions);

    let (stop, stop_rx) = watch::channel(false);
    let server = PushServer::bind(&config.websocket.listen, sessions, ctx.router.clone()).await?;
    let server_task = tokio::spawn(server.run(stop_rx.clone()));

    if config.catch_up.enabled {
        let blocks = catch_up(&ctx).await.context("catch-up failed")?;
        info!(blocks, "catch-up enqueued");
    }
    let mut seen_mempool = Vec::new();
    if config.catch_up.mempool_sweep {
        seen_mempool = node.mempool().await?;
        sweep_mempool(&ctx).await.context("mempool sweep failed")?;
    }

    // blocks mined after this point but before the first poll are recovered
    // by the tracker's parent backfill
    let tip = node.block_count().await?;
    let tip_hash = node.block_hash(tip).await?;
    let poller = NodePoller::new(
        node,
        ctx.rawblock.clone(),
        ctx.rawtx.clone(),
        config.node.poller_config(),
    )
    .starting_at(tip, tip_hash)
    .with_seen_mempool(seen_mempool);
    let poller_task = tokio::spawn(poller.run(stop_rx));

    info!(listen = %config.websocket.listen, "chainpush running");
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("shutdown requested");
                Ok(())
            }
            Err(e) => Err(anyhow!(e).context("cannot listen for Ctrl-C")),
        },
        Some(fatal) = alerts.recv() => {
            error!(error = %fatal, "pipeline halted");
            Err(anyhow!(fatal))
        }
    };

    let _ = stop.send(true);
    if let Err(e) = poller_task.await {
        error!(error = %e, "poller task failed");
    }
    if let Err(e) = server_task.await {
        error!(error = %e, "push server task failed");
    }
    ctx.shutdown(workers).await?;
    info!("chainpush stopped");
    outcome
}

async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ChainStore>> {
    let store: Arc<dyn ChainStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.path)
                .await
                .with_context(|| format!("cannot open database {}", config.path))?,
        ),
    };
    info!(backend = ?config.backend, "store opened");
    Ok(store)
}
