//! Wiring of queues, workers, and shared services.

use std::sync::Arc;

use chainpush_codec::Network;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::PushError;
use crate::ingest::{BlockIngest, TxIngest};
use crate::node::NodeRpc;
use crate::persist::{PersistHandler, PersistWrite};
use crate::pipeline::{WorkQueue, Worker};
use crate::router::{Broadcaster, SubscriptionRouter};
use crate::store::ChainStore;
use crate::tracker::{ChainStateTracker, TrackerConfig};

/// Everything a running service shares, built once at startup.
pub struct AppContext {
    pub network: Network,
    pub store: Arc<dyn ChainStore>,
    pub node: Arc<dyn NodeRpc>,
    pub router: Arc<SubscriptionRouter>,
    pub persist: WorkQueue<PersistWrite>,
    pub rawtx: WorkQueue<Vec<u8>>,
    pub rawblock: WorkQueue<Vec<u8>>,
}

/// Join handles for the three pipeline workers.
pub struct PipelineWorkers {
    rawtx: Worker,
    rawblock: Worker,
    persist: Worker,
}

impl AppContext {
    /// Build the router and start the `persist`, `rawblock`, and `rawtx` workers.
    ///
    /// Fatal errors raised by any worker are sent on `alerts`.
    pub fn start(
        network: Network,
        store: Arc<dyn ChainStore>,
        node: Arc<dyn NodeRpc>,
        broadcaster: Arc<dyn Broadcaster>,
        tracker: TrackerConfig,
        alerts: Option<mpsc::UnboundedSender<PushError>>,
    ) -> (Arc<Self>, PipelineWorkers) {
        let (persist, persist_inbox) = WorkQueue::new("persist");
        let (rawblock, rawblock_inbox) = WorkQueue::new("rawblock");
        let (rawtx, rawtx_inbox) = WorkQueue::new("rawtx");

        let router = Arc::new(SubscriptionRouter::new(broadcaster, persist.clone()));
        let tracker = ChainStateTracker::new(store.clone(), node.clone(), network, tracker);

        let workers = PipelineWorkers {
            persist: persist_inbox.spawn(
                Arc::new(PersistHandler::new(store.clone(), tracker, router.clone())),
                alerts.clone(),
            ),
            rawblock: rawblock_inbox.spawn(
                Arc::new(BlockIngest::new(network, router.clone(), persist.clone())),
                alerts.clone(),
            ),
            rawtx: rawtx_inbox.spawn(Arc::new(TxIngest::new(network, router.clone())), alerts),
        };
        info!(%network, "pipeline started");

        let ctx = Arc::new(Self {
            network,
            store,
            node,
            router,
            persist,
            rawtx,
            rawblock,
        });
        (ctx, workers)
    }

    /// Drain and stop the workers: the feed queues first, then persistence,
    /// so writes they produced are not lost.
    pub async fn shutdown(&self, workers: PipelineWorkers) -> Result<(), PushError> {
        let txs = self.rawtx.shutdown(workers.rawtx).await?;
        let blocks = self.rawblock.shutdown(workers.rawblock).await?;
        let writes = self.persist.shutdown(workers.persist).await?;
        info!(txs, blocks, writes, "pipeline drained");
        Ok(())
    }
}
