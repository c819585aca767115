//! chainpush-core — chain-state tracking, ingestion queues, and subscription
//! routing for ChainPush.
//!
//! # Architecture
//!
//! ```text
//! feed ──rawtx──▶ TxIngest ─────────────┐
//!      ──rawblock▶ BlockIngest ──┐      ▼
//!                                │   SubscriptionRouter ──▶ Broadcaster (clients)
//!                                │      │
//!                                ▼      ▼
//!                         persist queue (PersistWrite)
//!                                │
//!                                ▼
//!                         PersistHandler ──▶ ChainStateTracker ──▶ ChainStore
//!                                                   │
//!                                                   └──▶ NodeRpc (backfill)
//! ```
//!
//! Every queue is drained by exactly one worker, so the store has a single
//! writer and items on one queue are handled in arrival order.

pub mod context;
pub mod error;
pub mod ingest;
pub mod node;
pub mod persist;
pub mod pipeline;
pub mod router;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use context::{AppContext, PipelineWorkers};
pub use error::PushError;
pub use node::{ChainTip, NodeRpc};
pub use persist::{PersistHandler, PersistWrite};
pub use pipeline::{Inbox, WorkHandler, WorkQueue, Worker};
pub use router::{Broadcaster, NoopBroadcaster, SubscriptionRouter};
pub use store::ChainStore;
pub use tracker::{ChainStateTracker, IngestOutcome, TrackerConfig};
pub use types::{ReorgEvent, Subscription, SubscriptionKind};
