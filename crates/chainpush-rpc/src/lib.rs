//! chainpush-rpc — talking to a Bitcoin Core node.
//!
//! - [`BitcoindClient`]: JSON-RPC 1.0 over HTTP with basic auth and retry,
//!   implementing [`chainpush_core::NodeRpc`].
//! - [`NodePoller`]: the raw-byte feed. Polls the node for new blocks and
//!   mempool transactions and pushes their bytes onto the ingestion queues.

pub mod client;
pub mod error;
pub mod poller;
pub mod request;
pub mod retry;

pub use client::{BitcoindClient, ClientConfig};
pub use error::TransportError;
pub use poller::{NodePoller, PollStats, PollerConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use retry::{RetryConfig, RetryPolicy};
