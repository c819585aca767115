//! Error types for the ChainPush pipeline.

use chainpush_codec::DecodeError;
use thiserror::Error;

/// Errors that can occur while ingesting, tracking, or persisting chain data.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Local chain history cannot be reconciled with the node's.
    #[error("Chain state inconsistent: {0}")]
    ConsistencyFatal(String),

    #[error("Queue '{queue}' is closed")]
    QueueClosed { queue: String },

    #[error("{0}")]
    Other(String),
}

impl PushError {
    /// Returns `true` if the error must stop the service rather than skip an item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConsistencyFatal(_))
    }
}
