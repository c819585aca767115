//! Transport-level error types.

use chainpush_core::PushError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while calling the node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, 5xx without a body, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The node rejected the configured credentials.
    #[error("Unauthorized: check node.user / node.password")]
    Unauthorized,

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            // RPC_IN_WARMUP: the node is still loading
            Self::Rpc(e) => e.code == -28,
            _ => false,
        }
    }
}

impl From<TransportError> for PushError {
    fn from(e: TransportError) -> Self {
        PushError::Rpc(e.to_string())
    }
}
