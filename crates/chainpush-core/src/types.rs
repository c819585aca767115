//! Shared types for the ChainPush pipeline.

use chainpush_codec::{OutputType, TxOutput};
use serde::{Deserialize, Serialize};

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// What a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Outputs paying an exact address.
    Address,
    /// OP_RETURN outputs whose payload hex starts with a prefix.
    OpReturnPrefix,
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::OpReturnPrefix => write!(f, "op_return_prefix"),
        }
    }
}

/// A client's interest in an address or OP_RETURN prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub kind: SubscriptionKind,
    pub target: String,
}

impl Subscription {
    pub fn address(target: impl Into<String>) -> Self {
        Self {
            kind: SubscriptionKind::Address,
            target: target.into(),
        }
    }

    pub fn op_return_prefix(target: impl Into<String>) -> Self {
        Self {
            kind: SubscriptionKind::OpReturnPrefix,
            target: target.into(),
        }
    }

    /// Returns `true` if `output` triggers this subscription.
    pub fn matches(&self, output: &TxOutput) -> bool {
        match self.kind {
            SubscriptionKind::Address => {
                !output.address.is_empty() && output.address == self.target
            }
            SubscriptionKind::OpReturnPrefix => {
                output.output_type == OutputType::Data
                    && output.data_hex().is_some_and(|data| {
                        data.to_ascii_lowercase()
                            .starts_with(&self.target.to_ascii_lowercase())
                    })
            }
        }
    }
}

// ─── Reorgs ──────────────────────────────────────────────────────────────────

/// Describes a chain reorganization handled by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Height of the first block past the common ancestor.
    pub fork_height: u64,
    /// Number of blocks that left the canonical chain.
    pub depth: u64,
    /// Blocks now orphaned, most recent first.
    pub orphaned: Vec<String>,
    /// Blocks now canonical, most recent first (includes the new tip).
    pub reconnected: Vec<String>,
    /// Transactions whose inclusion was cleared.
    pub unconfirmed: usize,
}
