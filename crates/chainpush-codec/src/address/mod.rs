//! Checksummed address encodings.
//!
//! - [`base58`] — Base58Check, for P2PKH and P2SH
//! - [`bech32`] — BIP-173 Bech32, for segwit v0 programs

pub mod base58;
pub mod bech32;

use serde::{Deserialize, Serialize};

/// Which chain's address prefixes to render with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    /// Base58Check version byte for pay-to-pubkey-hash.
    pub fn p2pkh_prefix(self) -> u8 {
        match self {
            Self::Mainnet => 0x00,
            Self::Testnet => 0x6f,
        }
    }

    /// Base58Check version byte for pay-to-script-hash.
    pub fn p2sh_prefix(self) -> u8 {
        match self {
            Self::Mainnet => 0x05,
            Self::Testnet => 0xc4,
        }
    }

    /// Bech32 human-readable part.
    pub fn hrp(self) -> &'static str {
        match self {
            Self::Mainnet => "bc",
            Self::Testnet => "tb",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}
