//! Output-script classification and address derivation.

use serde::{Deserialize, Serialize};

use crate::address::{base58, bech32, Network};
use crate::script::{Opcode as Op, Script};

/// The payment template an output script matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    /// OP_RETURN data carrier.
    Data,
    Other,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P2pkh => "P2PKH",
            Self::P2sh => "P2SH",
            Self::P2wpkh => "P2WPKH",
            Self::P2wsh => "P2WSH",
            Self::Data => "DATA",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one output script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub output_type: OutputType,
    /// Base58Check or Bech32 address; empty for `Data` and `Other`.
    pub address: String,
}

impl Classification {
    fn without_address(output_type: OutputType) -> Self {
        Self {
            output_type,
            address: String::new(),
        }
    }
}

/// Match `script` against the standard templates, first match wins.
pub fn classify(script: &Script, network: Network) -> Classification {
    let chunk = script.first_chunk().unwrap_or_default();
    match script.opcodes() {
        [Op::Return, ..] => Classification::without_address(OutputType::Data),
        [Op::Dup, Op::Hash160, Op::Data, Op::EqualVerify, Op::CheckSig] => Classification {
            output_type: OutputType::P2pkh,
            address: legacy_address(network.p2pkh_prefix(), chunk),
        },
        [Op::Hash160, Op::Data, Op::Equal] => Classification {
            output_type: OutputType::P2sh,
            address: legacy_address(network.p2sh_prefix(), chunk),
        },
        [Op::Op0, Op::Data] if chunk.len() == 20 => Classification {
            output_type: OutputType::P2wpkh,
            address: bech32::encode(network.hrp(), 0, chunk),
        },
        [Op::Op0, Op::Data] if chunk.len() == 32 => Classification {
            output_type: OutputType::P2wsh,
            address: bech32::encode(network.hrp(), 0, chunk),
        },
        _ => Classification::without_address(OutputType::Other),
    }
}

fn legacy_address(prefix: u8, hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + hash.len());
    payload.push(prefix);
    payload.extend_from_slice(hash);
    base58::encode_check(&payload)
}
