//! Transaction decoding.

use serde::{Deserialize, Serialize};

use crate::address::Network;
use crate::classify::{classify, OutputType};
use crate::cursor::ByteCursor;
use crate::error::DecodeError;
use crate::hash::{sha256d, to_display_hex};
use crate::script::Script;

// smallest possible input: hash + index + empty script + sequence
const MIN_INPUT_SIZE: u64 = 32 + 4 + 1 + 4;
// smallest possible output: value + empty script
const MIN_OUTPUT_SIZE: u64 = 8 + 1;

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Spent transaction id, display order.
    pub prev_hash: String,
    pub prev_index: u32,
    pub script: Script,
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "hex_items")]
    pub witness: Vec<Vec<u8>>,
}

/// A classified transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    #[serde(rename = "type")]
    pub output_type: OutputType,
    pub address: String,
    pub script: Script,
}

impl TxOutput {
    /// Decode and classify an output script.
    pub fn new(value: u64, script_bytes: &[u8], network: Network) -> Self {
        let script = Script::decode(script_bytes);
        let classification = classify(&script, network);
        Self {
            value,
            output_type: classification.output_type,
            address: classification.address,
            script,
        }
    }

    /// Hex of the first pushed data chunk (the OP_RETURN payload for `Data` outputs).
    pub fn data_hex(&self) -> Option<String> {
        self.script.first_chunk().map(hex::encode)
    }
}

/// A decoded transaction plus its locally tracked inclusion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Display-order hash of the non-witness serialization.
    pub txid: String,
    /// Display-order hash of the full serialization.
    pub wtxid: String,
    pub version: u32,
    pub lock_time: u32,
    pub has_witness: bool,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Serialized size in bytes.
    pub size: usize,
    /// Hash of the block this transaction was seen in, if any.
    pub included_in: Option<String>,
    /// Height of `included_in`; 0 while unknown or unconfirmed.
    pub included_at_height: u64,
    pub first_seen: i64,
    pub last_updated: i64,
}

impl Transaction {
    /// Decode a standalone transaction. The buffer must be consumed exactly.
    pub fn decode(bytes: &[u8], network: Network) -> Result<Self, DecodeError> {
        let mut cur = ByteCursor::new(bytes);
        let tx = Self::read(&mut cur, network)?;
        if !cur.is_at_end() {
            return Err(DecodeError::LengthMismatch {
                consumed: cur.position(),
                total: cur.len(),
            });
        }
        Ok(tx)
    }

    pub fn decode_hex(s: &str, network: Network) -> Result<Self, DecodeError> {
        Self::decode(&hex::decode(s.trim())?, network)
    }

    /// Read one transaction at the cursor, as found inside a block.
    pub fn read(cur: &mut ByteCursor<'_>, network: Network) -> Result<Self, DecodeError> {
        let start = cur.position();
        let version = cur.read_u32_le()?;

        let has_witness = cur.peek(2) == Some(&[0x00, 0x01][..]);
        if has_witness {
            cur.read_bytes(2)?;
        }
        let body_start = cur.position();

        let input_count = read_count(cur, MIN_INPUT_SIZE)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let prev_hash = to_display_hex(&cur.read_hash()?);
            let prev_index = cur.read_u32_le()?;
            let script = Script::decode(cur.read_var_bytes()?);
            let sequence = cur.read_u32_le()?;
            inputs.push(TxInput {
                prev_hash,
                prev_index,
                script,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = read_count(cur, MIN_OUTPUT_SIZE)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = cur.read_u64_le()?;
            let script = cur.read_var_bytes()?;
            outputs.push(TxOutput::new(value, script, network));
        }
        let body_end = cur.position();

        if has_witness {
            for input in inputs.iter_mut() {
                input.witness = cur.read_vector()?.into_iter().map(<[u8]>::to_vec).collect();
            }
        }

        let lock_start = cur.position();
        let lock_time = cur.read_u32_le()?;
        let end = cur.position();

        let full = cur.span(start, end);
        let wtxid = sha256d(full);
        let txid = if has_witness {
            let mut stripped = Vec::with_capacity(full.len());
            stripped.extend_from_slice(cur.span(start, start + 4));
            stripped.extend_from_slice(cur.span(body_start, body_end));
            stripped.extend_from_slice(cur.span(lock_start, end));
            sha256d(&stripped)
        } else {
            wtxid
        };

        Ok(Self {
            txid: to_display_hex(&txid),
            wtxid: to_display_hex(&wtxid),
            version,
            lock_time,
            has_witness,
            inputs,
            outputs,
            size: end - start,
            included_in: None,
            included_at_height: 0,
            first_seen: 0,
            last_updated: 0,
        })
    }

    /// Stamp the first-seen and last-updated times.
    pub fn seen_at(mut self, timestamp: i64) -> Self {
        self.first_seen = timestamp;
        self.last_updated = timestamp;
        self
    }

    /// `true` once the transaction is known to be inside a block.
    pub fn is_confirmed(&self) -> bool {
        self.included_in.is_some()
    }

    /// Record (or clear, with `None`) the including block.
    pub fn set_inclusion(&mut self, block: Option<(String, u64)>, timestamp: i64) {
        match block {
            Some((hash, height)) => {
                self.included_in = Some(hash);
                self.included_at_height = height;
            }
            None => {
                self.included_in = None;
                self.included_at_height = 0;
            }
        }
        self.last_updated = timestamp;
    }
}

/// Read a varint item count, rejecting counts the remaining bytes cannot hold.
fn read_count(cur: &mut ByteCursor<'_>, min_item_size: u64) -> Result<usize, DecodeError> {
    let offset = cur.position();
    let count = cur.read_varint()?;
    if count.saturating_mul(min_item_size) > cur.remaining() as u64 {
        return Err(DecodeError::LengthOverflow { offset, length: count });
    }
    Ok(count as usize)
}

mod hex_items {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(items.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .into_iter()
            .map(|s| hex::decode(s).map_err(D::Error::custom))
            .collect()
    }
}
