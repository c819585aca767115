//! Block and header decoding.

use serde::{Deserialize, Serialize};

use crate::address::Network;
use crate::cursor::ByteCursor;
use crate::error::DecodeError;
use crate::hash::{sha256d, to_display_hex};
use crate::tx::Transaction;

// coinbase-only minimum: version, one input, one output, lock time
const MIN_TX_SIZE: u64 = 4 + 1 + 41 + 1 + 9 + 4;

/// The 80-byte block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Display-order hash of the parent block.
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Display-order double SHA-256 of the 80 header bytes.
    pub hash: String,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    pub fn read(cur: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        let raw = cur.read_bytes(Self::SIZE)?;
        let mut h = ByteCursor::new(raw);
        Ok(Self {
            version: h.read_u32_le()?,
            prev_hash: to_display_hex(&h.read_hash()?),
            merkle_root: to_display_hex(&h.read_hash()?),
            timestamp: h.read_u32_le()?,
            bits: h.read_u32_le()?,
            nonce: h.read_u32_le()?,
            hash: to_display_hex(&sha256d(raw)),
        })
    }
}

/// A decoded block plus its locally tracked chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Serialized size in bytes.
    pub size: usize,
    /// Assigned by the chain tracker; 0 until then.
    pub height: u64,
    pub first_seen: i64,
    pub orphaned: bool,
    pub is_chain_tip: bool,
}

impl Block {
    /// Decode a raw block (header, tx count, transactions).
    ///
    /// The buffer must be consumed exactly; anything else is
    /// [`DecodeError::LengthMismatch`]. Every transaction records this block
    /// as its inclusion block.
    pub fn decode(bytes: &[u8], network: Network) -> Result<Self, DecodeError> {
        let mut cur = ByteCursor::new(bytes);
        let header = BlockHeader::read(&mut cur)?;

        let offset = cur.position();
        let count = cur.read_varint()?;
        if count.saturating_mul(MIN_TX_SIZE) > cur.remaining() as u64 {
            return Err(DecodeError::LengthOverflow { offset, length: count });
        }

        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut tx = Transaction::read(&mut cur, network)?;
            tx.included_in = Some(header.hash.clone());
            transactions.push(tx);
        }

        if !cur.is_at_end() {
            return Err(DecodeError::LengthMismatch {
                consumed: cur.position(),
                total: cur.len(),
            });
        }

        Ok(Self {
            header,
            transactions,
            size: bytes.len(),
            height: 0,
            first_seen: 0,
            orphaned: false,
            is_chain_tip: false,
        })
    }

    pub fn decode_hex(s: &str, network: Network) -> Result<Self, DecodeError> {
        Self::decode(&hex::decode(s.trim())?, network)
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    pub fn prev_hash(&self) -> &str {
        &self.header.prev_hash
    }

    /// Stamp the first-seen time on the block and its transactions.
    pub fn seen_at(mut self, timestamp: i64) -> Self {
        self.first_seen = timestamp;
        self.transactions = self
            .transactions
            .into_iter()
            .map(|tx| tx.seen_at(timestamp))
            .collect();
        self
    }

    /// Set the height on the block and on its transactions' inclusion records.
    pub fn assign_height(&mut self, height: u64) {
        self.height = height;
        for tx in &mut self.transactions {
            tx.included_at_height = height;
        }
    }
}
