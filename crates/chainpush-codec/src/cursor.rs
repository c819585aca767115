//! Sequential little-endian reader over node-serialized bytes.

use crate::error::DecodeError;

/// A bounds-checked cursor over a borrowed byte buffer.
///
/// Every read advances the position; a read past the end fails with
/// [`DecodeError::UnexpectedEof`] and leaves the position unchanged.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total length of the backing buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `true` once every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// The bytes between two offsets already visited by this cursor.
    pub fn span(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos.checked_add(n)?)
    }

    /// Consume `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a fixed 32-byte hash in wire order.
    pub fn read_hash(&mut self) -> Result<[u8; 32], DecodeError> {
        self.read_array()
    }

    /// Read a bitcoin variable-length integer (1, 3, 5, or 9 bytes).
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        match self.read_u8()? {
            0xFD => self.read_u16_le().map(u64::from),
            0xFE => self.read_u32_le().map(u64::from),
            0xFF => self.read_u64_le(),
            n => Ok(u64::from(n)),
        }
    }

    /// Read a varint length followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let offset = self.pos;
        let length = self.read_varint()?;
        let n = usize::try_from(length).map_err(|_| DecodeError::LengthOverflow { offset, length })?;
        self.read_bytes(n)
    }

    /// Read a varint count followed by that many length-prefixed slices.
    pub fn read_vector(&mut self) -> Result<Vec<&'a [u8]>, DecodeError> {
        let offset = self.pos;
        let count = self.read_varint()?;
        // each item needs at least its one-byte length prefix
        if count > self.remaining() as u64 {
            return Err(DecodeError::LengthOverflow { offset, length: count });
        }
        (0..count).map(|_| self.read_var_bytes()).collect()
    }
}

/// Append the shortest varint encoding of `n` to `out`.
pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xFC => out.push(n as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}
