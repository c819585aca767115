//! Error types for the ChainPush wire decoders.

use thiserror::Error;

/// Errors that can occur while decoding a transaction, block, or header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unexpected end of buffer at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Length prefix {length} at offset {offset} does not fit in memory")]
    LengthOverflow { offset: usize, length: u64 },

    #[error("Length mismatch: consumed {consumed} of {total} bytes")]
    LengthMismatch { consumed: usize, total: usize },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

impl DecodeError {
    /// Returns `true` if the buffer decoded cleanly but carried trailing bytes.
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self, Self::LengthMismatch { .. })
    }
}

impl From<hex::FromHexError> for DecodeError {
    fn from(e: hex::FromHexError) -> Self {
        Self::InvalidHex(e.to_string())
    }
}

/// Errors from parsing textual addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Missing '1' separator")]
    MissingSeparator,

    #[error("Mixed-case bech32 string")]
    MixedCase,

    #[error("Non-zero padding in bech32 data")]
    InvalidPadding,

    #[error("Address too short")]
    TooShort,
}
