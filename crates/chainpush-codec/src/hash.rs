//! Double SHA-256 and display-order hash helpers.

use sha2::{Digest, Sha256};

use crate::error::DecodeError;

/// SHA-256(SHA-256(data)).
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Render a wire-order hash the way nodes display it (byte-reversed hex).
pub fn to_display_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a display-order hash back into wire order.
pub fn from_display_hex(s: &str) -> Result<[u8; 32], DecodeError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out)?;
    out.reverse();
    Ok(out)
}
