//! Base58 and Base58Check, as used by legacy (P2PKH / P2SH) addresses.

use crate::error::AddressError;
use crate::hash::sha256d;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Encode bytes as base58. Each leading zero byte becomes a leading `'1'`.
pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();

    // base-58 digits, least significant first
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 138 / 100 + 1);
    for &byte in &bytes[zeros..] {
        let mut carry = u32::from(byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|d| ALPHABET[*d as usize] as char));
    out
}

/// Decode a base58 string back into bytes.
pub fn decode(s: &str) -> Result<Vec<u8>, AddressError> {
    let ones = s.bytes().take_while(|c| *c == b'1').count();

    // base-256 bytes, least significant first
    let mut bytes: Vec<u8> = Vec::with_capacity(s.len());
    for c in s.chars().skip(ones) {
        let value = ALPHABET
            .iter()
            .position(|a| char::from(*a) == c)
            .ok_or(AddressError::InvalidCharacter(c))? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; ones];
    out.extend(bytes.iter().rev());
    Ok(out)
}

/// `payload ‖ first four bytes of sha256d(payload)`.
pub fn add_checksum(payload: &[u8]) -> Vec<u8> {
    let checksum = sha256d(payload);
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum[..4]);
    out
}

/// Split off and verify the trailing four checksum bytes.
///
/// Returns `None` if the data is shorter than a checksum or the checksum
/// does not match.
pub fn verify_and_remove_checksum(data: &[u8]) -> Option<Vec<u8>> {
    let split = data.len().checked_sub(4)?;
    let (payload, checksum) = data.split_at(split);
    (sha256d(payload)[..4] == *checksum).then(|| payload.to_vec())
}

/// Base58Check-encode a versioned payload.
pub fn encode_check(payload: &[u8]) -> String {
    encode(&add_checksum(payload))
}

/// Decode and verify a Base58Check string.
pub fn decode_check(s: &str) -> Result<Vec<u8>, AddressError> {
    let raw = decode(s)?;
    if raw.len() < 4 {
        return Err(AddressError::TooShort);
    }
    verify_and_remove_checksum(&raw).ok_or(AddressError::ChecksumMismatch)
}
