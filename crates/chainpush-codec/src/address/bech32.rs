//! Bech32 encoding for segwit v0 addresses (BIP-173).

use crate::error::AddressError;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];
const CHECKSUM_LEN: usize = 6;

fn polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    let mut chk: u32 = 1;
    for value in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(value);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

/// High bits of each char, a zero separator, then the low bits.
fn hrp_expand(hrp: &str) -> Vec<u8> {
    let bytes = hrp.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() * 2 + 1);
    out.extend(bytes.iter().map(|b| b >> 5));
    out.push(0);
    out.extend(bytes.iter().map(|b| b & 0x1f));
    out
}

/// Six checksum symbols over `hrp` and the 5-bit `data` words.
pub fn create_checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let values = hrp_expand(hrp)
        .into_iter()
        .chain(data.iter().copied())
        .chain([0u8; CHECKSUM_LEN]);
    let pm = polymod(values) ^ 1;
    let mut out = [0u8; CHECKSUM_LEN];
    for (i, symbol) in out.iter_mut().enumerate() {
        *symbol = ((pm >> (5 * (5 - i))) & 0x1f) as u8;
    }
    out
}

/// `true` if `data` (including its trailing checksum symbols) verifies under `hrp`.
pub fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    polymod(hrp_expand(hrp).into_iter().chain(data.iter().copied())) == 1
}

/// Regroup bits, most significant first.
///
/// With `pad`, a partial trailing group is zero-filled. Without it, leftover
/// bits are dropped and must be zero.
pub fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max = (1u32 << to) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
    for &value in data {
        let value = u32::from(value);
        if value >> from != 0 {
            return None;
        }
        acc = (acc << from) | value;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
        acc &= (1 << bits) - 1;
    }
    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || (acc << (to - bits)) & max != 0 {
        return None;
    }
    Some(out)
}

/// Encode a witness program as `hrp + '1' + version + data + checksum`.
pub fn encode(hrp: &str, witness_version: u8, program: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + program.len() * 8 / 5 + 1);
    data.push(witness_version & 0x1f);
    // zero-padded; strict grouping would lose the last bit of a 32-byte program
    data.extend(convert_bits(program, 8, 5, true).unwrap_or_default());
    let checksum = create_checksum(hrp, &data);

    let mut out = String::with_capacity(hrp.len() + 1 + data.len() + CHECKSUM_LEN);
    out.push_str(hrp);
    out.push('1');
    out.extend(data.iter().chain(checksum.iter()).map(|d| CHARSET[*d as usize] as char));
    out
}

/// A decoded segwit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessAddress {
    pub hrp: String,
    pub version: u8,
    pub program: Vec<u8>,
}

/// Parse and checksum-verify a bech32 segwit address.
pub fn decode(s: &str) -> Result<WitnessAddress, AddressError> {
    let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(AddressError::MixedCase);
    }
    let s = s.to_ascii_lowercase();
    let sep = s.rfind('1').ok_or(AddressError::MissingSeparator)?;
    let (hrp, rest) = (&s[..sep], &s[sep + 1..]);
    if hrp.is_empty() || rest.len() < CHECKSUM_LEN + 1 {
        return Err(AddressError::TooShort);
    }

    let data = rest
        .chars()
        .map(|c| {
            CHARSET
                .iter()
                .position(|x| char::from(*x) == c)
                .map(|p| p as u8)
                .ok_or(AddressError::InvalidCharacter(c))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if !verify_checksum(hrp, &data) {
        return Err(AddressError::ChecksumMismatch);
    }

    let words = &data[..data.len() - CHECKSUM_LEN];
    let program = convert_bits(&words[1..], 5, 8, false).ok_or(AddressError::InvalidPadding)?;
    Ok(WitnessAddress {
        hrp: hrp.to_string(),
        version: words[0],
        program,
    })
}
