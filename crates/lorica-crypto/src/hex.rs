//! Hex codec, EIP-55 address checksums, and SQL identifier quoting.
//!
//! All hashes and identifiers in the protocol are lowercase hex. Addresses
//! are the only mixed-case values; their casing is the EIP-55 checksum and
//! comparisons are case-insensitive.

use sha3::{Digest, Keccak256};

use crate::{CryptoError, Result};

/// Decode a hex string, accepting an optional `0x` prefix.
///
/// The digit count must be even.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() % 2 != 0 {
        return Err(CryptoError::InvalidHex(format!(
            "odd digit count ({})",
            stripped.len()
        )));
    }
    hex::decode(stripped).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Decode a hex string into a fixed-width array.
pub fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N]> {
    let bytes = decode(input)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidLength {
            expected: N,
            actual: len,
        })
}

/// Encode bytes as lowercase hex without a prefix.
pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Encode bytes as lowercase hex with a `0x` prefix.
pub fn encode_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Apply the EIP-55 mixed-case checksum to a 20-byte address.
///
/// The lowercase hex of the address is hashed with Keccak-256; each hex
/// letter is uppercased when the corresponding nibble of the digest is 8
/// or greater.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let digest = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            digest[i / 2] >> 4
        } else {
            digest[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Compare two addresses case-insensitively, ignoring `0x` prefixes.
pub fn address_eq(a: &str, b: &str) -> bool {
    let a = a.strip_prefix("0x").unwrap_or(a);
    let b = b.strip_prefix("0x").unwrap_or(b);
    a.eq_ignore_ascii_case(b)
}

/// Quote a SQL identifier: wrap in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check whether a string is a valid bare SQL identifier
/// (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
