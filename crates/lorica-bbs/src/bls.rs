//! BLS12-381 field and point helpers.
//!
//! Points serialize in the zcash/ETH compressed convention: big-endian
//! x-coordinate with the compression, infinity, and y-sign flags in the top
//! three bits of the first byte (48 bytes for G1, 96 for G2). The constant
//! G1 generator therefore compresses to `97f1d3a7…c6bb`.
//!
//! Hash-to-G1 here is scalar multiplication of the generator by a hashed
//! scalar. It is *not* a random-oracle hash-to-curve and is weaker than the
//! standardized construction; it is the fixed scheme the wire format
//! requires.

use ark_bls12_381::{g1, g2, Bls12_381, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::pairing::Pairing;
use ark_ec::short_weierstrass::SWCurveConfig;
use ark_ec::AffineRepr;
use ark_ff::{BigInteger, Field, PrimeField};
use sha2::{Digest, Sha256};

use crate::{BbsError, Result};

/// Compressed G1 point length.
pub const G1_LEN: usize = 48;

/// Compressed G2 point length.
pub const G2_LEN: usize = 96;

/// Big-endian Fr length.
pub const FR_LEN: usize = 32;

const FLAG_COMPRESSED: u8 = 0x80;
const FLAG_INFINITY: u8 = 0x40;
const FLAG_SIGN: u8 = 0x20;
const FLAG_MASK: u8 = 0xe0;

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Reduce arbitrary big-endian bytes into Fr (mod r).
pub fn fr_from_be_bytes(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Parse a hex scalar of at most 256 bits, reducing mod r.
pub fn fr_from_hex(input: &str) -> Result<Fr> {
    let bytes = lorica_crypto::hex::decode(input)
        .map_err(|e| BbsError::InvalidScalar(e.to_string()))?;
    if bytes.len() > FR_LEN {
        return Err(BbsError::InvalidScalar(format!(
            "scalar too long ({} bytes)",
            bytes.len()
        )));
    }
    Ok(fr_from_be_bytes(&bytes))
}

/// The canonical 32-byte big-endian form of a scalar.
pub fn fr_to_bytes(scalar: &Fr) -> [u8; FR_LEN] {
    let bytes = scalar.into_bigint().to_bytes_be();
    let mut out = [0u8; FR_LEN];
    out.copy_from_slice(&bytes);
    out
}

/// Lowercase hex of the canonical scalar form.
pub fn fr_to_hex(scalar: &Fr) -> String {
    hex::encode(fr_to_bytes(scalar))
}

/// Sample a uniform scalar from the system CSPRNG.
pub fn fr_random() -> Fr {
    use ark_std::UniformRand;
    Fr::rand(&mut rand::rngs::OsRng)
}

/// Hash arbitrary inputs to a scalar:
/// `Fr( SHA256( SHA256(inputs…) || "expand" ) mod r )`.
///
/// Multiple inputs are concatenated before the first SHA-256.
pub fn hash_to_scalar(inputs: &[&[u8]]) -> Fr {
    let mut first = Sha256::new();
    for input in inputs {
        first.update(input);
    }
    let inner = first.finalize();

    let mut second = Sha256::new();
    second.update(inner);
    second.update(b"expand");
    fr_from_be_bytes(&second.finalize())
}

/// Hash a domain string and inputs to a G1 point as
/// `hash_to_scalar(domain || inputs…) · G1`.
pub fn hash_to_g1(domain: &str, inputs: &[&[u8]]) -> G1Affine {
    let mut data: Vec<&[u8]> = Vec::with_capacity(inputs.len() + 1);
    data.push(domain.as_bytes());
    data.extend_from_slice(inputs);
    let scalar = hash_to_scalar(&data);
    (G1Affine::generator() * scalar).into()
}

// ---------------------------------------------------------------------------
// Point serialization (zcash/ETH convention)
// ---------------------------------------------------------------------------

fn fq_to_be48(value: &Fq) -> [u8; G1_LEN] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; G1_LEN];
    out.copy_from_slice(&bytes);
    out
}

/// Whether `y` is the lexicographically largest of `{y, -y}`.
fn fq_is_lex_largest(y: &Fq) -> bool {
    y.into_bigint() > (-*y).into_bigint()
}

/// Lexicographic comparison for Fq2 orders by `c1`, then `c0`.
fn fq2_is_lex_largest(y: &Fq2) -> bool {
    let neg = -*y;
    match y.c1.into_bigint().cmp(&neg.c1.into_bigint()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => y.c0.into_bigint() > neg.c0.into_bigint(),
    }
}

fn fq_from_canonical_be(bytes: &[u8; G1_LEN]) -> Result<Fq> {
    let value = Fq::from_be_bytes_mod_order(bytes);
    // Reject non-canonical encodings (candidate ≥ field modulus).
    if fq_to_be48(&value) != *bytes {
        return Err(BbsError::InvalidPoint("non-canonical coordinate".into()));
    }
    Ok(value)
}

/// Serialize a G1 point to the 48-byte compressed form.
pub fn g1_to_compressed(point: &G1Affine) -> [u8; G1_LEN] {
    if point.is_zero() {
        let mut out = [0u8; G1_LEN];
        out[0] = FLAG_COMPRESSED | FLAG_INFINITY;
        return out;
    }
    let mut out = fq_to_be48(&point.x);
    out[0] |= FLAG_COMPRESSED;
    if fq_is_lex_largest(&point.y) {
        out[0] |= FLAG_SIGN;
    }
    out
}

/// Deserialize a 48-byte compressed G1 point, enforcing subgroup membership.
pub fn g1_from_compressed(bytes: &[u8]) -> Result<G1Affine> {
    let bytes: &[u8; G1_LEN] = bytes
        .try_into()
        .map_err(|_| BbsError::InvalidPoint(format!("G1 must be {G1_LEN} bytes")))?;
    let flags = bytes[0] & FLAG_MASK;
    if flags & FLAG_COMPRESSED == 0 {
        return Err(BbsError::InvalidPoint("compression flag not set".into()));
    }
    if flags & FLAG_INFINITY != 0 {
        if bytes[0] & !FLAG_MASK != 0 || bytes[1..].iter().any(|b| *b != 0) {
            return Err(BbsError::InvalidPoint("malformed infinity encoding".into()));
        }
        return Ok(G1Affine::zero());
    }

    let mut x_bytes = *bytes;
    x_bytes[0] &= !FLAG_MASK;
    let x = fq_from_canonical_be(&x_bytes)?;

    let y2 = x * x * x + g1::Config::COEFF_B;
    let y = y2
        .sqrt()
        .ok_or_else(|| BbsError::InvalidPoint("x is not on the curve".into()))?;
    let greatest = flags & FLAG_SIGN != 0;
    let y = if fq_is_lex_largest(&y) == greatest { y } else { -y };

    let point = G1Affine::new_unchecked(x, y);
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(BbsError::InvalidPoint("not in the prime-order subgroup".into()));
    }
    Ok(point)
}

/// Serialize a G2 point to the 96-byte compressed form
/// (`BE(x.c1) || BE(x.c0)`, flags on the first byte).
pub fn g2_to_compressed(point: &G2Affine) -> [u8; G2_LEN] {
    let mut out = [0u8; G2_LEN];
    if point.is_zero() {
        out[0] = FLAG_COMPRESSED | FLAG_INFINITY;
        return out;
    }
    out[..G1_LEN].copy_from_slice(&fq_to_be48(&point.x.c1));
    out[G1_LEN..].copy_from_slice(&fq_to_be48(&point.x.c0));
    out[0] |= FLAG_COMPRESSED;
    if fq2_is_lex_largest(&point.y) {
        out[0] |= FLAG_SIGN;
    }
    out
}

/// Deserialize a 96-byte compressed G2 point, enforcing subgroup membership.
pub fn g2_from_compressed(bytes: &[u8]) -> Result<G2Affine> {
    let bytes: &[u8; G2_LEN] = bytes
        .try_into()
        .map_err(|_| BbsError::InvalidPoint(format!("G2 must be {G2_LEN} bytes")))?;
    let flags = bytes[0] & FLAG_MASK;
    if flags & FLAG_COMPRESSED == 0 {
        return Err(BbsError::InvalidPoint("compression flag not set".into()));
    }
    if flags & FLAG_INFINITY != 0 {
        if bytes[0] & !FLAG_MASK != 0 || bytes[1..].iter().any(|b| *b != 0) {
            return Err(BbsError::InvalidPoint("malformed infinity encoding".into()));
        }
        return Ok(G2Affine::zero());
    }

    let mut c1_bytes = [0u8; G1_LEN];
    c1_bytes.copy_from_slice(&bytes[..G1_LEN]);
    c1_bytes[0] &= !FLAG_MASK;
    let mut c0_bytes = [0u8; G1_LEN];
    c0_bytes.copy_from_slice(&bytes[G1_LEN..]);

    let x = Fq2::new(fq_from_canonical_be(&c0_bytes)?, fq_from_canonical_be(&c1_bytes)?);

    let y2 = x * x * x + g2::Config::COEFF_B;
    let y = y2
        .sqrt()
        .ok_or_else(|| BbsError::InvalidPoint("x is not on the curve".into()))?;
    let greatest = flags & FLAG_SIGN != 0;
    let y = if fq2_is_lex_largest(&y) == greatest { y } else { -y };

    let point = G2Affine::new_unchecked(x, y);
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(BbsError::InvalidPoint("not in the prime-order subgroup".into()));
    }
    Ok(point)
}

/// Lowercase hex of a compressed G1 point.
pub fn g1_to_hex(point: &G1Affine) -> String {
    hex::encode(g1_to_compressed(point))
}

/// Parse a compressed G1 point from hex.
pub fn g1_from_hex(input: &str) -> Result<G1Affine> {
    let bytes = lorica_crypto::hex::decode(input)
        .map_err(|e| BbsError::InvalidPoint(e.to_string()))?;
    g1_from_compressed(&bytes)
}

/// Lowercase hex of a compressed G2 point.
pub fn g2_to_hex(point: &G2Affine) -> String {
    hex::encode(g2_to_compressed(point))
}

/// Parse a compressed G2 point from hex.
pub fn g2_from_hex(input: &str) -> Result<G2Affine> {
    let bytes = lorica_crypto::hex::decode(input)
        .map_err(|e| BbsError::InvalidPoint(e.to_string()))?;
    g2_from_compressed(&bytes)
}

/// Challenge transcript bytes for a G1 point: the compressed form with the
/// three flag bits cleared (the big-endian affine x-coordinate).
pub fn challenge_bytes(point: &G1Affine) -> [u8; G1_LEN] {
    let mut out = g1_to_compressed(point);
    out[0] &= !FLAG_MASK;
    out
}

// ---------------------------------------------------------------------------
// Pairings
// ---------------------------------------------------------------------------

/// Check `e(a, x) == e(b, y)`.
pub fn pairing_eq(a: &G1Affine, x: &G2Affine, b: &G1Affine, y: &G2Affine) -> bool {
    Bls12_381::pairing(*a, *x) == Bls12_381::pairing(*b, *y)
}

// ---------------------------------------------------------------------------
// Serde adapters (hex-encoded compressed points and scalars)
// ---------------------------------------------------------------------------

pub mod serde_g1 {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(point: &G1Affine, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&g1_to_hex(point))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<G1Affine, D::Error> {
        let value = String::deserialize(deserializer)?;
        g1_from_hex(&value).map_err(serde::de::Error::custom)
    }
}

pub mod serde_g2 {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(point: &G2Affine, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&g2_to_hex(point))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<G2Affine, D::Error> {
        let value = String::deserialize(deserializer)?;
        g2_from_hex(&value).map_err(serde::de::Error::custom)
    }
}

pub mod serde_fr {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scalar: &Fr, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&fr_to_hex(scalar))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Fr, D::Error> {
        let value = String::deserialize(deserializer)?;
        fr_from_hex(&value).map_err(serde::de::Error::custom)
    }
}
