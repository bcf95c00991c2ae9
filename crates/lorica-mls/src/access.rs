//! Epoch access keys and proofs.
//!
//! The server never holds the group key. Instead it holds, per epoch, an
//! access key derived from the group key; entry authors prove they held the
//! epoch key by an HMAC over the entry hash, and epoch changes are chained
//! by a transition proof the server can check against the key it already
//! has.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use lorica_crypto::{hex as hexc, kdf};

use crate::{MlsError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A per-epoch server access key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochAccessKey {
    /// 32-byte key, hex.
    pub key: String,
    /// The epoch this key belongs to.
    pub epoch: u64,
}

impl EpochAccessKey {
    /// Derive the access key for an epoch:
    /// `HKDF(group_key || "server-access" || group_id || u32_le(epoch))`.
    pub fn derive(group_key: &[u8; 32], group_id: &str, epoch: u64) -> Self {
        let mut ikm = Vec::with_capacity(32 + kdf::labels::SERVER_ACCESS.len() + group_id.len() + 4);
        ikm.extend_from_slice(group_key);
        ikm.extend_from_slice(kdf::labels::SERVER_ACCESS.as_bytes());
        ikm.extend_from_slice(group_id.as_bytes());
        ikm.extend_from_slice(&(epoch as u32).to_le_bytes());

        Self {
            key: hexc::encode(&kdf::derive(&ikm, &[])),
            epoch,
        }
    }

    /// Raw key bytes.
    pub fn key_bytes(&self) -> Result<[u8; 32]> {
        hexc::decode_fixed(&self.key).map_err(MlsError::Crypto)
    }
}

/// HMAC-SHA256 over an entry hash string under an epoch access key, hex.
pub fn access_proof(key: &EpochAccessKey, entry_hash: &str) -> Result<String> {
    Ok(hexc::encode(&hmac(&key.key_bytes()?, entry_hash.as_bytes())))
}

/// Verify an access proof in constant time.
pub fn verify_access_proof(key: &EpochAccessKey, entry_hash: &str, proof_hex: &str) -> Result<()> {
    let proof = hexc::decode(proof_hex).map_err(MlsError::Crypto)?;
    let mut mac = HmacSha256::new_from_slice(&key.key_bytes()?)
        .map_err(|e| MlsError::KeyDerivation(e.to_string()))?;
    mac.update(entry_hash.as_bytes());
    mac.verify_slice(&proof).map_err(|_| MlsError::InvalidAccessProof)
}

/// Transition proof from one epoch key to the next:
/// `HMAC(key_i, key_{i+1})`, hex.
pub fn transition_proof(current: &EpochAccessKey, next: &EpochAccessKey) -> Result<String> {
    Ok(hexc::encode(&hmac(
        &current.key_bytes()?,
        &next.key_bytes()?,
    )))
}

/// Verify a transition proof in constant time.
pub fn verify_transition_proof(
    current: &EpochAccessKey,
    next: &EpochAccessKey,
    proof_hex: &str,
) -> Result<()> {
    let proof = hexc::decode(proof_hex).map_err(MlsError::Crypto)?;
    let mut mac = HmacSha256::new_from_slice(&current.key_bytes()?)
        .map_err(|e| MlsError::KeyDerivation(e.to_string()))?;
    mac.update(&next.key_bytes()?);
    mac.verify_slice(&proof).map_err(|_| MlsError::InvalidTransition)
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key length");
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}
