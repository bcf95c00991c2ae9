//! AES-256-GCM seal/open helpers.
//!
//! Two envelope layouts are used by the protocol:
//!
//! - `IV12 || TAG16 || CT` for group payloads, application messages, and
//!   welcome bodies (12-byte IV).
//! - The ECIES envelope, which carries a 16-byte IV between the ephemeral
//!   public key and the tag (see [`crate::ecies`]).

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::RngCore;

use crate::{CryptoError, Result};

/// AES-256-GCM with the standard 12-byte nonce.
type Aes256Gcm12 = AesGcm<Aes256, U12>;

/// AES-256-GCM with a 16-byte nonce (ECIES envelope).
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// IV length for the `IV12 || TAG16 || CT` layout.
pub const IV12_LEN: usize = 12;

/// IV length for the ECIES envelope.
pub const IV16_LEN: usize = 16;

/// Encrypt with a random 12-byte IV, returning `IV12 || TAG16 || CT`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV12_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm12::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::<U12>::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("GCM encrypt failed".into()))?;

    // `encrypt` emits CT || TAG; the wire layout is IV || TAG || CT.
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut out = Vec::with_capacity(IV12_LEN + TAG_LEN + ct.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ct);
    Ok(out)
}

/// Decrypt an `IV12 || TAG16 || CT` payload.
pub fn open(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV12_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext too short ({} bytes)",
            data.len()
        )));
    }
    let iv = &data[..IV12_LEN];
    let tag = &data[IV12_LEN..IV12_LEN + TAG_LEN];
    let ct = &data[IV12_LEN + TAG_LEN..];

    let cipher = Aes256Gcm12::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut combined = Vec::with_capacity(ct.len() + TAG_LEN);
    combined.extend_from_slice(ct);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::<U12>::from_slice(iv), combined.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed("GCM authentication failed".into()))
}

/// Encrypt with an explicit 16-byte IV, returning `(ciphertext, tag)`.
pub fn seal_iv16(key: &[u8; 32], iv: &[u8; IV16_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("GCM encrypt failed".into()))?;

    let (ct, tag_slice) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_slice);
    Ok((ct.to_vec(), tag))
}

/// Decrypt a ciphertext sealed with [`seal_iv16`].
pub fn open_iv16(
    key: &[u8; 32],
    iv: &[u8; IV16_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::<U16>::from_slice(iv), combined.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed("GCM authentication failed".into()))
}
