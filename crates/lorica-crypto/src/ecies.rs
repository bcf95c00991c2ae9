//! ECIES encryption matching the eciesjs envelope.
//!
//! ## Algorithm
//!
//! ```text
//! ECIES.Encrypt(recipient_pk, plaintext):
//!   1. (eph_sk, eph_pk65) = secp256k1 keypair from CSPRNG
//!   2. shared65 = uncompressed ECDH point between eph_sk and recipient_pk
//!   3. key = HKDF-SHA256(salt = ∅, ikm = eph_pk65 || shared65, info = ∅, L = 32)
//!   4. iv = 16 random bytes
//!   5. ct, tag = AES-256-GCM(key, iv, plaintext)
//!   6. return base64(eph_pk65 || iv || tag || ct)
//! ```
//!
//! The shared secret is the full 65-byte uncompressed ECDH point, not just
//! its x-coordinate; this is what the eciesjs envelope requires.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::identity::PUBLIC_KEY_LEN;
use crate::{aead, hex, CryptoError, Result};

/// Minimum decodable envelope: public key + IV + tag + one ciphertext byte.
const MIN_ENVELOPE_LEN: usize = PUBLIC_KEY_LEN + aead::IV16_LEN + aead::TAG_LEN + 1;

/// Encrypt a plaintext to a recipient's uncompressed public key.
///
/// Returns the base64 envelope `eph_pk65 || IV16 || TAG16 || CT`.
pub fn encrypt(recipient_public_key: &[u8; PUBLIC_KEY_LEN], plaintext: &[u8]) -> Result<String> {
    encrypt_with_info(recipient_public_key, &[], plaintext)
}

/// Decrypt a base64 ECIES envelope with the recipient's private key (hex).
pub fn decrypt(recipient_private_hex: &str, envelope_b64: &str) -> Result<Vec<u8>> {
    decrypt_with_info(recipient_private_hex, &[], envelope_b64)
}

/// Encrypt with an explicit HKDF info parameter.
///
/// The plain envelope uses empty info; the MLS welcome envelope binds the
/// recipient by passing `"mls-welcome-key" || recipient_pk65` here.
pub fn encrypt_with_info(
    recipient_public_key: &[u8; PUBLIC_KEY_LEN],
    info: &[u8],
    plaintext: &[u8],
) -> Result<String> {
    let recipient = PublicKey::from_sec1_bytes(recipient_public_key)
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let ephemeral = SecretKey::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let shared = shared_point(&ephemeral, &recipient);
    let key = derive_envelope_key(ephemeral_public.as_bytes(), &shared, info);

    let mut iv = [0u8; aead::IV16_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut iv);
    let (ciphertext, tag) = aead::seal_iv16(&key, &iv, plaintext)?;

    let mut envelope =
        Vec::with_capacity(PUBLIC_KEY_LEN + aead::IV16_LEN + aead::TAG_LEN + ciphertext.len());
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

/// Decrypt an envelope sealed with [`encrypt_with_info`].
pub fn decrypt_with_info(
    recipient_private_hex: &str,
    info: &[u8],
    envelope_b64: &str,
) -> Result<Vec<u8>> {
    let envelope = BASE64
        .decode(envelope_b64)
        .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "envelope too short ({} bytes)",
            envelope.len()
        )));
    }

    let ephemeral_public = PublicKey::from_sec1_bytes(&envelope[..PUBLIC_KEY_LEN])
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let private_bytes = Zeroizing::new(hex::decode_fixed::<32>(recipient_private_hex)?);
    let recipient =
        SecretKey::from_slice(&private_bytes[..]).map_err(|_| CryptoError::InvalidPrivateKey)?;

    let shared = shared_point(&recipient, &ephemeral_public);
    let key = derive_envelope_key(&envelope[..PUBLIC_KEY_LEN], &shared, info);

    let iv_end = PUBLIC_KEY_LEN + aead::IV16_LEN;
    let tag_end = iv_end + aead::TAG_LEN;
    let mut iv = [0u8; aead::IV16_LEN];
    iv.copy_from_slice(&envelope[PUBLIC_KEY_LEN..iv_end]);
    let mut tag = [0u8; aead::TAG_LEN];
    tag.copy_from_slice(&envelope[iv_end..tag_end]);

    aead::open_iv16(&key, &iv, &envelope[tag_end..], &tag)
}

/// The uncompressed 65-byte ECDH point between a private and a public key.
fn shared_point(private: &SecretKey, public: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let point: ProjectivePoint = public.to_projective() * *private.to_nonzero_scalar();
    let encoded = point.to_affine().to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(encoded.as_bytes());
    out
}

/// HKDF-SHA256 over `eph_pk65 || shared65` with empty salt.
fn derive_envelope_key(ephemeral_public: &[u8], shared: &[u8], info: &[u8]) -> [u8; 32] {
    let mut ikm = Vec::with_capacity(ephemeral_public.len() + shared.len());
    ikm.extend_from_slice(ephemeral_public);
    ikm.extend_from_slice(shared);
    crate::kdf::derive(&ikm, info)
}
