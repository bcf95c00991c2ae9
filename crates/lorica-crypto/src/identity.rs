//! secp256k1 identity keys, EIP-191 message signing, and address recovery.
//!
//! An identity is a secp256k1 keypair. Its address is the EIP-55 checksummed
//! form of the last 20 bytes of `Keccak-256(X || Y)` over the uncompressed
//! public key (prefix byte excluded). Signatures are 65-byte `R || S || V`
//! with `V = recovery_id + 27`, over the EIP-191 personal-message digest.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

use crate::{hex, CryptoError, Result};

/// Length of an uncompressed SEC1 public key (`04 || X || Y`).
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of a recoverable signature (`R || S || V`).
pub const SIGNATURE_LEN: usize = 65;

/// A secp256k1 identity keypair.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a fresh keypair from the system CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Load a keypair from a 32-byte private key in hex.
    pub fn from_private_hex(private_hex: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode_fixed(private_hex)?;
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// The private key as lowercase hex without a prefix.
    pub fn private_hex(&self) -> String {
        hex::encode(&self.signing_key.to_bytes())
    }

    /// The uncompressed 65-byte public key (`04 || X || Y`).
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// The EIP-55 checksummed address of this identity.
    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key())
    }

    /// Sign a UTF-8 message with the EIP-191 personal-sign scheme.
    ///
    /// Returns the 65-byte `R || S || V` signature as 0x-prefixed hex.
    pub fn sign_message(&self, message: &str) -> Result<String> {
        let digest = eip191_digest(message);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| CryptoError::InvalidSignature)?;

        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte() + 27;
        Ok(hex::encode_prefixed(&bytes))
    }
}

/// Derive the checksummed address from an uncompressed public key.
pub fn address_from_public_key(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    // Keccak over X || Y, skipping the 0x04 prefix byte.
    let digest = Keccak256::digest(&public_key[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    hex::to_checksum_address(&address)
}

/// The EIP-191 personal-message digest:
/// `Keccak-256(0x19 || "Ethereum Signed Message:\n" || len || message)`.
fn eip191_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update([0x19]);
    hasher.update(b"Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Recover the signer's address from an EIP-191 signature.
pub fn recover_address(message: &str, signature_hex: &str) -> Result<String> {
    let bytes = hex::decode(signature_hex)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength {
            expected: SIGNATURE_LEN,
            actual: bytes.len(),
        });
    }

    let signature =
        Signature::from_slice(&bytes[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let recovery_id = bytes[64]
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or(CryptoError::InvalidSignature)?;

    let digest = eip191_digest(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;

    let point = verifying_key.to_encoded_point(false);
    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(point.as_bytes());
    Ok(address_from_public_key(&public_key))
}

/// Verify an EIP-191 signature against a claimed address.
///
/// The address comparison is case-insensitive, so both checksummed and
/// lowercase addresses are accepted.
pub fn verify_message(message: &str, signature_hex: &str, address: &str) -> bool {
    match recover_address(message, signature_hex) {
        Ok(recovered) => hex::address_eq(&recovered, address),
        Err(_) => false,
    }
}
