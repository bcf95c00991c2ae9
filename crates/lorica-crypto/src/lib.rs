//! # lorica-crypto
//!
//! Cryptographic primitives for the Lorica log protocol.
//!
//! The cryptographic suite is fixed — no algorithm negotiation. Identity
//! operations use secp256k1 with Ethereum-style message signing and
//! addresses; content encryption uses ECIES (ephemeral ECDH + HKDF-SHA256 +
//! AES-256-GCM) for personal logs and raw AES-256-GCM under a ratcheted
//! group key for group logs.
//!
//! ## Modules
//!
//! - [`hex`] — Hex codec, EIP-55 address checksums, SQL identifier quoting
//! - [`identity`] — secp256k1 keypairs, EIP-191 signing and address recovery
//! - [`ecies`] — ECIES encrypt/decrypt matching the eciesjs envelope
//! - [`kdf`] — Labeled HKDF-SHA256 derivation (all registered labels)
//! - [`aead`] — AES-256-GCM seal/open helpers

pub mod aead;
pub mod ecies;
pub mod hex;
pub mod identity;
pub mod kdf;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Input was not valid hexadecimal.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Input was not valid base64.
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Input had the wrong byte length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Private key bytes could not be parsed as a secp256k1 scalar.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Public key bytes could not be parsed as a secp256k1 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature parsing or address recovery failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// AEAD or ECIES decryption failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
