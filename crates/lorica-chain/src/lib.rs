//! # lorica-chain
//!
//! Hash-linked append-only chain entries for both log families.
//!
//! Every entry hashes the canonical string
//! `"{index}:{prevHash}:{payload}:{nonce}"` — the payload being the
//! plaintext content for personal entries and the ciphertext for group
//! entries — and links to its predecessor through `prevHash`. Personal
//! entries are ECIES-encrypted to the owner and signed with the owner's
//! identity key; group entries are sealed under the MLS group key, signed
//! anonymously with BBS+, and bound to their epoch by an access proof.
//!
//! ## Modules
//!
//! - [`entry`] — Entry types, canonical hashing, envelope seal/open
//! - [`validate`] — Head-relative chain validation, gap/conflict detection

pub mod entry;
pub mod validate;

/// Error types for chain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The recomputed entry hash did not match the recorded one.
    #[error("invalid hash at index {index}: expected {expected}, got {got}")]
    InvalidHash {
        index: u64,
        expected: String,
        got: String,
    },

    /// A genesis entry did not anchor to the all-zero hash.
    #[error("invalid genesis prevHash: {got}")]
    InvalidGenesis { got: String },

    /// An entry's prevHash did not match the local head.
    #[error("chain broken: expected prevHash {expected}, got {got}")]
    ChainBroken { expected: String, got: String },

    /// An entry skipped ahead of the local head.
    #[error("gap detected: local head {local_head}, incoming index {incoming}")]
    GapDetected { local_head: i64, incoming: u64 },

    /// A server entry collides with a different local entry at the same index.
    #[error("conflict detected at index {index}")]
    ConflictDetected { index: u64 },

    /// The recovered signer does not match the owner address.
    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: String, recovered: String },

    /// The decrypted payload's sender signature or membership check failed.
    #[error("unknown sender: {0}")]
    UnknownSender(String),

    /// A group entry referenced an epoch with no known access key.
    #[error("no access key for epoch {0}")]
    UnknownEpochKey(u64),

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] lorica_crypto::CryptoError),

    /// BBS+ signature failure.
    #[error(transparent)]
    Bbs(#[from] lorica_bbs::BbsError),

    /// MLS failure (group key, access proof).
    #[error(transparent)]
    Mls(#[from] lorica_mls::MlsError),

    /// JSON encoding/decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
