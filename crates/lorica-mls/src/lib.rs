//! # lorica-mls
//!
//! Continuous group key agreement over a left-balanced binary ratchet tree.
//!
//! Each group member sits at a leaf of the tree; inner nodes carry secp256k1
//! key pairs refreshed by path updates. Every membership change (add,
//! remove, self-update) advances the group epoch by one and re-derives the
//! shared group key from the root path secret. Epoch access keys derived
//! from the group key let a non-member server check that an entry author
//! held the key of a specific epoch, without learning the key itself.
//!
//! ## Modules
//!
//! - [`tree`] — Left-balanced heap layout, direct/copath, resolution
//! - [`group`] — Group state, path updates, membership operations
//! - [`messages`] — Typed wire messages (welcome/add/remove/update/application)
//! - [`access`] — Epoch access keys, access proofs, transition proofs

pub mod access;
pub mod group;
pub mod messages;
pub mod tree;

/// Error types for MLS operations.
#[derive(Debug, thiserror::Error)]
pub enum MlsError {
    /// A received message's epoch did not match `local epoch + 1`
    /// (or, for application messages, the local epoch).
    #[error("invalid epoch: expected {expected}, got {actual}")]
    InvalidEpoch { expected: u64, actual: u64 },

    /// A leaf index was out of range or blank when it should be populated.
    #[error("member not found at leaf {0}")]
    MemberNotFound(u32),

    /// The target leaf is already occupied.
    #[error("leaf {0} is already occupied")]
    LeafOccupied(u32),

    /// A member cannot remove itself.
    #[error("cannot remove own leaf")]
    CannotRemoveSelf,

    /// A received removal targets our own leaf; local state must be deleted.
    #[error("removed from group")]
    RemovedFromGroup,

    /// A tree index computation went out of bounds.
    #[error("tree index error: {0}")]
    TreeIndex(String),

    /// No encrypted path secret in an update was addressed to this member.
    #[error("no decryptable path secret in update")]
    NoDecryptablePathSecret,

    /// An access or transition proof failed to verify.
    #[error("invalid access proof")]
    InvalidAccessProof,

    /// An epoch transition proof failed to verify.
    #[error("invalid epoch transition")]
    InvalidTransition,

    /// Underlying cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] lorica_crypto::CryptoError),

    /// Key derivation produced an unusable scalar.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Message encoding/decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, MlsError>;
