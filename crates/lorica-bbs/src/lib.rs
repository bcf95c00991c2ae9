//! # lorica-bbs
//!
//! BBS+ anonymous group membership credentials over BLS12-381.
//!
//! A group manager issues each member a credential `(x, A, e, s)` bound to
//! the manager's secret `γ`. Members prove membership by producing a
//! randomized signature-of-knowledge over a message; the verifier learns
//! that *some* member signed, but not which one, and two signatures by the
//! same member are unlinkable.
//!
//! ## Modules
//!
//! - [`bls`] — BLS12-381 field/point helpers, zcash-format compressed
//!   serialization, hash-to-scalar, pairing checks
//! - [`keys`] — Group keypair generation and credential issuance
//! - [`signature`] — Group signature creation and verification
//! - [`revocation`] — Accumulator-based credential revocation

pub mod bls;
pub mod keys;
pub mod revocation;
pub mod signature;

/// Error types for BBS+ operations.
#[derive(Debug, thiserror::Error)]
pub enum BbsError {
    /// A point failed to deserialize or was off-curve / out of subgroup.
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// A scalar failed to parse.
    #[error("invalid scalar: {0}")]
    InvalidScalar(String),

    /// A signature component that must not be the identity was the identity.
    #[error("signature contains the identity point")]
    IdentityPoint,

    /// The recomputed Fiat–Shamir challenge did not match.
    #[error("challenge mismatch")]
    ChallengeMismatch,

    /// The final pairing equation did not hold.
    #[error("pairing check failed")]
    PairingCheckFailed,

    /// Credential issuance hit a non-invertible denominator.
    #[error("issuance failed: {0}")]
    Issuance(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, BbsError>;
