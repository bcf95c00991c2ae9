//! Accumulator-based credential revocation.
//!
//! The manager maintains a G1 accumulator initialized to `α·g1`. A
//! non-revoked member holds a witness `W = e⁻¹·acc` for its credential
//! exponent `e`; the membership check is `e(acc, g2) == e(e·W, g2)`.
//! Revoking `e` divides the accumulator by `e`, which invalidates that
//! member's witness while the manager can re-issue witnesses against the
//! new accumulator for everyone else.

use ark_bls12_381::{Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use serde::{Deserialize, Serialize};

use crate::bls::{self, serde_g1};
use crate::{BbsError, Result};

/// The manager's revocation accumulator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationAccumulator {
    /// Current accumulator value.
    #[serde(with = "serde_g1")]
    pub value: G1Affine,
}

/// A member's non-revocation witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationWitness {
    /// `e⁻¹ · acc` at witness issuance time.
    #[serde(with = "serde_g1")]
    pub value: G1Affine,
}

impl RevocationAccumulator {
    /// Initialize with a random `α·g1`.
    pub fn new() -> Self {
        let alpha = bls::fr_random();
        Self {
            value: (G1Affine::generator() * alpha).into(),
        }
    }

    /// Issue a witness for a credential exponent against the current value.
    pub fn witness_for(&self, e: &Fr) -> Result<RevocationWitness> {
        let inverse = ark_ff::Field::inverse(e)
            .ok_or_else(|| BbsError::InvalidScalar("zero exponent".into()))?;
        Ok(RevocationWitness {
            value: (self.value * inverse).into(),
        })
    }

    /// Revoke a credential exponent.
    ///
    /// The accumulator is divided by `e`; the prior accumulator value is
    /// returned (it is the last value against which the revoked member's
    /// witness verified).
    pub fn revoke(&mut self, e: &Fr) -> Result<G1Affine> {
        let inverse = ark_ff::Field::inverse(e)
            .ok_or_else(|| BbsError::InvalidScalar("zero exponent".into()))?;
        let prior = self.value;
        self.value = (self.value * inverse).into();
        Ok(prior)
    }

    /// Check that a witness proves non-revocation:
    /// `e(acc, g2) == e(e·W, g2)`.
    pub fn is_member(&self, witness: &RevocationWitness, e: &Fr) -> bool {
        let scaled: G1Affine = (witness.value * *e).into();
        bls::pairing_eq(
            &self.value,
            &G2Affine::generator(),
            &scaled,
            &G2Affine::generator(),
        )
    }
}

impl Default for RevocationAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_witness_is_member() {
        let accumulator = RevocationAccumulator::new();
        let e = bls::fr_random();
        let witness = accumulator.witness_for(&e).expect("witness");
        assert!(accumulator.is_member(&witness, &e));
    }

    #[test]
    fn test_revocation_invalidates_witness() {
        let mut accumulator = RevocationAccumulator::new();
        let e = bls::fr_random();
        let witness = accumulator.witness_for(&e).expect("witness");

        accumulator.revoke(&e).expect("revoke");
        assert!(!accumulator.is_member(&witness, &e));
    }

    #[test]
    fn test_other_members_reissued_after_revocation() {
        let mut accumulator = RevocationAccumulator::new();
        let revoked = bls::fr_random();
        let surviving = bls::fr_random();

        accumulator.revoke(&revoked).expect("revoke");
        let witness = accumulator.witness_for(&surviving).expect("witness");
        assert!(accumulator.is_member(&witness, &surviving));
    }

    #[test]
    fn test_stale_witness_fails_after_any_revocation() {
        let mut accumulator = RevocationAccumulator::new();
        let member = bls::fr_random();
        let other = bls::fr_random();

        let stale = accumulator.witness_for(&member).expect("witness");
        accumulator.revoke(&other).expect("revoke");
        // Witnesses must be refreshed after the accumulator moves.
        assert!(!accumulator.is_member(&stale, &member));
    }

    #[test]
    fn test_revoke_returns_prior_value() {
        let mut accumulator = RevocationAccumulator::new();
        let before = accumulator.value;
        let prior = accumulator.revoke(&bls::fr_random()).expect("revoke");
        assert_eq!(prior, before);
        assert_ne!(accumulator.value, before);
    }

    #[test]
    fn test_wrong_exponent_not_member() {
        let accumulator = RevocationAccumulator::new();
        let e = bls::fr_random();
        let witness = accumulator.witness_for(&e).expect("witness");
        assert!(!accumulator.is_member(&witness, &bls::fr_random()));
    }
}
