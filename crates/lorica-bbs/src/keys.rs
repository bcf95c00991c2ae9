//! Group keypair generation and member credential issuance.
//!
//! The manager holds `γ` and publishes `w = γ·g2` together with two G1
//! generators `h0, h1` derived by hashing `γ`. Each member receives a
//! credential `(x, A, e, s)` with `A = (g1 + s·h0 + x·h1)·(γ + e)⁻¹`,
//! satisfying `e(A, w + e·g2) = e(g1 + s·h0 + x·h1, g2)`.

use ark_bls12_381::{Fr, G1Affine, G1Projective, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::Field;
use serde::{Deserialize, Serialize};

use crate::bls::{self, serde_fr, serde_g1, serde_g2};
use crate::{BbsError, Result};

/// Domain for the first derived generator.
const GENERATOR_H0_DOMAIN: &str = "BBS+Generator-h0";

/// Domain for the second derived generator.
const GENERATOR_H1_DOMAIN: &str = "BBS+Generator-h1";

/// The public half of a group keypair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPublicKey {
    /// `w = γ·g2`, compressed hex.
    #[serde(with = "serde_g2")]
    pub w: G2Affine,
    /// The derived generators `[h0, h1]`.
    pub h: GeneratorPair,
}

/// The two derived G1 generators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorPair(
    #[serde(with = "serde_g1")] pub G1Affine,
    #[serde(with = "serde_g1")] pub G1Affine,
);

/// The manager's private key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerPrivateKey {
    /// The group secret `γ`.
    #[serde(with = "serde_fr")]
    pub gamma: Fr,
    /// The published public key.
    pub public_key: GroupPublicKey,
}

/// A member's issued credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCredential {
    /// The member's secret exponent.
    #[serde(with = "serde_fr")]
    pub x: Fr,
    /// The signed credential point.
    #[serde(with = "serde_g1")]
    pub a: G1Affine,
    /// The issuing exponent.
    #[serde(with = "serde_fr")]
    pub e: Fr,
    /// The blinding exponent.
    #[serde(with = "serde_fr")]
    pub s: Fr,
}

/// Generate a fresh group keypair.
///
/// The generators `h0, h1` are derived by hashing `γ` under fixed domains,
/// so they are bound to this group. (This makes public parameters depend on
/// the manager secret; kept for wire compatibility.)
pub fn generate_group_keypair() -> ManagerPrivateKey {
    let gamma = bls::fr_random();
    keypair_from_gamma(gamma)
}

/// Deterministically build the keypair for a given `γ`.
pub fn keypair_from_gamma(gamma: Fr) -> ManagerPrivateKey {
    let w: G2Affine = (G2Affine::generator() * gamma).into();
    let gamma_bytes = bls::fr_to_bytes(&gamma);
    let h0 = bls::hash_to_g1(GENERATOR_H0_DOMAIN, &[&gamma_bytes]);
    let h1 = bls::hash_to_g1(GENERATOR_H1_DOMAIN, &[&gamma_bytes]);

    ManagerPrivateKey {
        gamma,
        public_key: GroupPublicKey {
            w,
            h: GeneratorPair(h0, h1),
        },
    }
}

/// Issue a credential for a new member.
pub fn issue_credential(manager: &ManagerPrivateKey) -> Result<MemberCredential> {
    let x = bls::fr_random();
    let e = bls::fr_random();
    let s = bls::fr_random();

    let b = credential_base(&manager.public_key, &s, &x);
    let denominator = manager.gamma + e;
    let inverse = denominator
        .inverse()
        .ok_or_else(|| BbsError::Issuance("gamma + e is not invertible".into()))?;
    let a: G1Affine = (b * inverse).into();

    Ok(MemberCredential { x, a, e, s })
}

/// `B = g1 + s·h0 + x·h1` for a credential or signature.
pub(crate) fn credential_base(public_key: &GroupPublicKey, s: &Fr, x: &Fr) -> G1Projective {
    G1Projective::from(G1Affine::generator())
        + public_key.h.0 * *s
        + public_key.h.1 * *x
}

/// Check the issuance invariant `e(A, w + e·g2) = e(B, g2)`.
pub fn credential_is_valid(credential: &MemberCredential, public_key: &GroupPublicKey) -> bool {
    if credential.a.is_zero() {
        return false;
    }
    let w_plus_e: G2Affine =
        (G2Affine::generator() * credential.e + public_key.w).into();
    let b: G1Affine = credential_base(public_key, &credential.s, &credential.x).into();
    bls::pairing_eq(&credential.a, &w_plus_e, &b, &G2Affine::generator())
}
