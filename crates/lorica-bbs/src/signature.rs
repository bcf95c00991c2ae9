//! BBS+ group signature creation and verification.
//!
//! A signature is a proof of knowledge of a valid credential, randomized so
//! that signatures by the same member are unlinkable:
//!
//! ```text
//! A' = r·A        Ā = r·B − e·A'   (so e(A', w) = e(Ā, g2))
//! d  = r2·h0 + (x·r)·h1
//! T  = rR2·h0 + rX·h1
//! c  = H(M || x(A') || x(Ā) || x(d) || x(T))
//! sX = rX + c·x·r   sR2 = rR2 + c·r2   sE = rE + c·e   sS = rS + c·s
//! ```
//!
//! Verification recomputes `T' = sR2·h0 + sX·h1 − c·d`, recomputes the
//! challenge over the same transcript, and checks the pairing equation.

use ark_bls12_381::{Fr, G1Affine};
use ark_ec::AffineRepr;
use serde::{Deserialize, Serialize};

use crate::bls::{self, serde_fr, serde_g1};
use crate::keys::{credential_base, GroupPublicKey, MemberCredential};
use crate::{BbsError, Result};

/// A randomized BBS+ group signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSignature {
    /// Randomized credential point `A' = r·A`.
    #[serde(with = "serde_g1")]
    pub a_prime: G1Affine,
    /// `Ā = r·B − e·A'`.
    #[serde(with = "serde_g1")]
    pub a_bar: G1Affine,
    /// Blinding commitment `d`.
    #[serde(with = "serde_g1")]
    pub d: G1Affine,
    /// Fiat–Shamir challenge.
    #[serde(with = "serde_fr")]
    pub c: Fr,
    /// Schnorr response for `x·r`.
    #[serde(with = "serde_fr")]
    pub s_x: Fr,
    /// Schnorr response for `r2`.
    #[serde(with = "serde_fr")]
    pub s_r2: Fr,
    /// Schnorr response for `e`.
    #[serde(with = "serde_fr")]
    pub s_e: Fr,
    /// Schnorr response for `s`.
    #[serde(with = "serde_fr")]
    pub s_s: Fr,
}

impl GroupSignature {
    /// Serialize to the wire JSON form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BbsError::Serialization(e.to_string()))
    }

    /// Parse from the wire JSON form.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| BbsError::Serialization(e.to_string()))
    }
}

/// Sign a UTF-8 message with a member credential.
pub fn sign(
    message: &str,
    credential: &MemberCredential,
    public_key: &GroupPublicKey,
) -> GroupSignature {
    let h0 = public_key.h.0;
    let h1 = public_key.h.1;

    // Randomize the credential.
    let r = bls::fr_random();
    let xr = credential.x * r;
    let a_prime: G1Affine = (credential.a * r).into();
    let b_prime = credential_base(public_key, &credential.s, &credential.x) * r;
    let a_bar: G1Affine = (b_prime - a_prime * credential.e).into();

    // Commitment to the blinding of x·r.
    let r2 = bls::fr_random();
    let d: G1Affine = (h0 * r2 + h1 * xr).into();

    // Schnorr nonces and commitment.
    let r_x = bls::fr_random();
    let r_r2 = bls::fr_random();
    let r_e = bls::fr_random();
    let r_s = bls::fr_random();
    let t: G1Affine = (h0 * r_r2 + h1 * r_x).into();

    let c = challenge(message, &a_prime, &a_bar, &d, &t);

    GroupSignature {
        a_prime,
        a_bar,
        d,
        c,
        s_x: r_x + c * xr,
        s_r2: r_r2 + c * r2,
        s_e: r_e + c * credential.e,
        s_s: r_s + c * credential.s,
    }
}

/// Verify a group signature over a message.
///
/// Errors distinguish the failing stage: identity components, a challenge
/// mismatch, or the final pairing equation.
pub fn verify(
    message: &str,
    signature: &GroupSignature,
    public_key: &GroupPublicKey,
) -> Result<()> {
    if signature.a_prime.is_zero() || signature.a_bar.is_zero() {
        return Err(BbsError::IdentityPoint);
    }

    let h0 = public_key.h.0;
    let h1 = public_key.h.1;

    // T' = sR2·h0 + sX·h1 − c·d
    let t: G1Affine = (h0 * signature.s_r2 + h1 * signature.s_x
        - signature.d * signature.c)
        .into();

    let expected = challenge(message, &signature.a_prime, &signature.a_bar, &signature.d, &t);
    if expected != signature.c {
        return Err(BbsError::ChallengeMismatch);
    }

    if !bls::pairing_eq(
        &signature.a_prime,
        &public_key.w,
        &signature.a_bar,
        &ark_bls12_381::G2Affine::generator(),
    ) {
        return Err(BbsError::PairingCheckFailed);
    }
    Ok(())
}

/// The Fiat–Shamir challenge over the message and the point transcript.
fn challenge(
    message: &str,
    a_prime: &G1Affine,
    a_bar: &G1Affine,
    d: &G1Affine,
    t: &G1Affine,
) -> Fr {
    bls::hash_to_scalar(&[
        message.as_bytes(),
        &bls::challenge_bytes(a_prime),
        &bls::challenge_bytes(a_bar),
        &bls::challenge_bytes(d),
        &bls::challenge_bytes(t),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_group_keypair, issue_credential};

    fn setup() -> (crate::keys::ManagerPrivateKey, MemberCredential) {
        let manager = generate_group_keypair();
        let credential = issue_credential(&manager).expect("issue");
        (manager, credential)
    }

    #[test]
    fn test_sign_verify() {
        let (manager, credential) = setup();
        let signature = sign("hello", &credential, &manager.public_key);
        verify("hello", &signature, &manager.public_key).expect("verify");
    }

    #[test]
    fn test_wrong_message_rejected() {
        let (manager, credential) = setup();
        let signature = sign("hello", &credential, &manager.public_key);
        assert!(matches!(
            verify("goodbye", &signature, &manager.public_key),
            Err(BbsError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_flipped_challenge_rejected() {
        let (manager, credential) = setup();
        let mut signature = sign("hello", &credential, &manager.public_key);
        signature.c += Fr::from(1u64);
        assert!(matches!(
            verify("hello", &signature, &manager.public_key),
            Err(BbsError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_flipped_response_rejected() {
        let (manager, credential) = setup();
        let mut signature = sign("hello", &credential, &manager.public_key);
        signature.s_x += Fr::from(1u64);
        assert!(verify("hello", &signature, &manager.public_key).is_err());
    }

    #[test]
    fn test_wrong_group_rejected() {
        let (manager, credential) = setup();
        let other = generate_group_keypair();
        let signature = sign("hello", &credential, &manager.public_key);
        assert!(verify("hello", &signature, &other.public_key).is_err());
    }

    #[test]
    fn test_identity_a_prime_rejected() {
        let (manager, credential) = setup();
        let mut signature = sign("hello", &credential, &manager.public_key);
        signature.a_prime = G1Affine::zero();
        assert!(matches!(
            verify("hello", &signature, &manager.public_key),
            Err(BbsError::IdentityPoint)
        ));
    }

    #[test]
    fn test_signatures_unlinkable() {
        // Two signatures over the same message by the same member share no
        // components.
        let (manager, credential) = setup();
        let first = sign("hello", &credential, &manager.public_key);
        let second = sign("hello", &credential, &manager.public_key);

        assert_ne!(first.a_prime, second.a_prime);
        assert_ne!(first.a_bar, second.a_bar);
        assert_ne!(first.d, second.d);
        assert_ne!(first.c, second.c);
        assert_ne!(first.s_x, second.s_x);
        assert_ne!(first.s_r2, second.s_r2);
        assert_ne!(first.s_e, second.s_e);
        assert_ne!(first.s_s, second.s_s);
    }

    #[test]
    fn test_any_member_verifies_anonymously() {
        let manager = generate_group_keypair();
        let alice = issue_credential(&manager).expect("issue");
        let bob = issue_credential(&manager).expect("issue");

        let from_alice = sign("entry-hash", &alice, &manager.public_key);
        let from_bob = sign("entry-hash", &bob, &manager.public_key);

        verify("entry-hash", &from_alice, &manager.public_key).expect("alice verifies");
        verify("entry-hash", &from_bob, &manager.public_key).expect("bob verifies");
    }

    #[test]
    fn test_json_roundtrip() {
        let (manager, credential) = setup();
        let signature = sign("hello", &credential, &manager.public_key);
        let json = signature.to_json().expect("serialize");
        let restored = GroupSignature::from_json(&json).expect("deserialize");
        assert_eq!(signature, restored);
        verify("hello", &restored, &manager.public_key).expect("verify restored");
    }
}
