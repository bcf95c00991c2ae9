//! Chain entry types, canonical hashing, and crypto envelopes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use lorica_bbs::keys::{GroupPublicKey, MemberCredential};
use lorica_bbs::signature::{self, GroupSignature};
use lorica_crypto::{aead, ecies, hex as hexc, identity};
use lorica_mls::access::{self, EpochAccessKey};

use crate::{ChainError, Result};

/// The all-zero hash anchoring index 0.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A personal chain entry in the owner's plaintext view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalEntry {
    /// Position in the chain, starting at 0.
    pub index: u64,
    /// Hash of the predecessor; [`GENESIS_HASH`] at index 0.
    pub prev_hash: String,
    /// The DBLog payload.
    pub content: String,
    /// 32 random bytes, hex.
    pub nonce: String,
    /// SHA-256 of the canonical string, hex.
    pub hash: String,
    /// EIP-191 signature over the canonical string by the owner.
    pub signature: String,
    /// Client wall-clock milliseconds.
    pub created_at: u64,
}

/// A personal chain entry on the wire: `content` is the ECIES envelope
/// addressed to the owner's own public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPersonalEntry {
    pub index: u64,
    pub prev_hash: String,
    /// ECIES envelope of the plaintext content, base64.
    pub content: String,
    pub nonce: String,
    pub hash: String,
    pub signature: String,
    pub created_at: u64,
}

/// A group chain entry as the server sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub index: u64,
    pub prev_hash: String,
    /// AES-256-GCM (`IV12 || TAG16 || CT`) of the canonical payload JSON
    /// under the epoch's group key, base64.
    pub ciphertext: String,
    pub nonce: String,
    /// SHA-256 of the canonical string over the ciphertext, hex.
    pub hash: String,
    /// Serialized BBS+ signature over the canonical hash string.
    pub group_signature: String,
    /// HMAC-SHA256 of the hash string under the epoch access key, hex.
    pub access_proof: String,
    pub created_at: u64,
}

/// The decrypted content of a group entry. Never visible to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedPayload {
    /// The application string, typically DBLog JSON.
    pub content: String,
    /// The sender's checksummed address.
    pub sender_address: String,
    /// EIP-191 signature over `content` by the sender's identity key.
    pub sender_signature: String,
    /// MLS epoch at encryption time.
    pub epoch: u64,
    /// Client wall-clock milliseconds.
    pub timestamp: u64,
    /// Optional group-management operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_op: Option<SystemOp>,
}

/// Group-management operations carried inside entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemOp {
    /// Announces the next epoch's access key, proven against the current one.
    #[serde(rename_all = "camelCase")]
    EpochTransition {
        new_access_key: EpochAccessKey,
        /// `HMAC(key_i, key_{i+1})`, hex.
        transition_proof: String,
    },
    /// A non-member asks to join.
    #[serde(rename_all = "camelCase")]
    JoinRequest { address: String, public_key: String },
    /// A member accepted a join request.
    #[serde(rename_all = "camelCase")]
    JoinAccepted { address: String, leaf_index: u32 },
    /// A member was removed.
    #[serde(rename_all = "camelCase")]
    MemberRemoved { address: String, leaf_index: u32 },
}

// ---------------------------------------------------------------------------
// Canonical hashing
// ---------------------------------------------------------------------------

/// The canonical string an entry hash and signature cover.
pub fn canonical_string(index: u64, prev_hash: &str, payload: &str, nonce: &str) -> String {
    format!("{index}:{prev_hash}:{payload}:{nonce}")
}

/// SHA-256 of the canonical string, lowercase hex.
pub fn entry_hash(index: u64, prev_hash: &str, payload: &str, nonce: &str) -> String {
    let digest = Sha256::digest(canonical_string(index, prev_hash, payload, nonce).as_bytes());
    hexc::encode(&digest)
}

/// 32 random bytes as lowercase hex.
pub fn random_nonce() -> String {
    let mut nonce = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    hexc::encode(&nonce)
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Canonical JSON: alphabetical keys, no extraneous whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    // serde_json's default map preserves alphabetical ordering via BTreeMap,
    // so serializing through Value sorts object keys.
    let value =
        serde_json::to_value(value).map_err(|e| ChainError::Serialization(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| ChainError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Personal envelope
// ---------------------------------------------------------------------------

/// Build and sign a personal entry.
pub fn build_personal_entry(
    owner: &identity::IdentityKeypair,
    index: u64,
    prev_hash: &str,
    content: &str,
) -> Result<PersonalEntry> {
    let nonce = random_nonce();
    let canonical = canonical_string(index, prev_hash, content, &nonce);
    let hash = hexc::encode(&Sha256::digest(canonical.as_bytes()));
    let signature = owner.sign_message(&canonical)?;

    Ok(PersonalEntry {
        index,
        prev_hash: prev_hash.to_string(),
        content: content.to_string(),
        nonce,
        hash,
        signature,
        created_at: now_millis(),
    })
}

/// Encrypt a personal entry's content to the owner's public key.
pub fn encrypt_personal(
    entry: &PersonalEntry,
    owner_public_key: &[u8; 65],
) -> Result<EncryptedPersonalEntry> {
    let content = ecies::encrypt(owner_public_key, entry.content.as_bytes())?;
    Ok(EncryptedPersonalEntry {
        index: entry.index,
        prev_hash: entry.prev_hash.clone(),
        content,
        nonce: entry.nonce.clone(),
        hash: entry.hash.clone(),
        signature: entry.signature.clone(),
        created_at: entry.created_at,
    })
}

/// Decrypt a wire entry back into the owner's plaintext view.
pub fn decrypt_personal(
    entry: &EncryptedPersonalEntry,
    owner_private_hex: &str,
) -> Result<PersonalEntry> {
    let plaintext = ecies::decrypt(owner_private_hex, &entry.content)?;
    let content = String::from_utf8(plaintext)
        .map_err(|e| ChainError::Serialization(format!("content is not UTF-8: {e}")))?;
    Ok(PersonalEntry {
        index: entry.index,
        prev_hash: entry.prev_hash.clone(),
        content,
        nonce: entry.nonce.clone(),
        hash: entry.hash.clone(),
        signature: entry.signature.clone(),
        created_at: entry.created_at,
    })
}

/// Verify a personal entry's hash and owner signature.
pub fn verify_personal(entry: &PersonalEntry, owner_address: &str) -> Result<()> {
    let canonical =
        canonical_string(entry.index, &entry.prev_hash, &entry.content, &entry.nonce);
    let expected = hexc::encode(&Sha256::digest(canonical.as_bytes()));
    if expected != entry.hash {
        return Err(ChainError::InvalidHash {
            index: entry.index,
            expected,
            got: entry.hash.clone(),
        });
    }

    let recovered = identity::recover_address(&canonical, &entry.signature)?;
    if !hexc::address_eq(&recovered, owner_address) {
        return Err(ChainError::SignerMismatch {
            expected: owner_address.to_string(),
            recovered,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Group envelope
// ---------------------------------------------------------------------------

/// Build a signed payload for a group entry.
pub fn build_payload(
    sender: &identity::IdentityKeypair,
    content: &str,
    epoch: u64,
    system_op: Option<SystemOp>,
) -> Result<DecryptedPayload> {
    Ok(DecryptedPayload {
        content: content.to_string(),
        sender_address: sender.address(),
        sender_signature: sender.sign_message(content)?,
        epoch,
        timestamp: now_millis(),
        system_op,
    })
}

/// Seal a payload into a group entry: encrypt, hash, sign, prove.
pub fn seal_group_entry(
    payload: &DecryptedPayload,
    group_key: &[u8; 32],
    index: u64,
    prev_hash: &str,
    credential: &MemberCredential,
    group_public_key: &GroupPublicKey,
    access_key: &EpochAccessKey,
) -> Result<GroupEntry> {
    let plaintext = canonical_json(payload)?;
    let ciphertext = BASE64.encode(aead::seal(group_key, plaintext.as_bytes())?);

    let nonce = random_nonce();
    let hash = entry_hash(index, prev_hash, &ciphertext, &nonce);
    let group_signature = signature::sign(&hash, credential, group_public_key).to_json()?;
    let access_proof = access::access_proof(access_key, &hash)?;

    Ok(GroupEntry {
        index,
        prev_hash: prev_hash.to_string(),
        ciphertext,
        nonce,
        hash,
        group_signature,
        access_proof,
        created_at: payload.timestamp,
    })
}

/// Check a group entry's hash and decrypt its payload.
pub fn open_group_entry(entry: &GroupEntry, group_key: &[u8; 32]) -> Result<DecryptedPayload> {
    verify_group_entry_hash(entry)?;
    let sealed = BASE64
        .decode(&entry.ciphertext)
        .map_err(|e| ChainError::Serialization(e.to_string()))?;
    let plaintext = aead::open(group_key, &sealed)?;
    serde_json::from_slice(&plaintext).map_err(|e| ChainError::Serialization(e.to_string()))
}

/// Recompute and check a group entry's hash over its ciphertext.
pub fn verify_group_entry_hash(entry: &GroupEntry) -> Result<()> {
    let expected = entry_hash(entry.index, &entry.prev_hash, &entry.ciphertext, &entry.nonce);
    if expected != entry.hash {
        return Err(ChainError::InvalidHash {
            index: entry.index,
            expected,
            got: entry.hash.clone(),
        });
    }
    Ok(())
}

/// Verify a group entry's server-checkable envelope: hash, anonymous group
/// signature, and epoch access proof.
pub fn verify_group_entry(
    entry: &GroupEntry,
    group_public_key: &GroupPublicKey,
    access_key: &EpochAccessKey,
) -> Result<()> {
    verify_group_entry_hash(entry)?;
    let group_signature = GroupSignature::from_json(&entry.group_signature)?;
    signature::verify(&entry.hash, &group_signature, group_public_key)?;
    access::verify_access_proof(access_key, &entry.hash, &entry.access_proof)?;
    Ok(())
}

/// Verify a decrypted payload's sender signature, returning the sender's
/// recovered address.
pub fn verify_payload_sender(payload: &DecryptedPayload) -> Result<String> {
    let recovered = identity::recover_address(&payload.content, &payload.sender_signature)
        .map_err(|_| ChainError::UnknownSender("sender signature unrecoverable".into()))?;
    if !hexc::address_eq(&recovered, &payload.sender_address) {
        return Err(ChainError::UnknownSender(format!(
            "claimed {}, recovered {}",
            payload.sender_address, recovered
        )));
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorica_bbs::keys;

    #[test]
    fn test_genesis_canonical_hash_vector() {
        // Deterministic vector: index 0, genesis prevHash, content "[]",
        // nonce of 64 zero hex chars.
        let nonce = "00".repeat(32);
        let canonical = canonical_string(0, GENESIS_HASH, "[]", &nonce);
        assert_eq!(canonical, format!("0:{GENESIS_HASH}:[]:{nonce}"));

        let hash = entry_hash(0, GENESIS_HASH, "[]", &nonce);
        assert_eq!(hash, hexc::encode(&Sha256::digest(canonical.as_bytes())));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_personal_entry_build_and_verify() {
        let owner = identity::IdentityKeypair::generate();
        let entry = build_personal_entry(&owner, 0, GENESIS_HASH, "[]").expect("build");

        assert_eq!(entry.index, 0);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        verify_personal(&entry, &owner.address()).expect("verify");
    }

    #[test]
    fn test_personal_entry_wrong_owner_rejected() {
        let owner = identity::IdentityKeypair::generate();
        let other = identity::IdentityKeypair::generate();
        let entry = build_personal_entry(&owner, 0, GENESIS_HASH, "[]").expect("build");
        assert!(matches!(
            verify_personal(&entry, &other.address()),
            Err(ChainError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn test_personal_entry_tampered_content_rejected() {
        let owner = identity::IdentityKeypair::generate();
        let mut entry = build_personal_entry(&owner, 0, GENESIS_HASH, "[]").expect("build");
        entry.content = "[1]".into();
        assert!(matches!(
            verify_personal(&entry, &owner.address()),
            Err(ChainError::InvalidHash { .. })
        ));
    }

    #[test]
    fn test_personal_encrypt_decrypt_roundtrip() {
        let owner = identity::IdentityKeypair::generate();
        let entry =
            build_personal_entry(&owner, 3, &"ab".repeat(32), "payload").expect("build");

        let wire = encrypt_personal(&entry, &owner.public_key()).expect("encrypt");
        assert_ne!(wire.content, entry.content);

        let restored = decrypt_personal(&wire, &owner.private_hex()).expect("decrypt");
        assert_eq!(restored, entry);
        verify_personal(&restored, &owner.address()).expect("verify");
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let payload = DecryptedPayload {
            content: "[]".into(),
            sender_address: "0xAb".into(),
            sender_signature: "0xcd".into(),
            epoch: 1,
            timestamp: 2,
            system_op: None,
        };
        let json = canonical_json(&payload).expect("canonical");
        let content_at = json.find("\"content\"").expect("content key");
        let epoch_at = json.find("\"epoch\"").expect("epoch key");
        let sender_at = json.find("\"senderAddress\"").expect("sender key");
        assert!(content_at < epoch_at && epoch_at < sender_at);
        assert!(!json.contains(": "));
    }

    #[test]
    fn test_group_entry_roundtrip() {
        let sender = identity::IdentityKeypair::generate();
        let manager = keys::generate_group_keypair();
        let credential = keys::issue_credential(&manager).expect("issue");
        let group_key = [0x42u8; 32];
        let access_key = EpochAccessKey::derive(&group_key, "00".repeat(16).as_str(), 0);

        let payload = build_payload(&sender, "[]", 0, None).expect("payload");
        let entry = seal_group_entry(
            &payload,
            &group_key,
            0,
            GENESIS_HASH,
            &credential,
            &manager.public_key,
            &access_key,
        )
        .expect("seal");

        verify_group_entry(&entry, &manager.public_key, &access_key).expect("verify");
        let opened = open_group_entry(&entry, &group_key).expect("open");
        assert_eq!(opened, payload);
        assert_eq!(verify_payload_sender(&opened).expect("sender"), sender.address());
    }

    #[test]
    fn test_group_entry_tampered_ciphertext_rejected() {
        let sender = identity::IdentityKeypair::generate();
        let manager = keys::generate_group_keypair();
        let credential = keys::issue_credential(&manager).expect("issue");
        let group_key = [0x42u8; 32];
        let access_key = EpochAccessKey::derive(&group_key, "00".repeat(16).as_str(), 0);

        let payload = build_payload(&sender, "[]", 0, None).expect("payload");
        let mut entry = seal_group_entry(
            &payload,
            &group_key,
            0,
            GENESIS_HASH,
            &credential,
            &manager.public_key,
            &access_key,
        )
        .expect("seal");

        entry.ciphertext = BASE64.encode(b"forged ciphertext bytes well over minimum");
        assert!(matches!(
            verify_group_entry(&entry, &manager.public_key, &access_key),
            Err(ChainError::InvalidHash { .. })
        ));
    }

    #[test]
    fn test_group_entry_wrong_epoch_key_rejected() {
        let sender = identity::IdentityKeypair::generate();
        let manager = keys::generate_group_keypair();
        let credential = keys::issue_credential(&manager).expect("issue");
        let group_key = [0x42u8; 32];
        let access_key = EpochAccessKey::derive(&group_key, "00".repeat(16).as_str(), 0);
        let other_epoch = EpochAccessKey::derive(&group_key, "00".repeat(16).as_str(), 1);

        let payload = build_payload(&sender, "[]", 0, None).expect("payload");
        let entry = seal_group_entry(
            &payload,
            &group_key,
            0,
            GENESIS_HASH,
            &credential,
            &manager.public_key,
            &access_key,
        )
        .expect("seal");

        assert!(verify_group_entry(&entry, &manager.public_key, &other_epoch).is_err());
    }

    #[test]
    fn test_payload_sender_forgery_rejected() {
        let sender = identity::IdentityKeypair::generate();
        let mut payload = build_payload(&sender, "[]", 0, None).expect("payload");
        payload.sender_address = identity::IdentityKeypair::generate().address();
        assert!(matches!(
            verify_payload_sender(&payload),
            Err(ChainError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_system_op_wire_shape() {
        let op = SystemOp::EpochTransition {
            new_access_key: EpochAccessKey {
                key: "11".repeat(32),
                epoch: 1,
            },
            transition_proof: "22".repeat(32),
        };
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["type"], "epoch_transition");
        assert_eq!(json["newAccessKey"]["epoch"], 1);

        let restored: SystemOp = serde_json::from_value(json).expect("deserialize");
        assert_eq!(restored, op);
    }
}
