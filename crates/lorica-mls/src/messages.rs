//! Typed wire messages for group operations.
//!
//! Every message carries a literal `type` discriminator: `welcome`, `add`,
//! `remove`, `update`, or `application`. Welcome bodies are sealed to the
//! invitee's public key with an ephemeral-ECDH envelope whose AEAD key is
//! derived under the `mls-welcome-key || pub65` label.

use serde::{Deserialize, Serialize};

use lorica_crypto::{ecies, kdf};

use crate::group::PathSecret;
use crate::tree::{NodeIndex, RatchetTree};
use crate::{MlsError, Result};

/// A freshly announced public key for one direct-path node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePublicKey {
    /// Node index in the tree array.
    pub node_index: NodeIndex,
    /// Uncompressed secp256k1 public key, hex.
    pub public_key: String,
}

/// A path secret encrypted to one node of a copath resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPathSecret {
    /// The direct-path node whose secret this is.
    pub path_node: NodeIndex,
    /// The resolution node whose key can open the ciphertext.
    pub recipient_node: NodeIndex,
    /// ECIES envelope, base64.
    pub ciphertext: String,
}

/// The body of an update-path: the sender's fresh leaf key, the announced
/// path node keys, and the encrypted path secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePath {
    /// Sender's leaf position.
    pub sender_leaf: u32,
    /// Sender's fresh leaf public key, hex.
    pub leaf_public_key: String,
    /// New public keys along the sender's direct path, bottom to root.
    pub node_public_keys: Vec<NodePublicKey>,
    /// Path secrets encrypted to each copath resolution.
    pub encrypted_path_secrets: Vec<EncryptedPathSecret>,
}

/// Announces a new member and carries the accompanying path update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessage {
    pub group_id: String,
    /// The epoch after the add.
    pub epoch: u64,
    /// Leaf position allocated to the new member.
    pub new_leaf: u32,
    /// The new member's public key, hex.
    pub member_public_key: String,
    pub path: UpdatePath,
}

/// Announces a removal and carries the accompanying path update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMessage {
    pub group_id: String,
    /// The epoch after the removal.
    pub epoch: u64,
    /// Leaf position of the removed member.
    pub removed_leaf: u32,
    pub path: UpdatePath,
}

/// A self-initiated key refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub group_id: String,
    /// The epoch after the update.
    pub epoch: u64,
    pub path: UpdatePath,
}

/// An encrypted application payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMessage {
    pub group_id: String,
    /// The epoch whose group key sealed the payload.
    pub epoch: u64,
    /// `IV12 || TAG16 || CT` under the group key, base64.
    pub ciphertext: String,
}

/// The sealed invitation for a new member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMessage {
    pub group_id: String,
    /// The epoch the invitee joins at.
    pub epoch: u64,
    /// The invitee's public key the body is sealed to, hex.
    pub recipient_public_key: String,
    /// Sealed [`WelcomeBody`], base64.
    pub sealed: String,
}

/// The plaintext welcome body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeBody {
    pub group_id: String,
    pub epoch: u64,
    /// The full tree after the add.
    pub tree: RatchetTree,
    /// The invitee's leaf position.
    pub leaf_index: u32,
    /// The invitee's ancestor chain of path secrets, bottom to root.
    pub path_secrets: Vec<PathSecret>,
}

/// Any group message, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MlsMessage {
    Welcome(WelcomeMessage),
    Add(AddMessage),
    Remove(RemoveMessage),
    Update(UpdateMessage),
    Application(ApplicationMessage),
}

/// Seal a welcome body to the invitee's public key.
pub fn seal_welcome(body: &WelcomeBody, recipient_public_hex: &str) -> Result<WelcomeMessage> {
    let recipient: [u8; 65] = lorica_crypto::hex::decode_fixed(recipient_public_hex)
        .map_err(MlsError::Crypto)?;
    let plaintext =
        serde_json::to_vec(body).map_err(|e| MlsError::Serialization(e.to_string()))?;
    let sealed = ecies::encrypt_with_info(
        &recipient,
        &kdf::welcome_key_info(&recipient),
        &plaintext,
    )?;
    Ok(WelcomeMessage {
        group_id: body.group_id.clone(),
        epoch: body.epoch,
        recipient_public_key: recipient_public_hex.to_string(),
        sealed,
    })
}

/// Open a welcome with the invitee's private key.
pub fn open_welcome(message: &WelcomeMessage, private_hex: &str) -> Result<WelcomeBody> {
    let recipient: [u8; 65] = lorica_crypto::hex::decode_fixed(&message.recipient_public_key)
        .map_err(MlsError::Crypto)?;
    let plaintext = ecies::decrypt_with_info(
        private_hex,
        &kdf::welcome_key_info(&recipient),
        &message.sealed,
    )?;
    serde_json::from_slice(&plaintext).map_err(|e| MlsError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorica_crypto::identity::IdentityKeypair;

    fn sample_body() -> WelcomeBody {
        WelcomeBody {
            group_id: "aabbccdd00112233aabbccdd00112233".into(),
            epoch: 0,
            tree: RatchetTree::new(2),
            leaf_index: 1,
            path_secrets: vec![PathSecret {
                node_index: 1,
                secret: "11".repeat(32),
            }],
        }
    }

    #[test]
    fn test_welcome_seal_open() {
        let invitee = IdentityKeypair::generate();
        let body = sample_body();
        let message =
            seal_welcome(&body, &lorica_crypto::hex::encode(&invitee.public_key()))
                .expect("seal");
        let opened = open_welcome(&message, &invitee.private_hex()).expect("open");
        assert_eq!(opened, body);
    }

    #[test]
    fn test_welcome_wrong_key_fails() {
        let invitee = IdentityKeypair::generate();
        let other = IdentityKeypair::generate();
        let message = seal_welcome(
            &sample_body(),
            &lorica_crypto::hex::encode(&invitee.public_key()),
        )
        .expect("seal");
        assert!(open_welcome(&message, &other.private_hex()).is_err());
    }

    #[test]
    fn test_message_type_discriminators() {
        let app = MlsMessage::Application(ApplicationMessage {
            group_id: "00".repeat(16),
            epoch: 3,
            ciphertext: "AAAA".into(),
        });
        let json = serde_json::to_value(&app).expect("serialize");
        assert_eq!(json["type"], "application");
        assert_eq!(json["epoch"], 3);

        let welcome = MlsMessage::Welcome(WelcomeMessage {
            group_id: "00".repeat(16),
            epoch: 0,
            recipient_public_key: "04".into(),
            sealed: "AAAA".into(),
        });
        let json = serde_json::to_value(&welcome).expect("serialize");
        assert_eq!(json["type"], "welcome");
    }

    #[test]
    fn test_message_roundtrip_through_tag() {
        let update = MlsMessage::Update(UpdateMessage {
            group_id: "00".repeat(16),
            epoch: 7,
            path: UpdatePath {
                sender_leaf: 2,
                leaf_public_key: "04ab".into(),
                node_public_keys: vec![NodePublicKey {
                    node_index: 5,
                    public_key: "04cd".into(),
                }],
                encrypted_path_secrets: vec![EncryptedPathSecret {
                    path_node: 5,
                    recipient_node: 6,
                    ciphertext: "AAECAw==".into(),
                }],
            },
        });
        let json = serde_json::to_string(&update).expect("serialize");
        let restored: MlsMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(update, restored);
    }
}
