//! Group state and path updates.
//!
//! A path update refreshes every key from the updater's leaf to the root:
//! a fresh leaf secret seeds a chain where each step's secret either mixes
//! an ECDH with the populated copath child or, over a blank copath, is
//! skip-derived under a node-indexed label. Node private keys derive from
//! the node's own secret, so every member below a node can reconstruct its
//! key once it learns the node's secret. The group key is derived from the
//! root secret; receivers derive it deterministically from their decrypted
//! path secret and the applied tree, never by re-sampling.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{ProjectivePoint, PublicKey, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use lorica_crypto::{aead, ecies, hex as hexc, kdf};

use crate::messages::{
    AddMessage, ApplicationMessage, EncryptedPathSecret, NodePublicKey, RemoveMessage,
    UpdateMessage, UpdatePath, WelcomeBody, WelcomeMessage,
};
use crate::tree::{
    direct_path, leaf_to_node, sibling, LeafNode, NodeIndex, ParentNode, RatchetTree,
};
use crate::{messages, MlsError, Result};

/// A path secret held for one node, bottom-to-root ordered in
/// [`GroupState::path_secrets`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSecret {
    /// Node index the secret belongs to.
    pub node_index: NodeIndex,
    /// 32-byte secret, hex.
    pub secret: String,
}

/// One participant's view of a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupState {
    group_id: String,
    epoch: u64,
    tree: RatchetTree,
    my_leaf_index: u32,
    my_leaf_private_key: String,
    path_secrets: Vec<PathSecret>,
    group_key: String,
}

impl GroupState {
    /// The 16-byte group id, hex.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// This participant's leaf position.
    pub fn my_leaf_index(&self) -> u32 {
        self.my_leaf_index
    }

    /// The tree, read-only.
    pub fn tree(&self) -> &RatchetTree {
        &self.tree
    }

    /// The current group key, hex.
    pub fn group_key_hex(&self) -> &str {
        &self.group_key
    }

    /// The current group key as raw bytes.
    pub fn group_key(&self) -> Result<[u8; 32]> {
        hexc::decode_fixed(&self.group_key).map_err(MlsError::Crypto)
    }

    /// Number of populated leaves.
    pub fn member_count(&self) -> usize {
        self.tree.populated_leaves().len()
    }

    // -----------------------------------------------------------------------
    // Membership operations
    // -----------------------------------------------------------------------

    /// Add a member, allocating the first blank leaf (growing the tree if
    /// full). Returns the broadcast message and the invitee's welcome.
    pub fn add_member(
        &mut self,
        member_public_hex: &str,
    ) -> Result<(AddMessage, WelcomeMessage)> {
        let leaf = match self.tree.first_blank_leaf() {
            Some(leaf) => leaf,
            None => self.tree.extend(),
        };
        self.install_leaf(leaf, member_public_hex)?;

        self.epoch += 1;
        let path = self.run_path_update()?;
        let welcome = self.build_welcome(leaf, member_public_hex)?;

        tracing::debug!(
            group_id = %self.group_id,
            leaf,
            epoch = self.epoch,
            "added member"
        );

        Ok((
            AddMessage {
                group_id: self.group_id.clone(),
                epoch: self.epoch,
                new_leaf: leaf,
                member_public_key: member_public_hex.to_string(),
                path,
            },
            welcome,
        ))
    }

    /// Remove a member's leaf. Fails when targeting our own leaf.
    pub fn remove_member(&mut self, leaf: u32) -> Result<RemoveMessage> {
        if leaf == self.my_leaf_index {
            return Err(MlsError::CannotRemoveSelf);
        }
        if self.tree.leaf(leaf).is_none() {
            return Err(MlsError::MemberNotFound(leaf));
        }
        self.tree.remove_leaf(leaf)?;

        self.epoch += 1;
        let path = self.run_path_update()?;

        tracing::debug!(
            group_id = %self.group_id,
            leaf,
            epoch = self.epoch,
            "removed member"
        );

        Ok(RemoveMessage {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            removed_leaf: leaf,
            path,
        })
    }

    /// Refresh our own leaf key and path.
    pub fn update_own_key(&mut self) -> Result<UpdateMessage> {
        self.epoch += 1;
        let path = self.run_path_update()?;

        tracing::debug!(group_id = %self.group_id, epoch = self.epoch, "updated own key");

        Ok(UpdateMessage {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            path,
        })
    }

    // -----------------------------------------------------------------------
    // Processing received operations
    // -----------------------------------------------------------------------

    /// Apply a received add. Requires `message.epoch == local epoch + 1`.
    pub fn process_add(&mut self, message: &AddMessage) -> Result<()> {
        self.check_next_epoch(message.epoch)?;
        while (message.new_leaf as usize) >= self.tree.leaf_count() {
            self.tree.extend();
        }
        if self.tree.leaf(message.new_leaf).is_some() {
            return Err(MlsError::LeafOccupied(message.new_leaf));
        }
        self.install_leaf(message.new_leaf, &message.member_public_key)?;
        self.apply_update_path(&message.path)?;
        self.epoch = message.epoch;
        Ok(())
    }

    /// Apply a received removal. Processing a removal of our own leaf fails
    /// with [`MlsError::RemovedFromGroup`]; the caller deletes local state.
    pub fn process_remove(&mut self, message: &RemoveMessage) -> Result<()> {
        self.check_next_epoch(message.epoch)?;
        if message.removed_leaf == self.my_leaf_index {
            return Err(MlsError::RemovedFromGroup);
        }
        if self.tree.leaf(message.removed_leaf).is_none() {
            return Err(MlsError::MemberNotFound(message.removed_leaf));
        }
        self.tree.remove_leaf(message.removed_leaf)?;
        self.apply_update_path(&message.path)?;
        self.epoch = message.epoch;
        Ok(())
    }

    /// Apply a received self-update.
    pub fn process_update(&mut self, message: &UpdateMessage) -> Result<()> {
        self.check_next_epoch(message.epoch)?;
        self.apply_update_path(&message.path)?;
        self.epoch = message.epoch;
        Ok(())
    }

    fn check_next_epoch(&self, epoch: u64) -> Result<()> {
        if epoch != self.epoch + 1 {
            return Err(MlsError::InvalidEpoch {
                expected: self.epoch + 1,
                actual: epoch,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Application messages
    // -----------------------------------------------------------------------

    /// Encrypt an application payload under the current group key.
    pub fn encrypt_application(&self, plaintext: &[u8]) -> Result<ApplicationMessage> {
        let key = self.group_key()?;
        let sealed = aead::seal(&key, plaintext)?;
        Ok(ApplicationMessage {
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            ciphertext: BASE64.encode(sealed),
        })
    }

    /// Decrypt an application payload. The message epoch must equal ours.
    pub fn decrypt_application(&self, message: &ApplicationMessage) -> Result<Vec<u8>> {
        if message.epoch != self.epoch {
            return Err(MlsError::InvalidEpoch {
                expected: self.epoch,
                actual: message.epoch,
            });
        }
        let key = self.group_key()?;
        let sealed = BASE64
            .decode(&message.ciphertext)
            .map_err(|e| MlsError::Serialization(e.to_string()))?;
        Ok(aead::open(&key, &sealed)?)
    }

    // -----------------------------------------------------------------------
    // Path update mechanics
    // -----------------------------------------------------------------------

    fn install_leaf(&mut self, leaf: u32, public_hex: &str) -> Result<()> {
        self.tree.set_leaf(
            leaf,
            Some(LeafNode {
                index: leaf,
                public_key: public_hex.to_string(),
            }),
        )?;
        self.tree.mark_unmerged(leaf);
        Ok(())
    }

    /// Run a path update from our leaf: fresh leaf secret, new keys along
    /// the direct path, encrypted path secrets for each copath resolution.
    fn run_path_update(&mut self) -> Result<UpdatePath> {
        let my_node = leaf_to_node(self.my_leaf_index);
        let leaf_count = self.tree.leaf_count();

        let mut leaf_secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut leaf_secret);
        let (leaf_private, leaf_public) = node_keypair(&leaf_secret)?;
        self.my_leaf_private_key = leaf_private.clone();
        self.tree.set_leaf(
            self.my_leaf_index,
            Some(LeafNode {
                index: self.my_leaf_index,
                public_key: leaf_public.clone(),
            }),
        )?;

        let mut secrets = vec![PathSecret {
            node_index: my_node,
            secret: hexc::encode(&leaf_secret),
        }];
        let mut node_public_keys = Vec::new();
        let mut encrypted = Vec::new();

        let mut current_secret = leaf_secret;
        let mut previous_node = my_node;
        let mut previous_private = leaf_private;

        for ancestor in direct_path(my_node, leaf_count) {
            let copath_child = sibling(previous_node, leaf_count).ok_or_else(|| {
                MlsError::TreeIndex(format!("node {previous_node} has no sibling"))
            })?;

            let next_secret = match self.tree.public_key(copath_child) {
                Some(public_hex) => {
                    let shared = ecdh_point(&previous_private, public_hex)?;
                    kdf::derive_labeled(&shared, kdf::labels::NODE_KEY)
                }
                None => kdf::derive(&current_secret, &kdf::path_secret_info(ancestor as u32)),
            };

            let (node_private, node_public) = node_keypair(&next_secret)?;
            self.tree.set_parent(
                ancestor,
                Some(ParentNode {
                    public_key: node_public.clone(),
                    unmerged_leaves: Vec::new(),
                }),
            )?;
            node_public_keys.push(NodePublicKey {
                node_index: ancestor,
                public_key: node_public,
            });

            for recipient in self.tree.resolution(copath_child)? {
                let public_hex = self.tree.public_key(recipient).ok_or_else(|| {
                    MlsError::TreeIndex(format!("resolution node {recipient} has no key"))
                })?;
                let recipient_key: [u8; 65] =
                    hexc::decode_fixed(public_hex).map_err(MlsError::Crypto)?;
                encrypted.push(EncryptedPathSecret {
                    path_node: ancestor,
                    recipient_node: recipient,
                    ciphertext: ecies::encrypt(&recipient_key, &next_secret)?,
                });
            }

            secrets.push(PathSecret {
                node_index: ancestor,
                secret: hexc::encode(&next_secret),
            });
            current_secret = next_secret;
            previous_node = ancestor;
            previous_private = node_private;
        }

        self.path_secrets = secrets;
        self.group_key =
            hexc::encode(&kdf::derive_labeled(&current_secret, kdf::labels::GROUP_KEY));

        Ok(UpdatePath {
            sender_leaf: self.my_leaf_index,
            leaf_public_key: leaf_public,
            node_public_keys,
            encrypted_path_secrets: encrypted,
        })
    }

    /// Install a received update path and derive the new group key from our
    /// decrypted path secret and the applied tree.
    fn apply_update_path(&mut self, path: &UpdatePath) -> Result<()> {
        let leaf_count = self.tree.leaf_count();
        let sender_node = leaf_to_node(path.sender_leaf);

        // Install the sender's fresh leaf and path keys; refreshed parents
        // start with empty unmerged lists.
        self.tree.set_leaf(
            path.sender_leaf,
            Some(LeafNode {
                index: path.sender_leaf,
                public_key: path.leaf_public_key.clone(),
            }),
        )?;
        for announced in &path.node_public_keys {
            self.tree.set_parent(
                announced.node_index,
                Some(ParentNode {
                    public_key: announced.public_key.clone(),
                    unmerged_leaves: Vec::new(),
                }),
            )?;
        }

        // Find the common ancestor: the first node of the sender's direct
        // path that also covers our leaf.
        let my_node = leaf_to_node(self.my_leaf_index);
        let mut my_path: HashSet<NodeIndex> = HashSet::from([my_node]);
        my_path.extend(direct_path(my_node, leaf_count));

        let sender_path = direct_path(sender_node, leaf_count);
        let mut previous = sender_node;
        let mut common = None;
        for (position, ancestor) in sender_path.iter().enumerate() {
            if my_path.contains(ancestor) {
                common = Some((position, *ancestor, previous));
                break;
            }
            previous = *ancestor;
        }
        let (position, common_ancestor, sender_child) = common.ok_or_else(|| {
            MlsError::TreeIndex("update path shares no ancestor with our leaf".into())
        })?;

        let common_secret =
            self.recover_path_secret(path, common_ancestor, sender_child, leaf_count)?;

        // Chain the remaining secrets up to the root.
        let mut new_secrets = vec![PathSecret {
            node_index: common_ancestor,
            secret: hexc::encode(&common_secret),
        }];
        let mut current_secret = common_secret;
        let mut previous_node = common_ancestor;
        let mut previous_private = node_keypair(&common_secret)?.0;

        for ancestor in &sender_path[position + 1..] {
            let copath_child = sibling(previous_node, leaf_count).ok_or_else(|| {
                MlsError::TreeIndex(format!("node {previous_node} has no sibling"))
            })?;
            let next_secret = match self.tree.public_key(copath_child) {
                Some(public_hex) => {
                    let shared = ecdh_point(&previous_private, public_hex)?;
                    kdf::derive_labeled(&shared, kdf::labels::NODE_KEY)
                }
                None => {
                    kdf::derive(&current_secret, &kdf::path_secret_info(*ancestor as u32))
                }
            };
            new_secrets.push(PathSecret {
                node_index: *ancestor,
                secret: hexc::encode(&next_secret),
            });
            previous_private = node_keypair(&next_secret)?.0;
            previous_node = *ancestor;
            current_secret = next_secret;
        }

        // Secrets at or above the common ancestor are refreshed; ours below
        // it are untouched by the sender's update.
        let replaced: HashSet<NodeIndex> =
            new_secrets.iter().map(|s| s.node_index).collect();
        self.path_secrets.retain(|s| !replaced.contains(&s.node_index));
        self.path_secrets.extend(new_secrets);

        self.group_key =
            hexc::encode(&kdf::derive_labeled(&current_secret, kdf::labels::GROUP_KEY));
        Ok(())
    }

    /// Obtain the path secret at the common ancestor, either from a
    /// ciphertext addressed to a node we hold the key of, or directly via
    /// ECDH symmetry with the sender-side child.
    fn recover_path_secret(
        &self,
        path: &UpdatePath,
        common_ancestor: NodeIndex,
        sender_child: NodeIndex,
        leaf_count: usize,
    ) -> Result<[u8; 32]> {
        for encrypted in path
            .encrypted_path_secrets
            .iter()
            .filter(|e| e.path_node == common_ancestor)
        {
            let Some(private_hex) = self.private_key_for(encrypted.recipient_node)? else {
                continue;
            };
            if let Ok(plaintext) = ecies::decrypt(&private_hex, &encrypted.ciphertext) {
                let secret: [u8; 32] = plaintext.try_into().map_err(|_| {
                    MlsError::Serialization("path secret is not 32 bytes".into())
                })?;
                return Ok(secret);
            }
        }

        // ECDH symmetry: the sender computed this secret against our
        // copath-side key, so that key recomputes it from the sender side.
        let our_side = sibling(sender_child, leaf_count);
        if let Some(our_side) = our_side {
            if let (Some(private_hex), Some(partner_public)) = (
                self.private_key_for(our_side)?,
                self.tree.public_key(sender_child),
            ) {
                let shared = ecdh_point(&private_hex, partner_public)?;
                return Ok(kdf::derive_labeled(&shared, kdf::labels::NODE_KEY));
            }
        }

        Err(MlsError::NoDecryptablePathSecret)
    }

    /// The private key we hold for a node: our leaf key, or one derived
    /// from a stored path secret.
    fn private_key_for(&self, node: NodeIndex) -> Result<Option<String>> {
        if node == leaf_to_node(self.my_leaf_index) {
            return Ok(Some(self.my_leaf_private_key.clone()));
        }
        for stored in &self.path_secrets {
            if stored.node_index == node {
                let secret: [u8; 32] =
                    hexc::decode_fixed(&stored.secret).map_err(MlsError::Crypto)?;
                return Ok(Some(node_keypair(&secret)?.0));
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Welcome
    // -----------------------------------------------------------------------

    /// Build the welcome for a freshly added leaf: our path secrets at the
    /// invitee's ancestors, bottom to root.
    fn build_welcome(&self, leaf: u32, recipient_public_hex: &str) -> Result<WelcomeMessage> {
        let member_node = leaf_to_node(leaf);
        let ancestors: HashSet<NodeIndex> =
            direct_path(member_node, self.tree.leaf_count()).into_iter().collect();
        let chain: Vec<PathSecret> = self
            .path_secrets
            .iter()
            .filter(|s| ancestors.contains(&s.node_index))
            .cloned()
            .collect();

        messages::seal_welcome(
            &WelcomeBody {
                group_id: self.group_id.clone(),
                epoch: self.epoch,
                tree: self.tree.clone(),
                leaf_index: leaf,
                path_secrets: chain,
            },
            recipient_public_hex,
        )
    }
}

/// Create a group with the creator at leaf 0 and the given members at the
/// following leaves. The creator's initial path update happens at epoch 0;
/// one welcome per initial member is returned.
pub fn create_group(
    member_public_keys: &[String],
) -> Result<(GroupState, Vec<WelcomeMessage>)> {
    let leaf_count = 1 + member_public_keys.len();
    let mut tree = RatchetTree::new(leaf_count);
    for (offset, public_hex) in member_public_keys.iter().enumerate() {
        let leaf = (offset + 1) as u32;
        tree.set_leaf(
            leaf,
            Some(LeafNode {
                index: leaf,
                public_key: public_hex.clone(),
            }),
        )?;
    }

    let mut group_id_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut group_id_bytes);

    let mut state = GroupState {
        group_id: hexc::encode(&group_id_bytes),
        epoch: 0,
        tree,
        my_leaf_index: 0,
        my_leaf_private_key: String::new(),
        path_secrets: Vec::new(),
        group_key: String::new(),
    };
    state.run_path_update()?;

    let welcomes = member_public_keys
        .iter()
        .enumerate()
        .map(|(offset, public_hex)| state.build_welcome((offset + 1) as u32, public_hex))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        group_id = %state.group_id,
        members = leaf_count,
        "created group"
    );

    Ok((state, welcomes))
}

/// Join a group from a welcome, using the private key matching the public
/// key the inviter installed at our leaf.
pub fn process_welcome(message: &WelcomeMessage, private_hex: &str) -> Result<GroupState> {
    let body = messages::open_welcome(message, private_hex)?;

    let root_entry = body
        .path_secrets
        .last()
        .ok_or(MlsError::NoDecryptablePathSecret)?;
    if root_entry.node_index != body.tree.root_index() {
        return Err(MlsError::TreeIndex(format!(
            "welcome chain ends at node {}, expected root {}",
            root_entry.node_index,
            body.tree.root_index()
        )));
    }
    let root_secret: [u8; 32] =
        hexc::decode_fixed(&root_entry.secret).map_err(MlsError::Crypto)?;
    let group_key = hexc::encode(&kdf::derive_labeled(&root_secret, kdf::labels::GROUP_KEY));

    Ok(GroupState {
        group_id: body.group_id,
        epoch: body.epoch,
        tree: body.tree,
        my_leaf_index: body.leaf_index,
        my_leaf_private_key: private_hex.to_string(),
        path_secrets: body.path_secrets,
        group_key,
    })
}

/// Derive a node keypair from a node secret:
/// `priv = HKDF(secret, "mls-node-private-key")`.
fn node_keypair(secret: &[u8; 32]) -> Result<(String, String)> {
    let private_bytes = kdf::derive_labeled(secret, kdf::labels::NODE_PRIVATE_KEY);
    let private = SecretKey::from_slice(&private_bytes)
        .map_err(|_| MlsError::KeyDerivation("derived scalar out of range".into()))?;
    let public = private.public_key().to_encoded_point(false);
    Ok((hexc::encode(&private_bytes), hexc::encode(public.as_bytes())))
}

/// Uncompressed 65-byte ECDH point between a private key (hex) and a
/// public key (hex).
fn ecdh_point(private_hex: &str, public_hex: &str) -> Result<[u8; 65]> {
    let private_bytes: [u8; 32] = hexc::decode_fixed(private_hex).map_err(MlsError::Crypto)?;
    let private = SecretKey::from_slice(&private_bytes)
        .map_err(|_| MlsError::Crypto(lorica_crypto::CryptoError::InvalidPrivateKey))?;
    let public_bytes: [u8; 65] = hexc::decode_fixed(public_hex).map_err(MlsError::Crypto)?;
    let public = PublicKey::from_sec1_bytes(&public_bytes)
        .map_err(|_| MlsError::Crypto(lorica_crypto::CryptoError::InvalidPublicKey))?;

    let point: ProjectivePoint = public.to_projective() * *private.to_nonzero_scalar();
    let encoded = point.to_affine().to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(encoded.as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorica_crypto::identity::IdentityKeypair;

    struct Participant {
        keypair: IdentityKeypair,
    }

    impl Participant {
        fn new() -> Self {
            Self {
                keypair: IdentityKeypair::generate(),
            }
        }

        fn public_hex(&self) -> String {
            hexc::encode(&self.keypair.public_key())
        }
    }

    #[test]
    fn test_create_group_three_members_agree() {
        let p1 = Participant::new();
        let p2 = Participant::new();

        let (creator, welcomes) =
            create_group(&[p1.public_hex(), p2.public_hex()]).expect("create");
        assert_eq!(creator.epoch(), 0);
        assert_eq!(welcomes.len(), 2);

        let joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join p1");
        let joined2 = process_welcome(&welcomes[1], &p2.keypair.private_hex()).expect("join p2");

        assert_eq!(joined1.epoch(), 0);
        assert_eq!(joined2.epoch(), 0);
        assert_eq!(creator.group_key_hex(), joined1.group_key_hex());
        assert_eq!(creator.group_key_hex(), joined2.group_key_hex());
        assert_eq!(joined1.my_leaf_index(), 1);
        assert_eq!(joined2.my_leaf_index(), 2);
    }

    #[test]
    fn test_update_own_key_agreement() {
        let p1 = Participant::new();
        let p2 = Participant::new();
        let (mut creator, welcomes) =
            create_group(&[p1.public_hex(), p2.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");
        let mut joined2 = process_welcome(&welcomes[1], &p2.keypair.private_hex()).expect("join");

        let old_key = creator.group_key_hex().to_string();
        let update = joined1.update_own_key().expect("update");
        assert_eq!(update.epoch, 1);

        creator.process_update(&update).expect("creator applies");
        joined2.process_update(&update).expect("p2 applies");

        assert_eq!(creator.epoch(), 1);
        assert_eq!(joined1.epoch(), 1);
        assert_eq!(joined2.epoch(), 1);
        assert_eq!(creator.group_key_hex(), joined1.group_key_hex());
        assert_eq!(creator.group_key_hex(), joined2.group_key_hex());
        assert_ne!(creator.group_key_hex(), old_key);
    }

    #[test]
    fn test_add_member_agreement() {
        let p1 = Participant::new();
        let (mut creator, welcomes) = create_group(&[p1.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");

        let p2 = Participant::new();
        let (add, welcome) = creator.add_member(&p2.public_hex()).expect("add");
        assert_eq!(add.epoch, 1);

        joined1.process_add(&add).expect("p1 applies add");
        let joined2 = process_welcome(&welcome, &p2.keypair.private_hex()).expect("p2 joins");

        assert_eq!(creator.epoch(), 1);
        assert_eq!(joined2.epoch(), 1);
        assert_eq!(creator.group_key_hex(), joined1.group_key_hex());
        assert_eq!(creator.group_key_hex(), joined2.group_key_hex());
        assert_eq!(creator.member_count(), 3);
    }

    #[test]
    fn test_add_grows_tree_when_full() {
        let p1 = Participant::new();
        let (mut creator, _) = create_group(&[p1.public_hex()]).expect("create");
        assert_eq!(creator.tree().leaf_count(), 2);

        let p2 = Participant::new();
        creator.add_member(&p2.public_hex()).expect("add");
        assert_eq!(creator.tree().leaf_count(), 3);
    }

    #[test]
    fn test_remove_member_agreement_and_exclusion() {
        let p1 = Participant::new();
        let p2 = Participant::new();
        let (mut creator, welcomes) =
            create_group(&[p1.public_hex(), p2.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");
        let joined2 = process_welcome(&welcomes[1], &p2.keypair.private_hex()).expect("join");

        let remove = creator.remove_member(2).expect("remove");
        joined1.process_remove(&remove).expect("p1 applies");

        assert_eq!(creator.group_key_hex(), joined1.group_key_hex());
        assert_ne!(creator.group_key_hex(), joined2.group_key_hex());
        assert_eq!(creator.member_count(), 2);
    }

    #[test]
    fn test_removed_member_sees_removal() {
        let p1 = Participant::new();
        let (mut creator, welcomes) = create_group(&[p1.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");

        let remove = creator.remove_member(1).expect("remove");
        assert!(matches!(
            joined1.process_remove(&remove),
            Err(MlsError::RemovedFromGroup)
        ));
    }

    #[test]
    fn test_cannot_remove_self() {
        let p1 = Participant::new();
        let (mut creator, _) = create_group(&[p1.public_hex()]).expect("create");
        assert!(matches!(
            creator.remove_member(0),
            Err(MlsError::CannotRemoveSelf)
        ));
    }

    #[test]
    fn test_epoch_gate_on_processing() {
        let p1 = Participant::new();
        let p2 = Participant::new();
        let (_, welcomes) = create_group(&[p1.public_hex(), p2.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");
        let mut joined2 = process_welcome(&welcomes[1], &p2.keypair.private_hex()).expect("join");

        let first = joined1.update_own_key().expect("update 1");
        joined2.process_update(&first).expect("apply 1");
        let second = joined1.update_own_key().expect("update 2");

        // Skipping `second` and replaying an old epoch both fail.
        let mut stale = joined2.clone();
        joined2.process_update(&second).expect("apply 2");
        assert!(matches!(
            stale.process_update(&first),
            Err(MlsError::InvalidEpoch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_sequential_updates_from_different_members() {
        let p1 = Participant::new();
        let p2 = Participant::new();
        let (mut creator, welcomes) =
            create_group(&[p1.public_hex(), p2.public_hex()]).expect("create");
        let mut joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");
        let mut joined2 = process_welcome(&welcomes[1], &p2.keypair.private_hex()).expect("join");

        let u1 = joined1.update_own_key().expect("p1 update");
        creator.process_update(&u1).expect("creator");
        joined2.process_update(&u1).expect("p2");

        let u2 = joined2.update_own_key().expect("p2 update");
        creator.process_update(&u2).expect("creator");
        joined1.process_update(&u2).expect("p1");

        let u3 = creator.update_own_key().expect("creator update");
        joined1.process_update(&u3).expect("p1");
        joined2.process_update(&u3).expect("p2");

        assert_eq!(creator.group_key_hex(), joined1.group_key_hex());
        assert_eq!(creator.group_key_hex(), joined2.group_key_hex());
        assert_eq!(creator.epoch(), 3);
    }

    #[test]
    fn test_five_member_churn_agreement() {
        let members: Vec<Participant> = (0..4).map(|_| Participant::new()).collect();
        let publics: Vec<String> = members.iter().map(|m| m.public_hex()).collect();

        let (mut creator, welcomes) = create_group(&publics).expect("create");
        let mut states: Vec<GroupState> = welcomes
            .iter()
            .zip(&members)
            .map(|(w, m)| process_welcome(w, &m.keypair.private_hex()).expect("join"))
            .collect();

        // Member 3 (leaf 4) leaves; member 1 refreshes; a new member joins.
        let remove = creator.remove_member(4).expect("remove");
        for state in states.iter_mut().take(3) {
            state.process_remove(&remove).expect("apply remove");
        }
        states.truncate(3);

        let update = states[0].update_own_key().expect("update");
        creator.process_update(&update).expect("creator");
        for state in states.iter_mut().skip(1) {
            state.process_update(&update).expect("apply update");
        }

        let newcomer = Participant::new();
        let (add, welcome) = creator.add_member(&newcomer.public_hex()).expect("add");
        for state in states.iter_mut() {
            state.process_add(&add).expect("apply add");
        }
        let newcomer_state =
            process_welcome(&welcome, &newcomer.keypair.private_hex()).expect("join");

        let reference = creator.group_key_hex();
        for state in &states {
            assert_eq!(state.group_key_hex(), reference);
        }
        assert_eq!(newcomer_state.group_key_hex(), reference);
        assert_eq!(creator.epoch(), 3);
        assert_eq!(newcomer_state.epoch(), 3);
    }

    #[test]
    fn test_application_message_roundtrip() {
        let p1 = Participant::new();
        let (creator, welcomes) = create_group(&[p1.public_hex()]).expect("create");
        let joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");

        let message = creator
            .encrypt_application(b"hello group")
            .expect("encrypt");
        let plaintext = joined1.decrypt_application(&message).expect("decrypt");
        assert_eq!(plaintext, b"hello group");
    }

    #[test]
    fn test_application_message_epoch_mismatch() {
        let p1 = Participant::new();
        let (mut creator, welcomes) = create_group(&[p1.public_hex()]).expect("create");
        let joined1 = process_welcome(&welcomes[0], &p1.keypair.private_hex()).expect("join");

        let stale = joined1.encrypt_application(b"old epoch").expect("encrypt");
        creator.update_own_key().expect("update");
        assert!(matches!(
            creator.decrypt_application(&stale),
            Err(MlsError::InvalidEpoch { .. })
        ));
    }

    #[test]
    fn test_group_key_length() {
        let (creator, _) = create_group(&[]).expect("create");
        assert_eq!(creator.group_key().expect("key").len(), 32);
        assert_eq!(creator.member_count(), 1);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let p1 = Participant::new();
        let (creator, _) = create_group(&[p1.public_hex()]).expect("create");

        let json = serde_json::to_string(&creator).expect("serialize");
        let restored: GroupState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(creator, restored);
    }
}
