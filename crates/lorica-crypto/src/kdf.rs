//! Labeled HKDF-SHA256 key derivation.
//!
//! Every derivation in the protocol uses HKDF-SHA256 with an empty salt and
//! a registered context label as the `info` parameter, producing 32 bytes.
//! Using an unregistered label is a protocol violation.

use hkdf::Hkdf;
use sha2::Sha256;

/// All registered derivation labels.
pub mod labels {
    /// Parent-node secret from an ECDH shared point.
    pub const NODE_KEY: &str = "mls-node-key";
    /// Node private key from a running path secret.
    pub const NODE_PRIVATE_KEY: &str = "mls-node-private-key";
    /// Group key from the root path secret.
    pub const GROUP_KEY: &str = "mls-group-key";
    /// Skip-derivation over a blank copath node; suffixed with
    /// `u32_le(node_index)`.
    pub const PATH_SECRET: &str = "mls-path-secret";
    /// Welcome sealing key; suffixed with the invitee's 65-byte public key.
    pub const WELCOME_KEY: &str = "mls-welcome-key";
    /// Component of the epoch access key IKM.
    pub const SERVER_ACCESS: &str = "server-access";
}

/// Derive 32 bytes from `ikm` with the given info bytes (empty salt).
pub fn derive(ikm: &[u8], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 32];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    okm
}

/// Derive 32 bytes under a bare label.
pub fn derive_labeled(ikm: &[u8], label: &str) -> [u8; 32] {
    derive(ikm, label.as_bytes())
}

/// Info bytes for a skip-derivation over a blank node:
/// `"mls-path-secret" || u32_le(node_index)`.
pub fn path_secret_info(node_index: u32) -> Vec<u8> {
    let mut info = Vec::with_capacity(labels::PATH_SECRET.len() + 4);
    info.extend_from_slice(labels::PATH_SECRET.as_bytes());
    info.extend_from_slice(&node_index.to_le_bytes());
    info
}

/// Info bytes for a welcome sealing key:
/// `"mls-welcome-key" || invitee_public_key65`.
pub fn welcome_key_info(invitee_public_key: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(labels::WELCOME_KEY.len() + invitee_public_key.len());
    info.extend_from_slice(labels::WELCOME_KEY.as_bytes());
    info.extend_from_slice(invitee_public_key);
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let a = derive_labeled(&[0x01; 32], labels::NODE_KEY);
        let b = derive_labeled(&[0x01; 32], labels::NODE_KEY);
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_separate_domains() {
        let ikm = [0x55u8; 32];
        let node = derive_labeled(&ikm, labels::NODE_KEY);
        let group = derive_labeled(&ikm, labels::GROUP_KEY);
        let private = derive_labeled(&ikm, labels::NODE_PRIVATE_KEY);
        assert_ne!(node, group);
        assert_ne!(node, private);
        assert_ne!(group, private);
    }

    #[test]
    fn test_path_secret_info_varies_by_node() {
        let ikm = [0xAAu8; 32];
        let at_3 = derive(&ikm, &path_secret_info(3));
        let at_5 = derive(&ikm, &path_secret_info(5));
        assert_ne!(at_3, at_5);
    }

    #[test]
    fn test_path_secret_info_layout() {
        let info = path_secret_info(7);
        assert_eq!(&info[..15], b"mls-path-secret");
        assert_eq!(&info[15..], &7u32.to_le_bytes());
    }

    #[test]
    fn test_welcome_key_binds_recipient() {
        let ikm = [0x10u8; 32];
        let pk_a = [0x04u8; 65];
        let mut pk_b = [0x04u8; 65];
        pk_b[64] = 0x01;
        assert_ne!(
            derive(&ikm, &welcome_key_info(&pk_a)),
            derive(&ikm, &welcome_key_info(&pk_b))
        );
    }

    #[test]
    fn test_different_ikm_different_output() {
        assert_ne!(
            derive_labeled(&[0x01; 32], labels::GROUP_KEY),
            derive_labeled(&[0x02; 32], labels::GROUP_KEY)
        );
    }
}
