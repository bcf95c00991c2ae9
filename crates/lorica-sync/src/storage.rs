//! The storage seam for key material and group state.
//!
//! One backend instance owns all cryptographic state for a client.
//! Implementations must provide at-rest protection appropriate to the
//! platform; [`MemoryStorage`] is the in-memory backend used by tests and
//! as a memoization layer.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use lorica_bbs::keys::{GroupPublicKey, MemberCredential};
use lorica_mls::access::EpochAccessKey;
use lorica_mls::group::GroupState;

/// Storage failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend was used before being opened.
    #[error("storage not initialized")]
    NotInitialized,

    /// A stored value failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Read failure.
    #[error("read error: {0}")]
    Read(String),

    /// Write failure.
    #[error("write error: {0}")]
    Write(String),

    /// Delete failure.
    #[error("delete error: {0}")]
    Delete(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Per-group key/state storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save_group_state(&self, state: &GroupState) -> StorageResult<()>;
    async fn load_group_state(&self, group_id: &str) -> StorageResult<Option<GroupState>>;
    async fn delete_group_state(&self, group_id: &str) -> StorageResult<()>;
    async fn list_group_ids(&self) -> StorageResult<Vec<String>>;

    async fn save_credential(
        &self,
        group_id: &str,
        credential: &MemberCredential,
    ) -> StorageResult<()>;
    async fn load_credential(&self, group_id: &str) -> StorageResult<Option<MemberCredential>>;
    async fn delete_credential(&self, group_id: &str) -> StorageResult<()>;

    async fn save_group_public_key(
        &self,
        group_id: &str,
        key: &GroupPublicKey,
    ) -> StorageResult<()>;
    async fn load_group_public_key(
        &self,
        group_id: &str,
    ) -> StorageResult<Option<GroupPublicKey>>;
    async fn delete_group_public_key(&self, group_id: &str) -> StorageResult<()>;

    async fn save_access_key(&self, group_id: &str, key: &EpochAccessKey) -> StorageResult<()>;
    async fn load_access_key(
        &self,
        group_id: &str,
        epoch: u64,
    ) -> StorageResult<Option<EpochAccessKey>>;
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    group_states: HashMap<String, GroupState>,
    credentials: HashMap<String, MemberCredential>,
    group_public_keys: HashMap<String, GroupPublicKey>,
    access_keys: HashMap<(String, u64), EpochAccessKey>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save_group_state(&self, state: &GroupState) -> StorageResult<()> {
        self.inner
            .lock()
            .await
            .group_states
            .insert(state.group_id().to_string(), state.clone());
        Ok(())
    }

    async fn load_group_state(&self, group_id: &str) -> StorageResult<Option<GroupState>> {
        Ok(self.inner.lock().await.group_states.get(group_id).cloned())
    }

    async fn delete_group_state(&self, group_id: &str) -> StorageResult<()> {
        self.inner.lock().await.group_states.remove(group_id);
        Ok(())
    }

    async fn list_group_ids(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .await
            .group_states
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_credential(
        &self,
        group_id: &str,
        credential: &MemberCredential,
    ) -> StorageResult<()> {
        self.inner
            .lock()
            .await
            .credentials
            .insert(group_id.to_string(), credential.clone());
        Ok(())
    }

    async fn load_credential(&self, group_id: &str) -> StorageResult<Option<MemberCredential>> {
        Ok(self.inner.lock().await.credentials.get(group_id).cloned())
    }

    async fn delete_credential(&self, group_id: &str) -> StorageResult<()> {
        self.inner.lock().await.credentials.remove(group_id);
        Ok(())
    }

    async fn save_group_public_key(
        &self,
        group_id: &str,
        key: &GroupPublicKey,
    ) -> StorageResult<()> {
        self.inner
            .lock()
            .await
            .group_public_keys
            .insert(group_id.to_string(), key.clone());
        Ok(())
    }

    async fn load_group_public_key(
        &self,
        group_id: &str,
    ) -> StorageResult<Option<GroupPublicKey>> {
        Ok(self
            .inner
            .lock()
            .await
            .group_public_keys
            .get(group_id)
            .cloned())
    }

    async fn delete_group_public_key(&self, group_id: &str) -> StorageResult<()> {
        self.inner.lock().await.group_public_keys.remove(group_id);
        Ok(())
    }

    async fn save_access_key(&self, group_id: &str, key: &EpochAccessKey) -> StorageResult<()> {
        self.inner
            .lock()
            .await
            .access_keys
            .insert((group_id.to_string(), key.epoch), key.clone());
        Ok(())
    }

    async fn load_access_key(
        &self,
        group_id: &str,
        epoch: u64,
    ) -> StorageResult<Option<EpochAccessKey>> {
        Ok(self
            .inner
            .lock()
            .await
            .access_keys
            .get(&(group_id.to_string(), epoch))
            .cloned())
    }
}
