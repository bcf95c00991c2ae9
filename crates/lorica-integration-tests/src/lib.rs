//! Test harness for end-to-end scenarios.
//!
//! [`TestServer`] is an in-memory stand-in for the real backend that
//! enforces what the real server enforces: chain linkage on append, the
//! BBS+ group signature over the entry hash, the epoch access proof under
//! the server's current key, and the transition handshake before a new
//! access key is adopted. It never sees plaintext.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use lorica_bbs::keys::GroupPublicKey;
use lorica_bbs::signature::{self, GroupSignature};
use lorica_chain::entry::{entry_hash, EncryptedPersonalEntry, GroupEntry};
use lorica_dblog::action::{decode_actions, Action};
use lorica_mls::access::{self, EpochAccessKey};
use lorica_sync::transport::{
    AppendChainLogRequest, AppendGroupChainLogRequest, CreateGroupRequest, ListPage, Transport,
    TransportError, TransportResult,
};

/// One registered group on the server.
struct GroupRecord {
    public_key: GroupPublicKey,
    current_access_key: EpochAccessKey,
    logs: HashMap<String, Vec<GroupEntry>>,
}

/// An in-memory backend for both log families.
#[derive(Default)]
pub struct TestServer {
    personal: Mutex<HashMap<String, Vec<EncryptedPersonalEntry>>>,
    groups: Mutex<HashMap<String, GroupRecord>>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to stored personal entries (for tamper scenarios).
    pub fn personal_entries(&self, db: &str) -> Vec<EncryptedPersonalEntry> {
        self.personal
            .lock()
            .expect("lock")
            .get(db)
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrite stored personal entries (for tamper scenarios).
    pub fn set_personal_entries(&self, db: &str, entries: Vec<EncryptedPersonalEntry>) {
        self.personal
            .lock()
            .expect("lock")
            .insert(db.to_string(), entries);
    }

    /// The access key the server currently holds for a group.
    pub fn current_access_key(&self, group_id: &str) -> Option<EpochAccessKey> {
        self.groups
            .lock()
            .expect("lock")
            .get(group_id)
            .map(|g| g.current_access_key.clone())
    }

    fn reject(code: u16, body: impl Into<String>) -> TransportError {
        TransportError::HttpStatus {
            code,
            body: body.into(),
        }
    }
}

#[async_trait]
impl Transport for TestServer {
    async fn personal_head(&self, db: &str) -> TransportResult<Option<EncryptedPersonalEntry>> {
        Ok(self
            .personal
            .lock()
            .expect("lock")
            .get(db)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn personal_list(
        &self,
        db: &str,
        start_index: u64,
        limit: u32,
    ) -> TransportResult<ListPage<EncryptedPersonalEntry>> {
        let store = self.personal.lock().expect("lock");
        let entries = store.get(db).map(Vec::as_slice).unwrap_or_default();
        let start = start_index as usize;
        let end = (start + limit as usize).min(entries.len());
        Ok(ListPage {
            logs: entries.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            has_more: end < entries.len(),
        })
    }

    async fn personal_get(
        &self,
        db: &str,
        index: u64,
    ) -> TransportResult<EncryptedPersonalEntry> {
        self.personal
            .lock()
            .expect("lock")
            .get(db)
            .and_then(|entries| entries.get(index as usize).cloned())
            .ok_or_else(|| Self::reject(404, "no such entry"))
    }

    async fn personal_append(
        &self,
        db: &str,
        request: AppendChainLogRequest,
    ) -> TransportResult<EncryptedPersonalEntry> {
        let mut store = self.personal.lock().expect("lock");
        let entries = store.entry(db.to_string()).or_default();
        let expected = entries.len() as u64;
        if request.entry.index != expected
            || entries
                .last()
                .is_some_and(|head| head.hash != request.entry.prev_hash)
        {
            return Err(Self::reject(409, format!("expected index {expected}")));
        }
        entries.push(request.entry.clone());
        Ok(request.entry)
    }

    async fn group_head(&self, group_id: &str, db: &str) -> TransportResult<Option<GroupEntry>> {
        Ok(self
            .groups
            .lock()
            .expect("lock")
            .get(group_id)
            .and_then(|group| group.logs.get(db))
            .and_then(|entries| entries.last().cloned()))
    }

    async fn group_list(
        &self,
        group_id: &str,
        db: &str,
        start_index: u64,
        limit: u32,
    ) -> TransportResult<ListPage<GroupEntry>> {
        let store = self.groups.lock().expect("lock");
        let entries = store
            .get(group_id)
            .and_then(|group| group.logs.get(db))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = start_index as usize;
        let end = (start + limit as usize).min(entries.len());
        Ok(ListPage {
            logs: entries.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            has_more: end < entries.len(),
        })
    }

    async fn group_get(
        &self,
        group_id: &str,
        db: &str,
        index: u64,
    ) -> TransportResult<GroupEntry> {
        self.groups
            .lock()
            .expect("lock")
            .get(group_id)
            .and_then(|group| group.logs.get(db))
            .and_then(|entries| entries.get(index as usize).cloned())
            .ok_or_else(|| Self::reject(404, "no such entry"))
    }

    async fn group_append(
        &self,
        group_id: &str,
        db: &str,
        request: AppendGroupChainLogRequest,
    ) -> TransportResult<GroupEntry> {
        let mut store = self.groups.lock().expect("lock");
        let group = store
            .get_mut(group_id)
            .ok_or_else(|| Self::reject(404, "unknown group"))?;

        let entry = &request.entry;
        let entries = group.logs.entry(db.to_string()).or_default();
        let expected = entries.len() as u64;
        if entry.index != expected
            || entries
                .last()
                .is_some_and(|head| head.hash != entry.prev_hash)
        {
            return Err(Self::reject(409, format!("expected index {expected}")));
        }

        // The server re-hashes the ciphertext, checks the anonymous
        // membership signature, and checks the access proof under its
        // current key.
        let recomputed = entry_hash(entry.index, &entry.prev_hash, &entry.ciphertext, &entry.nonce);
        if recomputed != entry.hash {
            return Err(Self::reject(400, "entry hash mismatch"));
        }
        let group_signature = GroupSignature::from_json(&entry.group_signature)
            .map_err(|e| Self::reject(400, e.to_string()))?;
        if signature::verify(&entry.hash, &group_signature, &group.public_key).is_err() {
            return Err(Self::reject(403, "invalid group signature"));
        }
        if access::verify_access_proof(&group.current_access_key, &entry.hash, &entry.access_proof)
            .is_err()
        {
            return Err(Self::reject(403, "invalid access proof"));
        }

        if let (Some(new_key), Some(proof)) = (&request.new_access_key, &request.transition_proof)
        {
            if access::verify_transition_proof(&group.current_access_key, new_key, proof).is_err()
            {
                return Err(Self::reject(403, "invalid transition proof"));
            }
            group.current_access_key = new_key.clone();
        }

        entries.push(entry.clone());
        Ok(entry.clone())
    }

    async fn create_group(&self, request: CreateGroupRequest) -> TransportResult<()> {
        let mut store = self.groups.lock().expect("lock");
        if store.contains_key(&request.group_id) {
            return Err(Self::reject(409, "group exists"));
        }
        store.insert(
            request.group_id,
            GroupRecord {
                public_key: request.group_public_key,
                current_access_key: request.initial_access_key,
                logs: HashMap::new(),
            },
        );
        Ok(())
    }
}

/// Parse a JSON action array, panicking on malformed test input.
pub fn actions(json: &str) -> Vec<Action> {
    decode_actions(json).expect("test action JSON")
}
