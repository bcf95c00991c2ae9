//! The MLS/BBS+ group log controller.
//!
//! One instance per (group, db). The controller owns the replay pipeline
//! for group entries and the epoch bookkeeping around it: group keys per
//! epoch for decryption, access keys per epoch for proof verification, and
//! the epoch-transition handshake with the server. MLS membership state
//! itself lives behind the storage seam and is mutated only through the
//! methods here, so it is never observable in a torn state.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use lorica_chain::entry::{
    build_payload, open_group_entry, seal_group_entry, verify_group_entry,
    verify_group_entry_hash, verify_payload_sender, DecryptedPayload, GroupEntry, SystemOp,
    GENESIS_HASH,
};
use lorica_chain::validate::{classify, Disposition, HeadRef};
use lorica_chain::ChainError;
use lorica_crypto::identity::IdentityKeypair;
use lorica_crypto::CryptoError;
use lorica_dblog::action::{decode_actions, encode_actions, Action};
use lorica_dblog::replay::{Cursor, ReplayEngine};
use lorica_mls::access::{self, EpochAccessKey};
use lorica_mls::group::{process_welcome, GroupState};
use lorica_mls::messages::{
    AddMessage, MlsMessage, RemoveMessage, UpdateMessage, WelcomeMessage,
};
use lorica_mls::MlsError;

use crate::events::{EventBus, SyncEvent, SyncState};
use crate::storage::StorageBackend;
use crate::transport::{AppendGroupChainLogRequest, CreateGroupRequest, PushEvent, Transport, TransportResult};
use crate::{Result, SyncConfig, SyncError};

/// A group hash-linked log with a local SQL projection.
pub struct GroupLog {
    group_id: String,
    db: String,
    identity: IdentityKeypair,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn StorageBackend>,
    config: SyncConfig,
    events: EventBus,
    state: Mutex<LogState>,
}

struct LogState {
    engine: ReplayEngine,
    entries: Vec<GroupEntry>,
    /// Group keys per epoch lived through, newest last.
    group_keys: BTreeMap<u64, [u8; 32]>,
}

impl GroupLog {
    /// Build a controller over an opened replay engine. The caller must
    /// have stored the MLS group state, BBS+ credential, and group public
    /// key for `group_id` before `initialize`.
    pub fn new(
        group_id: impl Into<String>,
        db: impl Into<String>,
        identity: IdentityKeypair,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageBackend>,
        engine: ReplayEngine,
        config: SyncConfig,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            db: db.into(),
            identity,
            transport,
            storage,
            config,
            events: EventBus::default(),
            state: Mutex::new(LogState {
                engine,
                entries: Vec::new(),
                group_keys: BTreeMap::new(),
            }),
        }
    }

    fn log_label(&self) -> String {
        format!("{}/{}", self.group_id, self.db)
    }

    /// Subscribe to this log's events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Warm the epoch caches from stored group state and report the cursor.
    pub async fn initialize(&self) -> Result<Cursor> {
        let mut state = self.state.lock().await;
        let mls = self.require_group_state().await?;
        self.track_epoch(&mut state, &mls).await?;
        Ok(state.engine.cursor()?)
    }

    /// The index of the newest locally applied entry, or `None`.
    pub async fn head_index(&self) -> Option<u64> {
        let state = self.state.lock().await;
        state.entries.last().map(|e| e.index)
    }

    /// Register the group with the server, handing it the public key and
    /// the current epoch's access key.
    pub async fn create_on_server(&self) -> Result<()> {
        let mls = self.require_group_state().await?;
        let group_public_key = self
            .storage
            .load_group_public_key(&self.group_id)
            .await?
            .ok_or_else(|| SyncError::NotAMember {
                group_id: self.group_id.clone(),
            })?;
        let initial_access_key = self
            .storage
            .load_access_key(&self.group_id, mls.epoch())
            .await?
            .ok_or_else(|| SyncError::UnknownEpochKey {
                group_id: self.group_id.clone(),
                epoch: mls.epoch(),
            })?;

        self.call(self.transport.create_group(CreateGroupRequest {
            group_id: self.group_id.clone(),
            group_public_key,
            initial_access_key,
        }))
        .await
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Join from a welcome message and persist the resulting state.
    pub async fn join_from_welcome(&self, welcome: &WelcomeMessage) -> Result<()> {
        let mls = process_welcome(welcome, &self.identity.private_hex())?;
        self.storage.save_group_state(&mls).await?;
        let mut state = self.state.lock().await;
        self.track_epoch(&mut state, &mls).await?;
        Ok(())
    }

    /// Add a member; returns the broadcast message and the welcome.
    pub async fn add_member(
        &self,
        member_public_hex: &str,
    ) -> Result<(AddMessage, WelcomeMessage)> {
        let mut mls = self.require_group_state().await?;
        let result = mls.add_member(member_public_hex)?;
        self.commit_state(mls).await?;
        Ok(result)
    }

    /// Remove a member's leaf.
    pub async fn remove_member(&self, leaf: u32) -> Result<RemoveMessage> {
        let mut mls = self.require_group_state().await?;
        let result = mls.remove_member(leaf)?;
        self.commit_state(mls).await?;
        Ok(result)
    }

    /// Refresh our own leaf key.
    pub async fn update_own_key(&self) -> Result<UpdateMessage> {
        let mut mls = self.require_group_state().await?;
        let result = mls.update_own_key()?;
        self.commit_state(mls).await?;
        Ok(result)
    }

    /// Apply a membership message received from another member. Processing
    /// our own removal deletes all local group state.
    pub async fn apply_mls_message(&self, message: &MlsMessage) -> Result<()> {
        let mut mls = self.require_group_state().await?;
        match message {
            MlsMessage::Add(add) => mls.process_add(add)?,
            MlsMessage::Update(update) => mls.process_update(update)?,
            MlsMessage::Remove(remove) => match mls.process_remove(remove) {
                Err(MlsError::RemovedFromGroup) => {
                    tracing::info!(group_id = %self.group_id, "removed from group, deleting state");
                    self.storage.delete_group_state(&self.group_id).await?;
                    self.storage.delete_credential(&self.group_id).await?;
                    return Ok(());
                }
                other => other?,
            },
            MlsMessage::Welcome(_) | MlsMessage::Application(_) => {
                return Err(SyncError::Mls(MlsError::Serialization(
                    "not a membership message".into(),
                )))
            }
        }
        self.commit_state(mls).await?;
        Ok(())
    }

    async fn commit_state(&self, mls: GroupState) -> Result<()> {
        self.storage.save_group_state(&mls).await?;
        let mut state = self.state.lock().await;
        self.track_epoch(&mut state, &mls).await
    }

    /// Announce the current epoch's access key to the server, chained to
    /// the previous epoch's key.
    pub async fn announce_epoch_transition(&self) -> Result<GroupEntry> {
        let mls = self.require_group_state().await?;
        let epoch = mls.epoch();
        let previous_epoch = epoch
            .checked_sub(1)
            .ok_or(SyncError::Mls(MlsError::InvalidTransition))?;

        let current = self.require_access_key(epoch).await?;
        let previous = self.require_access_key(previous_epoch).await?;
        let proof = access::transition_proof(&previous, &current)?;

        self.append_internal(
            "[]",
            Some(SystemOp::EpochTransition {
                new_access_key: current,
                transition_proof: proof,
            }),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Log pipeline
    // -----------------------------------------------------------------------

    /// Append actions as a new group entry.
    pub async fn append(&self, actions: &[Action]) -> Result<GroupEntry> {
        let content = encode_actions(actions)?;
        self.append_internal(&content, None).await
    }

    async fn append_internal(
        &self,
        content: &str,
        system_op: Option<SystemOp>,
    ) -> Result<GroupEntry> {
        let mut attempt = 0;
        loop {
            let mut state = self.state.lock().await;
            let mls = self.require_group_state().await?;
            let credential = self
                .storage
                .load_credential(&self.group_id)
                .await?
                .ok_or_else(|| SyncError::MissingCredential {
                    group_id: self.group_id.clone(),
                })?;
            let group_public_key = self
                .storage
                .load_group_public_key(&self.group_id)
                .await?
                .ok_or_else(|| SyncError::NotAMember {
                    group_id: self.group_id.clone(),
                })?;

            let epoch = mls.epoch();
            let payload =
                build_payload(&self.identity, content, epoch, system_op.clone())?;
            let proof_epoch = proof_epoch_for(&payload)
                .ok_or(SyncError::Mls(MlsError::InvalidTransition))?;
            let access_key = self.require_access_key(proof_epoch).await?;

            let (index, prev_hash) = match state.entries.last() {
                Some(entry) => (entry.index + 1, entry.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            };
            let entry = seal_group_entry(
                &payload,
                &mls.group_key()?,
                index,
                &prev_hash,
                &credential,
                &group_public_key,
                &access_key,
            )?;

            // Transitions ride alongside the entry so the server can adopt
            // the new access key after checking the proof.
            let (new_access_key, transition_proof) = match &system_op {
                Some(SystemOp::EpochTransition {
                    new_access_key,
                    transition_proof,
                }) => (Some(new_access_key.clone()), Some(transition_proof.clone())),
                _ => (None, None),
            };

            match self
                .call(self.transport.group_append(
                    &self.group_id,
                    &self.db,
                    AppendGroupChainLogRequest {
                        entry: entry.clone(),
                        new_access_key,
                        transition_proof,
                    },
                ))
                .await
            {
                Ok(accepted) => {
                    self.ingest(&mut state, &accepted).await?;
                    return Ok(entry);
                }
                Err(SyncError::Transport(error)) if error.is_conflict() => {
                    drop(state);
                    attempt += 1;
                    if attempt > self.config.append_retries {
                        return Err(ChainError::ConflictDetected { index }.into());
                    }
                    tracing::warn!(
                        group_id = %self.group_id,
                        index,
                        attempt,
                        "group append conflict, resyncing"
                    );
                    self.sync().await?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Pull everything past the local head, verify, and replay.
    pub async fn sync(&self) -> Result<BTreeSet<String>> {
        let mut state = self.state.lock().await;
        self.emit_state(SyncState::Syncing);
        let result = self.sync_locked(&mut state).await;
        self.emit_state(match result {
            Ok(_) => SyncState::Idle,
            Err(_) => SyncState::Error,
        });
        result
    }

    async fn sync_locked(&self, state: &mut LogState) -> Result<BTreeSet<String>> {
        let Some(server_head) = self
            .call(self.transport.group_head(&self.group_id, &self.db))
            .await?
        else {
            return Ok(BTreeSet::new());
        };

        let mut affected = BTreeSet::new();
        loop {
            let local = state.entries.last().map(|e| e.index as i64).unwrap_or(-1);
            if server_head.index as i64 <= local {
                break;
            }
            let page = self
                .call(self.transport.group_list(
                    &self.group_id,
                    &self.db,
                    (local + 1) as u64,
                    self.config.page_size,
                ))
                .await?;
            if page.logs.is_empty() {
                break;
            }
            for wire in &page.logs {
                affected.extend(self.ingest(state, wire).await?);
            }
            if !page.has_more {
                break;
            }
        }

        tracing::debug!(group_id = %self.group_id, tables = ?affected, "group sync complete");
        Ok(affected)
    }

    /// Feed a push-channel event through the pipeline.
    pub async fn handle_push(&self, event: PushEvent) -> Result<BTreeSet<String>> {
        match event {
            PushEvent::NewGroupLog { group_id, entry } if group_id == self.group_id => {
                let mut state = self.state.lock().await;
                match self.ingest(&mut state, &entry).await {
                    Err(SyncError::Chain(ChainError::GapDetected { .. })) => {
                        drop(state);
                        tracing::debug!(
                            group_id = %self.group_id,
                            "gap on push, falling back to sync"
                        );
                        self.sync().await
                    }
                    other => other,
                }
            }
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Verify, decrypt, validate, and replay one group entry.
    async fn ingest(&self, state: &mut LogState, wire: &GroupEntry) -> Result<BTreeSet<String>> {
        verify_group_entry_hash(wire)?;

        let head = state.entries.last().map(|e| HeadRef {
            index: e.index,
            hash: e.hash.clone(),
        });
        match classify(head.as_ref(), wire.index, &wire.prev_hash)? {
            Disposition::Duplicate => return Ok(BTreeSet::new()),
            Disposition::Genesis | Disposition::Extension => {}
        }

        let payload = self.decrypt_payload(state, wire)?;

        // The envelope: BBS+ membership signature plus the access proof for
        // the epoch the payload names (the previous epoch for transitions).
        let group_public_key = self
            .storage
            .load_group_public_key(&self.group_id)
            .await?
            .ok_or_else(|| SyncError::NotAMember {
                group_id: self.group_id.clone(),
            })?;
        let proof_epoch = proof_epoch_for(&payload)
            .ok_or(SyncError::Mls(MlsError::InvalidTransition))?;
        let access_key = self.require_access_key(proof_epoch).await?;
        verify_group_entry(wire, &group_public_key, &access_key)?;
        verify_payload_sender(&payload)?;

        if let Some(SystemOp::EpochTransition {
            new_access_key,
            transition_proof,
        }) = &payload.system_op
        {
            let previous_epoch = new_access_key
                .epoch
                .checked_sub(1)
                .ok_or(SyncError::Mls(MlsError::InvalidTransition))?;
            let previous = self.require_access_key(previous_epoch).await?;
            access::verify_transition_proof(&previous, new_access_key, transition_proof)?;
            self.storage
                .save_access_key(&self.group_id, new_access_key)
                .await?;
            tracing::debug!(
                group_id = %self.group_id,
                epoch = new_access_key.epoch,
                "adopted epoch access key"
            );
        }

        let actions = decode_actions(&payload.content)?;
        let affected = state.engine.apply_entry(wire.index as i64, &actions)?;

        self.events.emit(SyncEvent::EntryApplied {
            log: self.log_label(),
            index: wire.index,
        });
        if !affected.is_empty() {
            self.events.emit(SyncEvent::TablesAffected {
                log: self.log_label(),
                tables: affected.iter().cloned().collect(),
            });
        }
        state.entries.push(wire.clone());
        Ok(affected)
    }

    /// Try each epoch's group key, newest first, to open an entry.
    fn decrypt_payload(&self, state: &LogState, wire: &GroupEntry) -> Result<DecryptedPayload> {
        for key in state.group_keys.values().rev() {
            if let Ok(payload) = open_group_entry(wire, key) {
                return Ok(payload);
            }
        }
        Err(SyncError::Crypto(CryptoError::DecryptionFailed(
            "no known group key opens this entry".into(),
        )))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn require_group_state(&self) -> Result<GroupState> {
        self.storage
            .load_group_state(&self.group_id)
            .await?
            .ok_or_else(|| SyncError::NotAMember {
                group_id: self.group_id.clone(),
            })
    }

    async fn require_access_key(&self, epoch: u64) -> Result<EpochAccessKey> {
        self.storage
            .load_access_key(&self.group_id, epoch)
            .await?
            .ok_or_else(|| SyncError::UnknownEpochKey {
                group_id: self.group_id.clone(),
                epoch,
            })
    }

    /// Record the group key for the state's epoch and persist the derived
    /// access key.
    async fn track_epoch(&self, state: &mut LogState, mls: &GroupState) -> Result<()> {
        let key = mls.group_key()?;
        state.group_keys.insert(mls.epoch(), key);
        let access = EpochAccessKey::derive(&key, mls.group_id(), mls.epoch());
        self.storage.save_access_key(&self.group_id, &access).await?;
        Ok(())
    }

    fn emit_state(&self, sync_state: SyncState) {
        self.events.emit(SyncEvent::SyncStateChanged {
            log: self.log_label(),
            state: sync_state,
        });
    }

    async fn call<T>(
        &self,
        future: impl Future<Output = TransportResult<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.request_timeout, future).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(crate::transport::TransportError::Timeout.into()),
        }
    }
}

/// The epoch whose access key proves an entry: the payload's epoch, or the
/// previous one for epoch transitions. `None` for a transition at epoch 0.
fn proof_epoch_for(payload: &DecryptedPayload) -> Option<u64> {
    match payload.system_op {
        Some(SystemOp::EpochTransition { .. }) => payload.epoch.checked_sub(1),
        _ => Some(payload.epoch),
    }
}
