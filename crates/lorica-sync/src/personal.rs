//! The single-owner encrypted log controller.
//!
//! One instance per (owner, db). The replay engine and the in-memory entry
//! sequence live behind a single async lock: at most one sync runs at a
//! time, and appends block on an in-flight sync so they never build on a
//! stale head.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use lorica_chain::entry::{
    build_personal_entry, decrypt_personal, encrypt_personal, verify_personal,
    EncryptedPersonalEntry, PersonalEntry, GENESIS_HASH,
};
use lorica_chain::validate::{classify, Disposition, HeadRef};
use lorica_chain::ChainError;
use lorica_crypto::identity::IdentityKeypair;
use lorica_dblog::action::{decode_actions, encode_actions, Action};
use lorica_dblog::replay::{Cursor, ReplayEngine};

use crate::events::{EventBus, SyncEvent, SyncState};
use crate::transport::{AppendChainLogRequest, PushEvent, Transport, TransportResult};
use crate::{Result, SyncConfig, SyncError};

/// A single-owner hash-linked log with a local SQL projection.
pub struct PersonalLog {
    db: String,
    owner: IdentityKeypair,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    events: EventBus,
    state: Mutex<LogState>,
}

struct LogState {
    engine: ReplayEngine,
    entries: Vec<PersonalEntry>,
}

impl PersonalLog {
    /// Build a controller over an opened replay engine.
    pub fn new(
        db: impl Into<String>,
        owner: IdentityKeypair,
        transport: Arc<dyn Transport>,
        engine: ReplayEngine,
        config: SyncConfig,
    ) -> Self {
        Self {
            db: db.into(),
            owner,
            transport,
            config,
            events: EventBus::default(),
            state: Mutex::new(LogState {
                engine,
                entries: Vec::new(),
            }),
        }
    }

    /// The owner's address.
    pub fn owner_address(&self) -> String {
        self.owner.address()
    }

    /// Subscribe to this log's events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Open the store and report the replay cursor.
    pub async fn initialize(&self) -> Result<Cursor> {
        let state = self.state.lock().await;
        Ok(state.engine.cursor()?)
    }

    /// The index of the newest locally applied entry, or `None`.
    pub async fn head_index(&self) -> Option<u64> {
        let state = self.state.lock().await;
        state.entries.last().map(|e| e.index)
    }

    /// A snapshot of the locally applied entries.
    pub async fn entries(&self) -> Vec<PersonalEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Pull everything past the local head, verify, and replay. Returns
    /// the names of affected tables.
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
            .call(self.transport.personal_head(&self.db))
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
                .call(self.transport.personal_list(
                    &self.db,
                    (local + 1) as u64,
                    self.config.page_size,
                ))
                .await?;
            if page.logs.is_empty() {
                break;
            }
            for wire in &page.logs {
                affected.extend(self.ingest(state, wire)?);
            }
            if !page.has_more {
                break;
            }
        }

        tracing::debug!(db = %self.db, tables = ?affected, "sync complete");
        Ok(affected)
    }

    /// Append actions as a new entry: encode, encrypt, sign, POST, then
    /// run the server's accepted entry through the same local pipeline.
    /// A conflict triggers a fresh sync and a retry.
    pub async fn append(&self, actions: &[Action]) -> Result<PersonalEntry> {
        let content = encode_actions(actions)?;
        let mut attempt = 0;
        loop {
            let mut state = self.state.lock().await;
            let (index, prev_hash) = match state.entries.last() {
                Some(entry) => (entry.index + 1, entry.hash.clone()),
                None => (0, GENESIS_HASH.to_string()),
            };
            let entry = build_personal_entry(&self.owner, index, &prev_hash, &content)?;
            let wire = encrypt_personal(&entry, &self.owner.public_key())?;

            match self
                .call(
                    self.transport
                        .personal_append(&self.db, AppendChainLogRequest { entry: wire }),
                )
                .await
            {
                Ok(accepted) => {
                    self.ingest(&mut state, &accepted)?;
                    return Ok(entry);
                }
                Err(SyncError::Transport(error)) if error.is_conflict() => {
                    drop(state);
                    attempt += 1;
                    if attempt > self.config.append_retries {
                        return Err(ChainError::ConflictDetected { index }.into());
                    }
                    tracing::warn!(
                        db = %self.db,
                        index,
                        attempt,
                        "append conflict, resyncing"
                    );
                    self.sync().await?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Feed a push-channel event through the pipeline. A detected gap
    /// falls back to a full sync.
    pub async fn handle_push(&self, event: PushEvent) -> Result<BTreeSet<String>> {
        match event {
            PushEvent::NewLog { entry } => {
                let mut state = self.state.lock().await;
                match self.ingest(&mut state, &entry) {
                    Err(SyncError::Chain(ChainError::GapDetected { .. })) => {
                        drop(state);
                        tracing::debug!(db = %self.db, "gap on push, falling back to sync");
                        self.sync().await
                    }
                    other => other,
                }
            }
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Decrypt, verify, validate, and replay one wire entry.
    fn ingest(
        &self,
        state: &mut LogState,
        wire: &EncryptedPersonalEntry,
    ) -> Result<BTreeSet<String>> {
        let entry = decrypt_personal(wire, &self.owner.private_hex())?;
        verify_personal(&entry, &self.owner.address())?;

        let head = state
            .entries
            .last()
            .map(|e| HeadRef {
                index: e.index,
                hash: e.hash.clone(),
            });
        match classify(head.as_ref(), entry.index, &entry.prev_hash)? {
            Disposition::Duplicate => Ok(BTreeSet::new()),
            Disposition::Genesis | Disposition::Extension => {
                let actions = decode_actions(&entry.content)?;
                let affected = state.engine.apply_entry(entry.index as i64, &actions)?;

                self.events.emit(SyncEvent::EntryApplied {
                    log: self.db.clone(),
                    index: entry.index,
                });
                if !affected.is_empty() {
                    self.events.emit(SyncEvent::TablesAffected {
                        log: self.db.clone(),
                        tables: affected.iter().cloned().collect(),
                    });
                }
                state.entries.push(entry);
                Ok(affected)
            }
        }
    }

    fn emit_state(&self, sync_state: SyncState) {
        self.events.emit(SyncEvent::SyncStateChanged {
            log: self.db.clone(),
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
