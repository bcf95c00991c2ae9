//! # lorica-sync
//!
//! Sync controllers: the glue between the transport, the crypto envelopes,
//! chain validation, and the SQL replay engine.
//!
//! Each log instance (one personal log per owner, one group log per group)
//! owns a replay engine and an in-memory ordered entry sequence behind a
//! single async lock, so at most one sync runs per log and appends block on
//! an in-flight sync. Every pulled, pushed, or self-appended entry goes
//! through the same pipeline: envelope verify → chain validate → DBLog
//! decode → transactional replay → event emission.
//!
//! ## Modules
//!
//! - [`transport`] — The pull/push transport seam, DTOs, reconnect backoff
//! - [`storage`] — The key/state storage seam and its in-memory backend
//! - [`events`] — Broadcast event bus (`entry_applied`, `tables_affected`, …)
//! - [`personal`] — The single-owner encrypted log controller
//! - [`group`] — The MLS/BBS+ group log controller

pub mod events;
pub mod group;
pub mod personal;
pub mod storage;
pub mod transport;

use std::time::Duration;

use transport::Backoff;

/// Error types for sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport failure; always retriable at some cadence.
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    /// Chain validation or envelope failure for one entry.
    #[error(transparent)]
    Chain(#[from] lorica_chain::ChainError),

    /// DBLog decode or replay failure for one entry.
    #[error(transparent)]
    DbLog(#[from] lorica_dblog::DbLogError),

    /// MLS state failure.
    #[error(transparent)]
    Mls(#[from] lorica_mls::MlsError),

    /// BBS+ failure.
    #[error(transparent)]
    Bbs(#[from] lorica_bbs::BbsError),

    /// Identity crypto failure.
    #[error(transparent)]
    Crypto(#[from] lorica_crypto::CryptoError),

    /// Storage backend failure.
    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    /// No group state is stored for this group.
    #[error("not a member of group {group_id}")]
    NotAMember { group_id: String },

    /// A decrypted payload's sender is not a current member.
    #[error("sender {address} is not a member of group {group_id}")]
    SenderNotMember { group_id: String, address: String },

    /// No BBS+ credential is stored for this group.
    #[error("no credential stored for group {group_id}")]
    MissingCredential { group_id: String },

    /// A join was requested but not yet accepted; the log is read-only.
    #[error("join pending for group {group_id}")]
    PendingJoin { group_id: String },

    /// An entry referenced an epoch no key is known for.
    #[error("no key known for epoch {epoch} of group {group_id}")]
    UnknownEpochKey { group_id: String, epoch: u64 },

    /// Controller used before `initialize`.
    #[error("log not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Tuning for a log controller. An explicit handle, passed to
/// constructors; there is no global configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Entries fetched per list page.
    pub page_size: u32,
    /// Deadline applied to every transport call.
    pub request_timeout: Duration,
    /// How many times an append retries after a conflict (with a fresh
    /// sync in between).
    pub append_retries: u32,
    /// Reconnect schedule for the push channel.
    pub backoff: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            request_timeout: Duration::from_secs(30),
            append_retries: 3,
            backoff: Backoff::default(),
        }
    }
}
