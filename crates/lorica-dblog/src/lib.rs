//! # lorica-dblog
//!
//! DBLog: a JSON-encoded stream of schema/row operations stored inside
//! chain entries, replayed deterministically into SQLite.
//!
//! Actions are keyed by `(chainIndex, dblogindex)` and applied in strictly
//! ascending order. Translation to SQL is deterministic (stable column
//! ordering, fixed quoting) so replays emit byte-identical statements on
//! every platform; upserts, `IF NOT EXISTS`, and version-gated migrations
//! make the whole stream idempotent. All statements derived from one chain
//! entry commit in a single transaction together with the replay cursor.
//!
//! ## Modules
//!
//! - [`value`] — The tagged JSON-compatible value union and SQL binding
//! - [`action`] — The action union and its wire codec
//! - [`sql`] — Pure translation from actions to parameterized SQL
//! - [`replay`] — The replay engine, cursor bookkeeping, migrations

pub mod action;
pub mod replay;
pub mod sql;
pub mod value;

/// Error types for DBLog operations.
#[derive(Debug, thiserror::Error)]
pub enum DbLogError {
    /// The content was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The content was not a JSON array of actions.
    #[error("content is not an action array")]
    NotAnArray,

    /// A required field was missing from an action.
    #[error("missing field `{field}` in action {index}")]
    MissingField { field: String, index: usize },

    /// A field had the wrong JSON type.
    #[error("invalid field `{field}` in action {index}: {reason}")]
    InvalidField {
        field: String,
        index: usize,
        reason: String,
    },

    /// An action's `type` was not recognized.
    #[error("unknown action `{name}` at {index}")]
    UnknownAction { name: String, index: usize },

    /// A table or column name failed identifier validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A migration was malformed.
    #[error("invalid migration for table {table}: {reason}")]
    InvalidMigration { table: String, reason: String },

    /// SQLite execution failure; the per-entry transaction is rolled back.
    #[error("SQL error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The engine was used before `initialize`.
    #[error("replay engine not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, DbLogError>;
