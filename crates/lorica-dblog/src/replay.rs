//! The replay engine: ordered, transactional application of action streams.
//!
//! Bookkeeping lives in two reserved tables created on first open:
//!
//! - `"_dblog_meta"(key TEXT PRIMARY KEY, value TEXT NOT NULL)` holding
//!   `last_chain_index` and `last_dblog_index`;
//! - `"_dblog_schema_versions"(table_name TEXT PRIMARY KEY,
//!   version INTEGER NOT NULL DEFAULT 0)`.
//!
//! All statements derived from one chain entry are applied inside a single
//! transaction that also advances the cursor rows; a failure rolls the
//! whole entry back, so the cursor never passes an entry that was not
//! fully applied.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

use crate::action::Action;
use crate::sql;
use crate::{DbLogError, Result};

/// The replay cursor: the highest fully applied entry and the highest
/// action index within it (−1 when the entry carried none).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub last_chain_index: i64,
    pub last_dblog_index: i64,
}

impl Cursor {
    /// The cursor of an empty store.
    pub fn start() -> Self {
        Self {
            last_chain_index: -1,
            last_dblog_index: -1,
        }
    }
}

/// A replay engine over one SQLite database.
pub struct ReplayEngine {
    conn: Connection,
}

impl ReplayEngine {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let engine = Self { conn };
        engine.configure()?;
        engine.initialize()?;
        Ok(engine)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let engine = Self { conn };
        engine.configure()?;
        engine.initialize()?;
        Ok(engine)
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(())
    }

    /// Create the bookkeeping tables and seed the cursor.
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS \"_dblog_meta\" (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS \"_dblog_schema_versions\" (
                 table_name TEXT PRIMARY KEY,
                 version INTEGER NOT NULL DEFAULT 0
             );
             INSERT OR IGNORE INTO \"_dblog_meta\" (key, value)
                 VALUES ('last_chain_index', '-1');
             INSERT OR IGNORE INTO \"_dblog_meta\" (key, value)
                 VALUES ('last_dblog_index', '-1');",
        )?;
        Ok(())
    }

    /// The current replay cursor.
    pub fn cursor(&self) -> Result<Cursor> {
        let chain = self.meta_value("last_chain_index")?;
        let dblog = self.meta_value("last_dblog_index")?;
        Ok(Cursor {
            last_chain_index: chain,
            last_dblog_index: dblog,
        })
    }

    fn meta_value(&self, key: &str) -> Result<i64> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM \"_dblog_meta\" WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(text) => text
                .parse()
                .map_err(|_| DbLogError::InvalidJson(format!("corrupt meta value for {key}"))),
            None => Err(DbLogError::NotInitialized),
        }
    }

    /// The stored schema version for a table (0 when never migrated).
    pub fn schema_version(&self, table: &str) -> Result<i64> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM \"_dblog_schema_versions\" WHERE table_name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    /// Apply one chain entry's actions in a single transaction, advancing
    /// the cursor. Entries at or below the cursor are skipped (idempotent
    /// replay). Returns the names of affected tables.
    pub fn apply_entry(
        &mut self,
        chain_index: i64,
        actions: &[Action],
    ) -> Result<BTreeSet<String>> {
        let cursor = self.cursor()?;
        if chain_index <= cursor.last_chain_index {
            tracing::debug!(chain_index, "entry already applied, skipping");
            return Ok(BTreeSet::new());
        }

        let mut ordered: Vec<&Action> = actions.iter().collect();
        ordered.sort_by_key(|a| a.dblogindex());

        let mut affected = BTreeSet::new();
        let last_dblog_index = ordered.last().map(|a| a.dblogindex()).unwrap_or(-1);

        let tx = self.conn.transaction()?;
        for action in ordered {
            match action {
                Action::Migrate {
                    table, migration, ..
                } => {
                    let current: i64 = tx
                        .query_row(
                            "SELECT version FROM \"_dblog_schema_versions\"
                             WHERE table_name = ?1",
                            [table.as_str()],
                            |row| row.get(0),
                        )
                        .optional()?
                        .unwrap_or(0);
                    if migration.version <= current {
                        tracing::debug!(
                            table,
                            version = migration.version,
                            current,
                            "migration already applied, skipping"
                        );
                        continue;
                    }
                    for statement in sql::translate_migration(table, migration)? {
                        tx.execute(&statement.sql, [])?;
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO \"_dblog_schema_versions\"
                             (table_name, version) VALUES (?1, ?2)",
                        params![table, migration.version],
                    )?;
                    affected.insert(table.clone());
                }
                other => {
                    for statement in sql::translate(other)? {
                        tx.execute(
                            &statement.sql,
                            rusqlite::params_from_iter(statement.params.iter()),
                        )?;
                    }
                    affected.insert(other.table().to_string());
                }
            }
        }

        tx.execute(
            "UPDATE \"_dblog_meta\" SET value = ?1 WHERE key = 'last_chain_index'",
            [chain_index.to_string()],
        )?;
        tx.execute(
            "UPDATE \"_dblog_meta\" SET value = ?1 WHERE key = 'last_dblog_index'",
            [last_dblog_index.to_string()],
        )?;
        tx.commit()?;

        tracing::debug!(
            chain_index,
            last_dblog_index,
            tables = ?affected,
            "applied entry"
        );
        Ok(affected)
    }

    /// Read-only access to the underlying connection (queries, tests).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
