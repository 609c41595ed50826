//! Database layer for the blood-bank core.

mod appointments;
mod donors;
mod inventory;
mod journal;
mod notifications;
mod requests;
mod schema;

pub use journal::*;
pub use schema::*;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::config::CoreConfig;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
///
/// One `Database` is one SQLite connection. Concurrent writers use separate handles on the
/// same file; `BEGIN IMMEDIATE` plus the busy timeout serializes them.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_config(path, &CoreConfig::default())
    }

    /// Open database at path with an explicit busy timeout from `config`.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &CoreConfig) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        // WAL lets readers proceed while a writer holds the lock.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Whether a transaction is currently open on this connection.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Run `f` as one atomic unit.
    ///
    /// Opens a `BEGIN IMMEDIATE` transaction, taking the write lock up front so that
    /// read-check-write sequences inside `f` cannot interleave with another writer. Commits
    /// when `f` returns `Ok`, rolls back otherwise. If a transaction is already open, `f`
    /// joins it and the outermost caller decides the outcome.
    pub fn atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<DbError>,
    {
        if self.in_transaction() {
            return f();
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let value = f()?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

/// Parse a stored enum column, reporting unknown values as constraint violations.
pub(crate) fn parse_column<T>(
    column: &str,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> DbResult<T> {
    parse(raw).ok_or_else(|| DbError::Constraint(format!("Unknown {column}: {raw}")))
}
