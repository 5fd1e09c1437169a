use crate::storage::errors::{Result, StorageError};
use crate::storage::schema;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

const DATABASE_FILE: &str = "gambit.sqlite";

/// Connection statistics for monitoring
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub operations_count: AtomicU64,
    pub transaction_count: AtomicU64,
    pub error_count: AtomicU64,
    pub total_time_ms: AtomicU64,
}

impl ConnectionStats {
    pub fn record_operation(&self, duration: Duration) {
        self.operations_count.fetch_add(1, Ordering::Relaxed);
        self.total_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_transaction(&self) {
        self.transaction_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> (u64, u64, u64, u64) {
        (
            self.operations_count.load(Ordering::Relaxed),
            self.transaction_count.load(Ordering::Relaxed),
            self.error_count.load(Ordering::Relaxed),
            self.total_time_ms.load(Ordering::Relaxed),
        )
    }
}

/// Owner of the SQLite connection.
///
/// A `Database` is handed to the storage actor, which is its only user, so
/// the connection needs no lock of its own.
pub struct Database {
    conn: Connection,
    stats: ConnectionStats,
}

impl Database {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::database_path_error(format!(
                        "Failed to create database directory: {}",
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        debug!("Opened database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Private database that disappears with the value
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::initialize_schema(&conn)?;
        Ok(Database {
            conn,
            stats: ConnectionStats::default(),
        })
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "memory")?;
        Ok(())
    }

    pub fn get_connection_stats(&self) -> (u64, u64, u64, u64) {
        self.stats.get_stats()
    }

    /// Run `f` against the connection, recording timing and failures
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let start_time = Instant::now();
        match f(&self.conn) {
            Ok(result) => {
                self.stats.record_operation(start_time.elapsed());
                Ok(result)
            }
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    /// Execute a transaction with automatic rollback on error
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let start_time = Instant::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StorageError::ConnectionFailed)?;

        match f(&tx) {
            Ok(result) => {
                tx.commit().map_err(StorageError::ConnectionFailed)?;
                self.stats.record_operation(start_time.elapsed());
                self.stats.record_transaction();
                Ok(result)
            }
            Err(e) => {
                let _ = tx.rollback();
                self.stats.record_error();
                Err(e)
            }
        }
    }
}

/// Current time in Unix milliseconds
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Get the appropriate database path for the current platform
pub fn get_database_path() -> Result<PathBuf> {
    crate::crypto::storage::data_dir()
        .map(|dir| dir.join(DATABASE_FILE))
        .map_err(|e| StorageError::database_path_error(e.to_string()))
}
