use crate::storage::errors::{Result, StorageError};
use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Migration represents a single database migration
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All database migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema with users and games tables",
        sql: r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                rating INTEGER NOT NULL DEFAULT 0,
                public_key TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            -- black_id holds -1 for an open seat and 0 for the automated opponent
            CREATE TABLE games (
                id TEXT PRIMARY KEY,
                white_id INTEGER NOT NULL REFERENCES users(id),
                black_id INTEGER NOT NULL,
                position TEXT NOT NULL DEFAULT '',
                last_move_time INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL,
                description TEXT NOT NULL
            );

            CREATE INDEX idx_games_white ON games(white_id);
            CREATE INDEX idx_games_black ON games(black_id);
            CREATE INDEX idx_games_last_move ON games(last_move_time DESC);
        "#,
    },
    Migration {
        version: 2,
        description: "Record finished game results",
        sql: r#"
            ALTER TABLE games ADD COLUMN result TEXT;
        "#,
    },
];

/// Initialize the database schema and run any pending migrations
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(|e| {
            StorageError::migration_failed(0, format!("Failed to enable foreign keys: {}", e))
        })?;

    let migrations_exist = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    let current_version = if migrations_exist {
        get_current_version(conn)?
    } else {
        0
    };
    run_pending_migrations(conn, current_version)
}

fn run_pending_migrations(conn: &Connection, current_version: i32) -> Result<()> {
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction().map_err(|e| {
        StorageError::migration_failed(-1, format!("Failed to start transaction: {}", e))
    })?;

    for migration in pending {
        execute_migration(&tx, migration)?;
    }

    tx.commit().map_err(|e| {
        StorageError::migration_failed(-1, format!("Failed to commit migrations: {}", e))
    })?;

    Ok(())
}

fn execute_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute_batch(migration.sql).map_err(|e| {
        StorageError::migration_failed(
            migration.version,
            format!("Failed to execute migration {}: {}", migration.version, e),
        )
    })?;

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
        (
            migration.version,
            crate::storage::database::current_timestamp_millis(),
            migration.description,
        ),
    )
    .map_err(|e| {
        StorageError::migration_failed(
            migration.version,
            format!("Failed to record migration {}: {}", migration.version, e),
        )
    })?;

    Ok(())
}

/// Get the current schema version
pub fn get_current_version(conn: &Connection) -> Result<i32> {
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .map_err(|e| {
            StorageError::migration_failed(-1, format!("Failed to get current version: {}", e))
        })?
        .unwrap_or(0);

    Ok(version)
}
