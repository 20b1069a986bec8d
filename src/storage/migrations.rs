//! Schema migrations embedded at compile time.
//!
//! Migrations are sourced from `/migrations/` at the repo root and
//! embedded into the binary using `include_str!`. The schema version is the
//! number of migrations; it is persisted twice: one `schema_migrations` row
//! per applied step, and SQLite's `user_version` for a cheap check on open.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order, embedded at compile time.
///
/// Version names match the SQL filenames (without .sql extension).
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_create_collections",
        sql: include_str!("../../migrations/001_create_collections.sql"),
    },
    Migration {
        version: "002_sync_audit",
        sql: include_str!("../../migrations/002_sync_audit.sql"),
    },
];

/// Schema version this build expects.
pub const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Read the persisted schema version.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
///
/// Each pending migration runs in its own transaction together with its
/// `schema_migrations` row, so a crash leaves either the whole step or none
/// of it. Steps use `IF NOT EXISTS` throughout and are safe to replay
/// against a half-built store. Idempotent; called on every open.
///
/// # Errors
///
/// Returns `SchemaMigrationFailed` if the store is newer than this build or
/// a step fails to apply.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let on_disk = schema_version(conn)?;
    if on_disk > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaMigrationFailed {
            version: format!("v{on_disk}"),
            reason: format!(
                "store was written by a newer build (this build understands up to v{CURRENT_SCHEMA_VERSION})"
            ),
        }
        .into());
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");
        apply_one(conn, migration).map_err(|e| StoreError::SchemaMigrationFailed {
            version: migration.version.to_string(),
            reason: e.to_string(),
        })?;
        info!(version = migration.version, "Migration complete");
    }

    if on_disk != CURRENT_SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        debug!(from = on_disk, to = CURRENT_SCHEMA_VERSION, "Schema version updated");
    }

    Ok(())
}

fn apply_one(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
    )?;
    tx.commit()
}
