//! Migration registry for the client-local store.
//!
//! # Invariants
//! - Migrations apply in one transaction, oldest pending first.
//! - The applied version is mirrored to `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use rusqlite::Connection;

/// `(version, batch)` pairs in strictly increasing version order.
const MIGRATIONS: &[(u32, &str)] = &[(1, include_str!("0001_credential_vault.sql"))];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |(version, _)| *version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let applied: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();

    if applied > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: applied,
            latest_supported: latest,
        });
    }

    if applied == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for &(version, batch) in MIGRATIONS.iter().filter(|(version, _)| *version > applied) {
        tx.execute_batch(batch)?;
        tx.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    }
    tx.commit()?;

    Ok(())
}
