//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: it can be called on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = schema_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated contact schema");
    }

    Ok(())
}

/// The highest applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Local contacts
        CREATE TABLE contacts (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            is_self INTEGER NOT NULL DEFAULT 0,
            local_details BLOB NOT NULL,      -- CBOR map of locally entered fields
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Linked remote contacts, one row per sub-record
        CREATE TABLE online_accounts (
            local_id INTEGER NOT NULL,
            position INTEGER NOT NULL,        -- order within the contact
            account_id TEXT NOT NULL,
            handle TEXT NOT NULL,
            record BLOB NOT NULL,             -- CBOR of the full sub-record

            UNIQUE(account_id, handle)
        );

        CREATE INDEX idx_online_accounts_local ON online_accounts(local_id);
        CREATE INDEX idx_online_accounts_account ON online_accounts(account_id);
        CREATE INDEX idx_contacts_self ON contacts(is_self);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
