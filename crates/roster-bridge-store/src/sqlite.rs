//! SQLite implementation of the ContactStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use roster_bridge_core::{AccountId, ContactKey, LocalId, OnlineAccount, PersistedContact};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::ContactStore;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file (and its parent directory) and runs migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened contact store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn sql_id(id: LocalId) -> i64 {
    id.get() as i64
}

// Helper to load a contact with its sub-records
fn load_contact(conn: &Connection, id: LocalId) -> Result<Option<PersistedContact>> {
    let row: Option<(bool, Vec<u8>)> = conn
        .query_row(
            "SELECT is_self, local_details FROM contacts WHERE local_id = ?1",
            params![sql_id(id)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((is_self, details)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(
        "SELECT account_id, handle, record FROM online_accounts
         WHERE local_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![sql_id(id)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut accounts = Vec::with_capacity(rows.len());
    for (account, handle, blob) in rows {
        let record: OnlineAccount = decode(&blob)?;
        if record.key != ContactKey::new(account.as_str(), handle.as_str()) {
            return Err(StoreError::InvalidData(format!(
                "sub-record {} stored under {}/{}",
                record.key, account, handle
            )));
        }
        accounts.push(record);
    }

    Ok(Some(PersistedContact {
        id: Some(id),
        is_self,
        accounts,
        local_details: decode(&details)?,
    }))
}

fn load_many(conn: &Connection, ids: Vec<i64>) -> Result<Vec<PersistedContact>> {
    let mut contacts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(contact) = load_contact(conn, LocalId(id as u64))? {
            contacts.push(contact);
        }
    }
    Ok(contacts)
}

fn save_all(conn: &mut Connection, contacts: &[PersistedContact]) -> Result<Vec<LocalId>> {
    let tx = conn.transaction()?;
    let now = now_millis();

    // Pass 1: contact rows. Old sub-records go first so keys can move
    // between contacts of the same batch.
    let mut ids = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let details = encode(&contact.local_details)?;
        let id = match contact.id {
            Some(id) => {
                let updated = tx.execute(
                    "UPDATE contacts SET is_self = ?1, local_details = ?2, updated_at = ?3
                     WHERE local_id = ?4",
                    params![contact.is_self, details, now, sql_id(id)],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound(id));
                }
                tx.execute(
                    "DELETE FROM online_accounts WHERE local_id = ?1",
                    params![sql_id(id)],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO contacts (is_self, local_details, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![contact.is_self, details, now],
                )?;
                LocalId(tx.last_insert_rowid() as u64)
            }
        };
        ids.push(id);
    }

    // Pass 2: sub-records.
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO online_accounts (local_id, position, account_id, handle, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (contact, id) in contacts.iter().zip(&ids) {
            for (position, record) in contact.accounts.iter().enumerate() {
                let blob = encode(record)?;
                insert
                    .execute(params![
                        sql_id(*id),
                        position as i64,
                        record.key.account.as_str(),
                        record.key.handle.as_str(),
                        blob,
                    ])
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            StoreError::DuplicateSubRecord(record.key.clone())
                        } else {
                            StoreError::Database(e)
                        }
                    })?;
            }
        }
    }

    tx.commit()?;
    Ok(ids)
}

fn remove_all(conn: &mut Connection, ids: &[LocalId]) -> Result<()> {
    let tx = conn.transaction()?;
    for id in ids {
        tx.execute(
            "DELETE FROM online_accounts WHERE local_id = ?1",
            params![sql_id(*id)],
        )?;
        tx.execute("DELETE FROM contacts WHERE local_id = ?1", params![sql_id(*id)])?;
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn check(&self) -> Result<()> {
        self.run(|conn| {
            let version = migration::schema_version(conn)?;
            if version != migration::CURRENT_VERSION {
                return Err(StoreError::Migration(format!(
                    "schema at version {}, expected {}",
                    version,
                    migration::CURRENT_VERSION
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_contact(&self, id: LocalId) -> Result<Option<PersistedContact>> {
        self.run(move |conn| load_contact(conn, id)).await
    }

    async fn find_by_key(&self, key: &ContactKey) -> Result<Option<PersistedContact>> {
        let key = key.clone();

        self.run(move |conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT local_id FROM online_accounts WHERE account_id = ?1 AND handle = ?2",
                    params![key.account.as_str(), key.handle.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match id {
                Some(id) => load_contact(conn, LocalId(id as u64)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn contacts_for_account(&self, account: &AccountId) -> Result<Vec<PersistedContact>> {
        let account = account.clone();

        self.run(move |conn| {
            let ids = conn
                .prepare_cached(
                    "SELECT DISTINCT local_id FROM online_accounts
                     WHERE account_id = ?1 ORDER BY local_id",
                )?
                .query_map(params![account.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            load_many(conn, ids)
        })
        .await
    }

    async fn self_contact(&self) -> Result<Option<PersistedContact>> {
        self.run(|conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT local_id FROM contacts WHERE is_self = 1 ORDER BY local_id LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            match id {
                Some(id) => load_contact(conn, LocalId(id as u64)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_batch(&self, contacts: &[PersistedContact]) -> Result<Vec<LocalId>> {
        let contacts = contacts.to_vec();
        let count = contacts.len();

        let ids = self.run(move |conn| save_all(conn, &contacts)).await?;
        tracing::debug!(count, "saved contact batch");
        Ok(ids)
    }

    async fn remove_batch(&self, ids: &[LocalId]) -> Result<()> {
        let ids = ids.to_vec();
        let count = ids.len();

        self.run(move |conn| remove_all(conn, &ids)).await?;
        tracing::debug!(count, "removed contact batch");
        Ok(())
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
