//! In-memory implementation of the ContactStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use roster_bridge_core::{AccountId, ContactKey, LocalId, PersistedContact};

use crate::error::{Result, StoreError};
use crate::traits::ContactStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Last assigned id.
    last_id: u64,

    /// Contacts indexed by id.
    contacts: BTreeMap<LocalId, PersistedContact>,

    /// Sub-record index: key -> owning contact.
    keys: HashMap<ContactKey, LocalId>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of stored contacts.
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.contacts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored contact, ordered by id.
    pub fn snapshot(&self) -> Vec<PersistedContact> {
        self.read()
            .map(|inner| inner.contacts.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    /// Check a batch against the current contents without applying it.
    fn validate(&self, contacts: &[PersistedContact]) -> Result<()> {
        let replaced: HashSet<LocalId> = contacts.iter().filter_map(|c| c.id).collect();
        if let Some(missing) = replaced.iter().find(|id| !self.contacts.contains_key(*id)) {
            return Err(StoreError::NotFound(*missing));
        }

        let mut claimed: HashSet<&ContactKey> = HashSet::new();
        for contact in contacts {
            for record in &contact.accounts {
                if !claimed.insert(&record.key) {
                    return Err(StoreError::DuplicateSubRecord(record.key.clone()));
                }
                // Owned by a contact outside the batch that keeps it.
                if let Some(owner) = self.keys.get(&record.key) {
                    if !replaced.contains(owner) {
                        return Err(StoreError::DuplicateSubRecord(record.key.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    fn unindex(&mut self, id: LocalId) {
        if let Some(old) = self.contacts.get(&id) {
            for record in &old.accounts {
                if self.keys.get(&record.key) == Some(&id) {
                    self.keys.remove(&record.key);
                }
            }
        }
    }

    fn apply(&mut self, contacts: &[PersistedContact]) -> Vec<LocalId> {
        // Drop every replaced contact's keys first so keys can move within the batch.
        for id in contacts.iter().filter_map(|c| c.id) {
            self.unindex(id);
        }

        let mut ids = Vec::with_capacity(contacts.len());
        for contact in contacts {
            let id = match contact.id {
                Some(id) => id,
                None => {
                    self.last_id += 1;
                    LocalId(self.last_id)
                }
            };

            let mut stored = contact.clone();
            stored.id = Some(id);
            for record in &stored.accounts {
                self.keys.insert(record.key.clone(), id);
            }
            self.contacts.insert(id, stored);
            ids.push(id);
        }
        ids
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn check(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn get_contact(&self, id: LocalId) -> Result<Option<PersistedContact>> {
        let inner = self.read()?;
        Ok(inner.contacts.get(&id).cloned())
    }

    async fn find_by_key(&self, key: &ContactKey) -> Result<Option<PersistedContact>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .get(key)
            .and_then(|id| inner.contacts.get(id))
            .cloned())
    }

    async fn contacts_for_account(&self, account: &AccountId) -> Result<Vec<PersistedContact>> {
        let inner = self.read()?;
        Ok(inner
            .contacts
            .values()
            .filter(|c| c.has_account(account))
            .cloned()
            .collect())
    }

    async fn self_contact(&self) -> Result<Option<PersistedContact>> {
        let inner = self.read()?;
        Ok(inner.contacts.values().find(|c| c.is_self).cloned())
    }

    async fn save_batch(&self, contacts: &[PersistedContact]) -> Result<Vec<LocalId>> {
        let mut inner = self.write()?;
        inner.validate(contacts)?;
        Ok(inner.apply(contacts))
    }

    async fn remove_batch(&self, ids: &[LocalId]) -> Result<()> {
        let mut inner = self.write()?;
        for id in ids {
            inner.unindex(*id);
            inner.contacts.remove(id);
        }
        Ok(())
    }
}
