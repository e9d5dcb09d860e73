//! ContactStore trait: the storage gateway for persisted contacts.
//!
//! This trait lets the sync core stay storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use roster_bridge_core::{AccountId, ContactKey, LocalId, PersistedContact};

use crate::error::Result;

/// The ContactStore trait: async interface for contact persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Batch atomicity**: `save_batch` and `remove_batch` either apply fully or
///   return an error with nothing applied.
/// - **Key uniqueness**: a `(account, handle)` pair belongs to at most one
///   sub-record in the whole store. A batch violating this is rejected with
///   `DuplicateSubRecord`.
/// - **Id assignment**: contacts saved with `id == None` get a fresh id.
#[async_trait]
pub trait ContactStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify the store is reachable and its schema is current.
    async fn check(&self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a contact by local id.
    async fn get_contact(&self, id: LocalId) -> Result<Option<PersistedContact>>;

    /// Get the contact holding the sub-record for `key`.
    async fn find_by_key(&self, key: &ContactKey) -> Result<Option<PersistedContact>>;

    /// Every contact with at least one sub-record of `account`, ordered by id.
    ///
    /// Includes the self contact when it holds a sub-record for the account.
    async fn contacts_for_account(&self, account: &AccountId) -> Result<Vec<PersistedContact>>;

    /// The self contact, if one has been saved.
    async fn self_contact(&self) -> Result<Option<PersistedContact>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Batch writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Save a batch of contacts.
    ///
    /// Returns the id of every contact in input order, including newly
    /// assigned ones.
    async fn save_batch(&self, contacts: &[PersistedContact]) -> Result<Vec<LocalId>>;

    /// Remove a batch of contacts with their sub-records.
    ///
    /// Ids that are not present are ignored.
    async fn remove_batch(&self, ids: &[LocalId]) -> Result<()>;
}

#[async_trait]
impl<S: ContactStore + ?Sized> ContactStore for Arc<S> {
    async fn check(&self) -> Result<()> {
        (**self).check().await
    }

    async fn get_contact(&self, id: LocalId) -> Result<Option<PersistedContact>> {
        (**self).get_contact(id).await
    }

    async fn find_by_key(&self, key: &ContactKey) -> Result<Option<PersistedContact>> {
        (**self).find_by_key(key).await
    }

    async fn contacts_for_account(&self, account: &AccountId) -> Result<Vec<PersistedContact>> {
        (**self).contacts_for_account(account).await
    }

    async fn self_contact(&self) -> Result<Option<PersistedContact>> {
        (**self).self_contact().await
    }

    async fn save_batch(&self, contacts: &[PersistedContact]) -> Result<Vec<LocalId>> {
        (**self).save_batch(contacts).await
    }

    async fn remove_batch(&self, ids: &[LocalId]) -> Result<()> {
        (**self).remove_batch(ids).await
    }
}
