//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use roster_bridge_core::{
    merge_account, AccountMask, AvatarRef, Capability, ContactHandle, ContactKey, LocalId,
    MergeResult, OnlineAccount, PersistedContact, Presence, PresenceState, RemoteAccount,
    RemoteContact, SubscriptionState,
};
use roster_bridge_store::{ContactStore, MemoryStore, Result};
use roster_bridge_sync::{AccountSyncCoordinator, SyncConfig};

/// A test fixture with one online account and a memory store.
pub struct TestFixture {
    pub account: RemoteAccount,
    pub store: Arc<MemoryStore>,
}

impl TestFixture {
    /// Create a new fixture for account `acc-1`.
    pub fn new() -> Self {
        Self::with_account("acc-1")
    }

    /// Create a fixture for the given account id.
    pub fn with_account(id: &str) -> Self {
        Self::sharing(id, Arc::new(MemoryStore::new()))
    }

    fn sharing(id: &str, store: Arc<MemoryStore>) -> Self {
        let mut account = RemoteAccount::new(id, "jabber");
        account.online = true;
        account.display_name = format!("Account {}", id);
        account.self_handle = ContactHandle::new(format!("me@{}.example.org", id));
        account.presence = Presence::new(PresenceState::Available);
        Self { account, store }
    }

    /// The key of `handle` on this fixture's account.
    pub fn key(&self, handle: &str) -> ContactKey {
        ContactKey::new(self.account.id.clone(), handle)
    }

    /// A fully populated, subscribed contact on this account.
    pub fn contact(&self, handle: &str) -> RemoteContact {
        let mut contact = RemoteContact::new(self.key(handle));
        contact.presence = Presence::new(PresenceState::Available);
        contact.capabilities = BTreeSet::from([Capability::TextChat]);
        contact.subscribe = SubscriptionState::Yes;
        contact.publish = SubscriptionState::Yes;
        contact
    }

    /// A contact with an avatar that has to be fetched from `url`.
    pub fn contact_with_avatar(&self, handle: &str, token: &str, url: &str) -> RemoteContact {
        let mut contact = self.contact(handle);
        contact.avatar = Some(AvatarRef::with_url(token, url));
        contact
    }

    /// A coordinator over this fixture's store with default timings.
    pub fn coordinator(&self) -> AccountSyncCoordinator<MemoryStore> {
        self.coordinator_with(&SyncConfig::default())
    }

    pub fn coordinator_with(&self, config: &SyncConfig) -> AccountSyncCoordinator<MemoryStore> {
        AccountSyncCoordinator::new(Arc::clone(&self.store), config)
    }

    /// Store one contact linked to `handles` on this account.
    pub async fn seed_contact(&self, handles: &[&str]) -> Result<LocalId> {
        let mut contact = PersistedContact::new();
        for handle in handles {
            let mut record = OnlineAccount::new(self.key(handle));
            record.alias = handle.to_string();
            contact.upsert_sub_record(record);
        }
        let ids = self.store.save_batch(&[contact]).await?;
        Ok(ids[0])
    }

    /// Store the self contact with this fixture's account linked.
    pub async fn seed_self(&self) -> Result<LocalId> {
        let current = self.store.self_contact().await?;
        let contact = match merge_account(current.as_ref(), &self.account, AccountMask::all_facets())
        {
            Ok(MergeResult::Create(c)) | Ok(MergeResult::Update(c)) => c,
            _ => current.unwrap_or_else(PersistedContact::new_self),
        };
        let ids = self.store.save_batch(&[contact]).await?;
        Ok(ids[0])
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create fixtures for several accounts sharing one store.
pub fn multi_account_fixtures(count: usize) -> Vec<TestFixture> {
    let store = Arc::new(MemoryStore::new());
    (1..=count)
        .map(|i| TestFixture::sharing(&format!("acc-{}", i), Arc::clone(&store)))
        .collect()
}
