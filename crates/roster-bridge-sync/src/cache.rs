//! Latest remote snapshots.
//!
//! Change notifications name facets, never values. The cache holds the
//! current snapshot of every known account and contact so the merge at
//! flush time always reads current data.

use std::collections::HashMap;

use bytes::Bytes;
use roster_bridge_core::{AccountId, ContactKey, RemoteAccount, RemoteContact};

#[derive(Debug, Default)]
pub struct RemoteCache {
    accounts: HashMap<AccountId, RemoteAccount>,
    contacts: HashMap<ContactKey, RemoteContact>,
}

impl RemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_account(&mut self, account: RemoteAccount) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn account(&self, id: &AccountId) -> Option<&RemoteAccount> {
        self.accounts.get(id)
    }

    pub fn has_account(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn account_ids(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.keys()
    }

    /// Forget an account and every contact snapshot under it.
    pub fn remove_account(&mut self, id: &AccountId) -> Option<RemoteAccount> {
        self.contacts.retain(|key, _| &key.account != id);
        self.accounts.remove(id)
    }

    pub fn upsert_contact(&mut self, contact: RemoteContact) {
        self.contacts.insert(contact.key.clone(), contact);
    }

    pub fn contact(&self, key: &ContactKey) -> Option<&RemoteContact> {
        self.contacts.get(key)
    }

    pub fn contact_mut(&mut self, key: &ContactKey) -> Option<&mut RemoteContact> {
        self.contacts.get_mut(key)
    }

    pub fn remove_contact(&mut self, key: &ContactKey) -> Option<RemoteContact> {
        self.contacts.remove(key)
    }

    /// Keys of the cached contacts of `account`.
    pub fn contact_keys(&self, account: &AccountId) -> Vec<ContactKey> {
        self.contacts
            .keys()
            .filter(|key| &key.account == account)
            .cloned()
            .collect()
    }

    /// Store fetched avatar bytes if `token` is still the contact's current one.
    pub fn set_avatar_data(&mut self, key: &ContactKey, token: &str, data: Bytes) -> bool {
        match self
            .contacts
            .get_mut(key)
            .and_then(|c| c.avatar.as_mut())
        {
            Some(avatar) if avatar.token == token => {
                avatar.data = Some(data);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_bridge_core::AvatarRef;

    #[test]
    fn test_remove_account_drops_its_contacts() {
        let mut cache = RemoteCache::new();
        cache.upsert_account(RemoteAccount::new("a", "jabber"));
        cache.upsert_account(RemoteAccount::new("b", "jabber"));
        cache.upsert_contact(RemoteContact::new(ContactKey::new("a", "bob")));
        cache.upsert_contact(RemoteContact::new(ContactKey::new("b", "bob")));

        cache.remove_account(&AccountId::new("a"));
        assert!(!cache.has_account(&AccountId::new("a")));
        assert!(cache.contact(&ContactKey::new("a", "bob")).is_none());
        assert_eq!(cache.contact_keys(&AccountId::new("b")).len(), 1);
    }

    #[test]
    fn test_stale_avatar_ignored() {
        let mut cache = RemoteCache::new();
        let key = ContactKey::new("a", "bob");
        let mut bob = RemoteContact::new(key.clone());
        bob.avatar = Some(AvatarRef::with_url("new", "https://example.org/new.png"));
        cache.upsert_contact(bob);

        assert!(!cache.set_avatar_data(&key, "old", Bytes::from_static(b"old")));
        assert!(cache.set_avatar_data(&key, "new", Bytes::from_static(b"new")));
        let data = cache.contact(&key).unwrap().avatar.as_ref().unwrap().data.clone();
        assert_eq!(data, Some(Bytes::from_static(b"new")));
    }
}
