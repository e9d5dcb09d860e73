//! Persisted contact records.
//!
//! A [`PersistedContact`] is the local database entity. It links to one or
//! more remote contacts through [`OnlineAccount`] sub-records, each carrying
//! the facet values last synced from that remote contact.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::remote::{Capability, Presence, SubscriptionState};
use crate::types::{AccountId, ContactKey, LocalId};

/// Avatar as recorded in a sub-record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAvatar {
    pub token: String,
    /// Image bytes, once available. `None` while a fetch is outstanding.
    pub data: Option<Bytes>,
}

/// Account-level details, only present on sub-records of the self contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub enabled: bool,
    pub online: bool,
    pub display_name: String,
    pub protocol: String,
    pub service: String,
}

/// One linked remote contact within a persisted contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineAccount {
    pub key: ContactKey,
    pub alias: String,
    pub presence: Presence,
    pub capabilities: BTreeSet<Capability>,
    pub avatar: Option<StoredAvatar>,
    pub subscribe: SubscriptionState,
    pub publish: SubscriptionState,
    pub blocked: bool,
    pub visible: bool,
    /// Set for self sub-records only.
    pub account_info: Option<AccountInfo>,
}

impl OnlineAccount {
    /// An empty sub-record for the given key; facets are filled by the merge.
    pub fn new(key: ContactKey) -> Self {
        Self {
            key,
            alias: String::new(),
            presence: Presence::default(),
            capabilities: BTreeSet::new(),
            avatar: None,
            subscribe: SubscriptionState::Unknown,
            publish: SubscriptionState::Unknown,
            blocked: false,
            visible: true,
            account_info: None,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.key.account
    }
}

/// A local contact record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContact {
    /// `None` until the store assigns an id on first save.
    pub id: Option<LocalId>,
    /// The device owner's own contact, holding one sub-record per account.
    pub is_self: bool,
    pub accounts: Vec<OnlineAccount>,
    /// Locally entered data that does not come from any account.
    pub local_details: BTreeMap<String, String>,
}

impl PersistedContact {
    /// A new, unsaved contact.
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unsaved self contact.
    pub fn new_self() -> Self {
        Self {
            is_self: true,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: LocalId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn sub_record(&self, key: &ContactKey) -> Option<&OnlineAccount> {
        self.accounts.iter().find(|a| &a.key == key)
    }

    pub fn sub_record_mut(&mut self, key: &ContactKey) -> Option<&mut OnlineAccount> {
        self.accounts.iter_mut().find(|a| &a.key == key)
    }

    /// The sub-record belonging to `account`, if any.
    pub fn sub_record_for_account(&self, account: &AccountId) -> Option<&OnlineAccount> {
        self.accounts.iter().find(|a| a.account() == account)
    }

    pub fn sub_record_for_account_mut(&mut self, account: &AccountId) -> Option<&mut OnlineAccount> {
        self.accounts.iter_mut().find(|a| a.account() == account)
    }

    pub fn has_account(&self, account: &AccountId) -> bool {
        self.accounts.iter().any(|a| a.account() == account)
    }

    /// Insert a sub-record, replacing any existing one with the same key.
    pub fn upsert_sub_record(&mut self, record: OnlineAccount) {
        match self.sub_record_mut(&record.key) {
            Some(existing) => *existing = record,
            None => self.accounts.push(record),
        }
    }

    /// Remove the sub-record for `key`. Returns whether one was removed.
    pub fn strip_sub_record(&mut self, key: &ContactKey) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| &a.key != key);
        self.accounts.len() != before
    }

    /// Remove every sub-record of `account`. Returns how many were removed.
    pub fn strip_account(&mut self, account: &AccountId) -> usize {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.account() != account);
        before - self.accounts.len()
    }

    /// Whether removing the sub-record for `key` leaves nothing worth keeping.
    pub fn is_sole_link(&self, key: &ContactKey) -> bool {
        !self.is_self
            && self.local_details.is_empty()
            && self.accounts.len() == 1
            && self.accounts[0].key == *key
    }

    /// A contact with no sub-records and no local details has no reason to exist.
    pub fn is_orphan(&self) -> bool {
        !self.is_self && self.accounts.is_empty() && self.local_details.is_empty()
    }

    /// Whether any two sub-records share a key.
    pub fn has_duplicate_sub_records(&self) -> bool {
        let mut seen = BTreeSet::new();
        !self.accounts.iter().all(|a| seen.insert(&a.key))
    }
}
