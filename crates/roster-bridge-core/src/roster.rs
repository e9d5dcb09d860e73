//! Full roster reconciliation.

use std::collections::BTreeSet;

use crate::persisted::PersistedContact;
use crate::remote::RemoteContact;
use crate::types::{AccountId, ContactKey};

/// Difference between the keys known locally and a full remote roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    /// In the roster, not known locally.
    pub added: Vec<ContactKey>,
    /// Known locally, missing from the roster.
    pub removed: Vec<ContactKey>,
    /// Present on both sides.
    pub retained: Vec<ContactKey>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.retained.is_empty()
    }
}

/// Compare the known keys of an account against its full remote roster.
///
/// Output vectors are sorted by key. Duplicate roster entries count once.
pub fn diff_roster<'a>(
    known: impl IntoIterator<Item = &'a ContactKey>,
    roster: &[RemoteContact],
) -> RosterDiff {
    let known: BTreeSet<&ContactKey> = known.into_iter().collect();
    let remote: BTreeSet<&ContactKey> = roster.iter().map(|c| &c.key).collect();

    RosterDiff {
        added: remote.difference(&known).map(|k| (*k).clone()).collect(),
        removed: known.difference(&remote).map(|k| (*k).clone()).collect(),
        retained: remote.intersection(&known).map(|k| (*k).clone()).collect(),
    }
}

/// Every sub-record key of `account` held by the given contacts.
///
/// Self sub-records are excluded: they are not roster entries.
pub fn known_keys(contacts: &[PersistedContact], account: &AccountId) -> BTreeSet<ContactKey> {
    contacts
        .iter()
        .filter(|c| !c.is_self)
        .flat_map(|c| c.accounts.iter())
        .filter(|a| a.account() == account)
        .map(|a| a.key.clone())
        .collect()
}
