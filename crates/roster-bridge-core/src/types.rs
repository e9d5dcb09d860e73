//! Strong type definitions for roster-bridge.
//!
//! All identifiers are newtypes to prevent misuse at compile time. Remote
//! entities are identified by value (account id + contact handle), never by
//! the identity of the wrapper object that delivered them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a remote communication account.
///
/// Typically the object path of the account in the presence service, e.g.
/// `/org/freedesktop/Telepathy/Account/gabble/jabber/alice0`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid for a live account).
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Protocol-level handle of a contact within one account (e.g. a JID).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactHandle(String);

impl ContactHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ContactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactHandle({})", self.0)
    }
}

impl fmt::Display for ContactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The identity of a remote contact: the account it belongs to plus its handle.
///
/// This is the key of the change queue and of every sub-record. A given key
/// appears in at most one sub-record across the whole contact database.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactKey {
    pub account: AccountId,
    pub handle: ContactHandle,
}

impl ContactKey {
    pub fn new(account: impl Into<AccountId>, handle: impl Into<ContactHandle>) -> Self {
        Self {
            account: account.into(),
            handle: handle.into(),
        }
    }

    /// A key is well formed when neither component is empty.
    pub fn is_well_formed(&self) -> bool {
        !self.account.is_empty() && !self.handle.is_empty()
    }
}

impl fmt::Debug for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactKey({}, {})", self.account, self.handle)
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.handle)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for ContactHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Local contact id, assigned by the contact store on first save.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(pub u64);

impl LocalId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_well_formed() {
        assert!(ContactKey::new("acc", "bob@example.org").is_well_formed());
        assert!(!ContactKey::new("acc", "").is_well_formed());
        assert!(!ContactKey::new("  ", "bob").is_well_formed());
    }

    #[test]
    fn test_key_display() {
        let key = ContactKey::new("gabble/jabber/alice", "bob@example.org");
        assert_eq!(key.to_string(), "gabble/jabber/alice/bob@example.org");
        assert!(format!("{:?}", key).starts_with("ContactKey("));
    }

    #[test]
    fn test_key_ordering_groups_by_account() {
        let a = ContactKey::new("a", "z");
        let b = ContactKey::new("b", "a");
        assert!(a < b);
    }
}
