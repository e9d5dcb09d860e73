//! Remote entity snapshots.
//!
//! These are read-only copies of what the presence service currently reports
//! for an account or a contact. The wrapper layer owns the live objects; the
//! core only ever sees snapshots.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, ContactHandle, ContactKey};

/// Presence states reported by the presence service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceState {
    #[default]
    Unknown,
    Offline,
    Available,
    Away,
    ExtendedAway,
    Hidden,
    Busy,
    Error,
}

/// A presence value: state plus protocol status name and free-text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Presence {
    pub state: PresenceState,
    /// Protocol-specific status identifier (e.g. "dnd").
    pub status: String,
    /// User-provided status message.
    pub message: String,
}

impl Presence {
    pub fn new(state: PresenceState) -> Self {
        Self {
            state,
            status: String::new(),
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The presence a contact gets when its account goes offline.
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Authorization state of one direction of a roster subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    #[default]
    Unknown,
    No,
    Ask,
    Yes,
    /// The remote side removed the contact. Terminal.
    RemovedRemotely,
}

/// Communication capabilities a contact advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    TextChat,
    Sms,
    AudioCall,
    VideoCall,
    FileTransfer,
}

/// Reference to a remote avatar image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarRef {
    /// Opaque token that changes whenever the image changes.
    pub token: String,
    /// Where the image can be fetched from, when not delivered inline.
    pub url: Option<String>,
    /// Inline image bytes, when the service delivered them.
    pub data: Option<Bytes>,
}

impl AvatarRef {
    pub fn with_url(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: Some(url.into()),
            data: None,
        }
    }

    pub fn inline(token: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            token: token.into(),
            url: None,
            data: Some(data.into()),
        }
    }
}

/// Snapshot of a remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
    pub id: AccountId,
    pub enabled: bool,
    /// Whether the account currently has a live connection.
    pub online: bool,
    pub display_name: String,
    pub nickname: String,
    /// The account's own handle on the service.
    pub self_handle: ContactHandle,
    pub avatar: Option<AvatarRef>,
    pub presence: Presence,
    /// Protocol tag, e.g. "jabber".
    pub protocol: String,
    /// Service provider tag, e.g. "google-talk".
    pub service: String,
}

impl RemoteAccount {
    pub fn new(id: impl Into<AccountId>, protocol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            online: false,
            display_name: String::new(),
            nickname: String::new(),
            self_handle: ContactHandle::new(""),
            avatar: None,
            presence: Presence::default(),
            protocol: protocol.into(),
            service: String::new(),
        }
    }
}

/// Snapshot of a remote contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContact {
    pub key: ContactKey,
    pub alias: String,
    pub presence: Presence,
    pub capabilities: BTreeSet<Capability>,
    pub avatar: Option<AvatarRef>,
    pub subscribe: SubscriptionState,
    pub publish: SubscriptionState,
    pub blocked: bool,
    /// Whether the contact is a visible member of the stored roster.
    pub visible: bool,
}

impl RemoteContact {
    /// A minimal snapshot for a contact only known by its handle.
    ///
    /// Used for explicit local link requests and for removals of contacts
    /// whose live snapshot is already gone.
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
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.key.account
    }

    pub fn handle(&self) -> &ContactHandle {
        &self.key.handle
    }

    /// The remote side reports a terminal removal.
    pub fn is_removed_remotely(&self) -> bool {
        self.subscribe == SubscriptionState::RemovedRemotely
    }

    /// The alias to persist: falls back to the handle when empty.
    pub fn effective_alias(&self) -> String {
        if self.alias.trim().is_empty() {
            self.key.handle.as_str().to_string()
        } else {
            self.alias.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_alias_defaults_to_handle() {
        let mut c = RemoteContact::new(ContactKey::new("acc", "bob@example.org"));
        assert_eq!(c.effective_alias(), "bob@example.org");
        c.alias = "Bob".into();
        assert_eq!(c.effective_alias(), "Bob");
        c.alias = "   ".into();
        assert_eq!(c.effective_alias(), "bob@example.org");
    }

    #[test]
    fn test_removed_remotely() {
        let mut c = RemoteContact::new(ContactKey::new("acc", "bob"));
        assert!(!c.is_removed_remotely());
        c.subscribe = SubscriptionState::RemovedRemotely;
        assert!(c.is_removed_remotely());
    }

    #[test]
    fn test_presence_defaults_to_unknown() {
        assert_eq!(Presence::default().state, PresenceState::Unknown);
        assert_eq!(Presence::unknown(), Presence::default());
    }
}
