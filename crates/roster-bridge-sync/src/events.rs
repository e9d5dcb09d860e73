//! Inbound events from the remote wrapper layer.
//!
//! Wrapper notifications arrive as typed messages; the owner loop applies
//! them to the coordinator one at a time.

use bytes::Bytes;
use roster_bridge_core::{
    AccountId, AccountMask, ContactHandle, ContactKey, ContactMask, RemoteAccount, RemoteContact,
};

/// Account lifecycle and change notifications.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// The full current account list, e.g. at startup.
    Snapshot(Vec<RemoteAccount>),
    Added(RemoteAccount),
    Updated(RemoteAccount, AccountMask),
    Removed(AccountId),
}

/// Contact change notifications.
#[derive(Debug, Clone)]
pub enum ContactEvent {
    Added(RemoteContact),
    Updated(RemoteContact, ContactMask),
    Removed(ContactKey),
    /// The complete roster of one account.
    RosterSnapshot {
        account: AccountId,
        contacts: Vec<RemoteContact>,
    },
    /// An incremental roster change of one account.
    RosterDelta {
        account: AccountId,
        added: Vec<RemoteContact>,
        removed: Vec<ContactHandle>,
    },
    /// Completion of an out-of-band avatar fetch.
    AvatarFetched {
        key: ContactKey,
        token: String,
        data: Bytes,
    },
}
