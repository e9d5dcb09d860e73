//! # Roster Bridge Core
//!
//! Pure primitives for roster synchronization: identifiers, remote snapshots,
//! persisted contact records, change masks and the merge engine.
//!
//! This crate contains no I/O, no storage, no async. Everything here is a
//! deterministic function of its inputs.
//!
//! ## Key Types
//!
//! - [`ContactKey`] - Identity of a remote contact (account id + handle)
//! - [`ChangeMask`] - Set of changed facets, generic over [`Facet`]
//! - [`RemoteContact`] / [`RemoteAccount`] - Snapshots of remote entities
//! - [`PersistedContact`] - A local contact with its linked sub-records
//! - [`MergeResult`] - What the store should do with one contact
//!
//! ## Merging
//!
//! [`merge_contact`] and [`merge_account`] are partial patches driven by a
//! change mask. See the [`merge`] module for the rules.

pub mod error;
pub mod facet;
pub mod merge;
pub mod persisted;
pub mod remote;
pub mod roster;
pub mod types;

pub use error::{MergeError, Result};
pub use facet::{AccountFacet, AccountMask, ChangeMask, ContactFacet, ContactMask, Facet};
pub use merge::{
    cascade_account_removal, merge_account, merge_contact, strip_self_account, AvatarRequest,
    MergeOutcome, MergeResult,
};
pub use persisted::{AccountInfo, OnlineAccount, PersistedContact, StoredAvatar};
pub use remote::{
    AvatarRef, Capability, Presence, PresenceState, RemoteAccount, RemoteContact,
    SubscriptionState,
};
pub use roster::{diff_roster, known_keys, RosterDiff};
pub use types::{AccountId, ContactHandle, ContactKey, LocalId};
