//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use bytes::Bytes;
use proptest::prelude::*;

use roster_bridge_core::{
    AccountFacet, AccountId, AccountMask, AvatarRef, Capability, ContactFacet, ContactHandle,
    ContactKey, ContactMask, Presence, PresenceState, RemoteAccount, RemoteContact,
    SubscriptionState,
};

/// Generate an account id.
pub fn account_id() -> impl Strategy<Value = AccountId> {
    "acc-[0-9]{1,2}".prop_map(AccountId::new)
}

/// Generate a contact handle.
pub fn handle() -> impl Strategy<Value = ContactHandle> {
    "[a-z][a-z0-9.]{0,11}@example\\.org".prop_map(ContactHandle::new)
}

pub fn presence_state() -> impl Strategy<Value = PresenceState> {
    prop_oneof![
        Just(PresenceState::Unknown),
        Just(PresenceState::Offline),
        Just(PresenceState::Available),
        Just(PresenceState::Away),
        Just(PresenceState::ExtendedAway),
        Just(PresenceState::Hidden),
        Just(PresenceState::Busy),
        Just(PresenceState::Error),
    ]
}

pub fn presence() -> impl Strategy<Value = Presence> {
    (presence_state(), "[a-z]{0,6}", ".{0,24}").prop_map(|(state, status, message)| Presence {
        state,
        status,
        message,
    })
}

pub fn capabilities() -> impl Strategy<Value = BTreeSet<Capability>> {
    prop::collection::btree_set(
        prop_oneof![
            Just(Capability::TextChat),
            Just(Capability::Sms),
            Just(Capability::AudioCall),
            Just(Capability::VideoCall),
            Just(Capability::FileTransfer),
        ],
        0..=5,
    )
}

/// Subscription states short of a remote removal.
pub fn live_subscription() -> impl Strategy<Value = SubscriptionState> {
    prop_oneof![
        Just(SubscriptionState::Unknown),
        Just(SubscriptionState::No),
        Just(SubscriptionState::Ask),
        Just(SubscriptionState::Yes),
    ]
}

/// No avatar, a fetchable one, or inline bytes.
pub fn avatar() -> impl Strategy<Value = Option<AvatarRef>> {
    prop_oneof![
        Just(None),
        "[0-9a-f]{8}".prop_map(|token| {
            let url = format!("https://avatars.example.org/{}.png", token);
            Some(AvatarRef::with_url(token, url))
        }),
        ("[0-9a-f]{8}", prop::collection::vec(any::<u8>(), 1..64))
            .prop_map(|(token, data)| Some(AvatarRef::inline(token, Bytes::from(data)))),
    ]
}

/// Any contact facet except `Removed`.
pub fn contact_facet() -> impl Strategy<Value = ContactFacet> {
    prop_oneof![
        Just(ContactFacet::Alias),
        Just(ContactFacet::Presence),
        Just(ContactFacet::Capabilities),
        Just(ContactFacet::Avatar),
        Just(ContactFacet::Subscription),
        Just(ContactFacet::Blocked),
        Just(ContactFacet::Membership),
    ]
}

/// A non-empty contact mask without `Removed`.
pub fn contact_mask() -> impl Strategy<Value = ContactMask> {
    prop::collection::vec(contact_facet(), 1..=4).prop_map(|facets| facets.into_iter().collect())
}

/// Any account facet except `Removed`.
pub fn account_facet() -> impl Strategy<Value = AccountFacet> {
    prop_oneof![
        Just(AccountFacet::Enabled),
        Just(AccountFacet::Online),
        Just(AccountFacet::DisplayName),
        Just(AccountFacet::Nickname),
        Just(AccountFacet::Avatar),
        Just(AccountFacet::Presence),
    ]
}

pub fn account_mask() -> impl Strategy<Value = AccountMask> {
    prop::collection::vec(account_facet(), 1..=3).prop_map(|facets| facets.into_iter().collect())
}

/// A live remote contact on `account`.
pub fn remote_contact(account: impl Into<AccountId>) -> impl Strategy<Value = RemoteContact> {
    let account = account.into();
    (
        handle(),
        "[A-Za-z ]{0,16}",
        presence(),
        capabilities(),
        avatar(),
        live_subscription(),
        live_subscription(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            move |(handle, alias, presence, capabilities, avatar, subscribe, publish, blocked, visible)| {
                RemoteContact {
                    key: ContactKey {
                        account: account.clone(),
                        handle,
                    },
                    alias,
                    presence,
                    capabilities,
                    avatar,
                    subscribe,
                    publish,
                    blocked,
                    visible,
                }
            },
        )
}

pub fn remote_account() -> impl Strategy<Value = RemoteAccount> {
    (
        account_id(),
        any::<bool>(),
        any::<bool>(),
        "[A-Za-z ]{0,16}",
        handle(),
        presence(),
    )
        .prop_map(|(id, enabled, online, display_name, self_handle, presence)| {
            let mut account = RemoteAccount::new(id, "jabber");
            account.enabled = enabled;
            account.online = online;
            account.display_name = display_name;
            account.self_handle = self_handle;
            account.presence = presence;
            account
        })
}
