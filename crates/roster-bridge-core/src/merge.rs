//! The merge engine.
//!
//! Pure functions mapping a remote snapshot, a change mask and an optional
//! persisted record to the persisted record that should result.
//!
//! ## Rules
//!
//! - A merge is a partial patch: only flagged facets are copied from the
//!   remote snapshot. Unflagged facets keep their persisted values, so a later
//!   small change never clobbers data an earlier flush wrote from a different
//!   notification.
//! - `Removed` dominates. A mask containing it (or a remote subscription state
//!   of `RemovedRemotely`) always yields `Delete` or a stripped `Update`.
//! - A patch that changes nothing yields `NoOp`, so it drops out of the batch.
//! - Avatar changes never block: when the image has to be fetched, the merge
//!   records the new token and returns an [`AvatarRequest`] alongside.

use crate::error::{MergeError, Result};
use crate::facet::{AccountFacet, AccountMask, ContactFacet, ContactMask};
use crate::persisted::{AccountInfo, OnlineAccount, PersistedContact, StoredAvatar};
use crate::remote::{AvatarRef, RemoteAccount, RemoteContact};
use crate::types::{AccountId, ContactKey, LocalId};

/// What should happen to a persisted contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Save a new contact.
    Create(PersistedContact),
    /// Save a modified contact.
    Update(PersistedContact),
    /// Remove the contact with this id.
    Delete(LocalId),
    /// Nothing to write.
    NoOp,
}

impl MergeResult {
    pub fn is_noop(&self) -> bool {
        matches!(self, MergeResult::NoOp)
    }

    /// The contact to save, for `Create` and `Update`.
    pub fn contact(&self) -> Option<&PersistedContact> {
        match self {
            MergeResult::Create(c) | MergeResult::Update(c) => Some(c),
            MergeResult::Delete(_) | MergeResult::NoOp => None,
        }
    }
}

/// A request to fetch an avatar image out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRequest {
    pub key: ContactKey,
    pub token: String,
    pub url: String,
}

/// Result of merging one remote contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub result: MergeResult,
    pub avatar_request: Option<AvatarRequest>,
}

impl MergeOutcome {
    fn plain(result: MergeResult) -> Self {
        Self {
            result,
            avatar_request: None,
        }
    }
}

/// Merge a remote contact snapshot into an optional persisted contact.
///
/// `existing` is the contact currently holding the sub-record for
/// `remote.key`, or the local contact the key is being linked to, or `None`
/// when the remote contact has no local counterpart yet.
pub fn merge_contact(
    existing: Option<&PersistedContact>,
    remote: &RemoteContact,
    mask: ContactMask,
) -> Result<MergeOutcome> {
    validate_key(&remote.key)?;

    let removal = mask.is_removed() || remote.is_removed_remotely();

    let Some(existing) = existing else {
        if removal {
            return Ok(MergeOutcome::plain(MergeResult::NoOp));
        }
        let mut record = OnlineAccount::new(remote.key.clone());
        let avatar_request = apply_contact_facets(&mut record, remote, ContactMask::all_facets());
        let mut contact = PersistedContact::new();
        contact.accounts.push(record);
        return Ok(MergeOutcome {
            result: MergeResult::Create(contact),
            avatar_request,
        });
    };

    if removal {
        return Ok(MergeOutcome::plain(unlink(existing, &remote.key)));
    }

    let mut patched = existing.clone();
    let mask = if patched.sub_record(&remote.key).is_some() {
        mask
    } else {
        // Linking a new sub-record: initialize every facet.
        patched.accounts.push(OnlineAccount::new(remote.key.clone()));
        ContactMask::all_facets()
    };

    let record = patched
        .sub_record_mut(&remote.key)
        .ok_or_else(|| MergeError::MissingSubRecord(remote.key.clone()))?;
    let avatar_request = apply_contact_facets(record, remote, mask);

    let result = if patched == *existing {
        MergeResult::NoOp
    } else {
        MergeResult::Update(patched)
    };

    Ok(MergeOutcome {
        result,
        avatar_request,
    })
}

/// Remove the link between `contact` and the remote contact `key`.
fn unlink(contact: &PersistedContact, key: &ContactKey) -> MergeResult {
    if contact.sub_record(key).is_none() {
        return MergeResult::NoOp;
    }

    if contact.is_sole_link(key) {
        // Never persisted: there is nothing to delete.
        return match contact.id {
            Some(id) => MergeResult::Delete(id),
            None => MergeResult::NoOp,
        };
    }

    let mut stripped = contact.clone();
    stripped.strip_sub_record(key);
    MergeResult::Update(stripped)
}

/// Copy the flagged facets from `remote` onto `record`.
fn apply_contact_facets(
    record: &mut OnlineAccount,
    remote: &RemoteContact,
    mask: ContactMask,
) -> Option<AvatarRequest> {
    let mut avatar_request = None;

    for facet in mask.iter() {
        match facet {
            ContactFacet::Alias => record.alias = remote.effective_alias(),
            ContactFacet::Presence => record.presence = remote.presence.clone(),
            ContactFacet::Capabilities => record.capabilities = remote.capabilities.clone(),
            ContactFacet::Avatar => {
                avatar_request = apply_avatar(&mut record.avatar, remote.avatar.as_ref())
                    .map(|(token, url)| AvatarRequest {
                        key: remote.key.clone(),
                        token,
                        url,
                    });
            }
            ContactFacet::Subscription => {
                record.subscribe = remote.subscribe;
                record.publish = remote.publish;
            }
            ContactFacet::Blocked => record.blocked = remote.blocked,
            ContactFacet::Membership => record.visible = remote.visible,
            ContactFacet::Removed => {}
        }
    }

    avatar_request
}

/// Update a stored avatar from a remote reference.
///
/// Returns `(token, url)` when the image must be fetched.
fn apply_avatar(
    stored: &mut Option<StoredAvatar>,
    remote: Option<&AvatarRef>,
) -> Option<(String, String)> {
    let Some(remote) = remote else {
        *stored = None;
        return None;
    };

    if let Some(data) = &remote.data {
        *stored = Some(StoredAvatar {
            token: remote.token.clone(),
            data: Some(data.clone()),
        });
        return None;
    }

    let up_to_date = stored
        .as_ref()
        .map(|s| s.token == remote.token && s.data.is_some())
        .unwrap_or(false);
    if up_to_date {
        return None;
    }

    *stored = Some(StoredAvatar {
        token: remote.token.clone(),
        data: None,
    });
    remote.url.clone().map(|url| (remote.token.clone(), url))
}

/// Merge a remote account into the self contact.
///
/// The self contact holds one sub-record per account. Adding an account
/// creates the self contact if needed; removing it strips the sub-record but
/// never deletes the self contact.
pub fn merge_account(
    self_contact: Option<&PersistedContact>,
    account: &RemoteAccount,
    mask: AccountMask,
) -> Result<MergeResult> {
    if account.id.is_empty() {
        return Err(MergeError::MalformedRemoteData("empty account id".into()));
    }

    if mask.is_removed() {
        return Ok(strip_self_account(self_contact, &account.id));
    }

    let Some(existing) = self_contact else {
        let mut contact = PersistedContact::new_self();
        contact.accounts.push(new_self_record(account));
        return Ok(MergeResult::Create(contact));
    };

    let mut patched = existing.clone();
    match patched.sub_record_for_account_mut(&account.id) {
        Some(record) => apply_account_facets(record, account, mask),
        None => patched.accounts.push(new_self_record(account)),
    }

    if patched == *existing {
        Ok(MergeResult::NoOp)
    } else {
        Ok(MergeResult::Update(patched))
    }
}

/// Strip the self sub-record of `account`, if present.
pub fn strip_self_account(self_contact: Option<&PersistedContact>, account: &AccountId) -> MergeResult {
    match self_contact {
        Some(contact) if contact.has_account(account) => {
            let mut stripped = contact.clone();
            stripped.strip_account(account);
            MergeResult::Update(stripped)
        }
        _ => MergeResult::NoOp,
    }
}

fn new_self_record(account: &RemoteAccount) -> OnlineAccount {
    let mut record = OnlineAccount::new(ContactKey {
        account: account.id.clone(),
        handle: account.self_handle.clone(),
    });
    record.account_info = Some(AccountInfo {
        protocol: account.protocol.clone(),
        service: account.service.clone(),
        ..AccountInfo::default()
    });
    apply_account_facets(&mut record, account, AccountMask::all_facets());
    record
}

fn apply_account_facets(record: &mut OnlineAccount, account: &RemoteAccount, mask: AccountMask) {
    let info = record.account_info.get_or_insert_with(AccountInfo::default);

    for facet in mask.iter() {
        match facet {
            AccountFacet::Enabled => info.enabled = account.enabled,
            AccountFacet::Online => {
                info.online = account.online;
                // The self handle is only known once connected.
                if !account.self_handle.is_empty() {
                    record.key.handle = account.self_handle.clone();
                }
            }
            AccountFacet::DisplayName => info.display_name = account.display_name.clone(),
            AccountFacet::Nickname => record.alias = account.nickname.clone(),
            AccountFacet::Avatar => {
                // Account avatars are delivered inline; no fetch is requested.
                let _ = apply_avatar(&mut record.avatar, account.avatar.as_ref());
            }
            AccountFacet::Presence => record.presence = account.presence.clone(),
            AccountFacet::Removed => {}
        }
    }
}

/// Compute the effect of removing `account` on every contact linked to it.
///
/// Contacts left with no sub-record and no local details are deleted; the
/// others are stripped. The self contact is skipped: [`merge_account`]
/// handles it.
pub fn cascade_account_removal(contacts: &[PersistedContact], account: &AccountId) -> Vec<MergeResult> {
    contacts
        .iter()
        .filter(|c| !c.is_self && c.has_account(account))
        .filter_map(|c| {
            let mut stripped = c.clone();
            stripped.strip_account(account);
            if stripped.is_orphan() {
                c.id.map(MergeResult::Delete)
            } else {
                Some(MergeResult::Update(stripped))
            }
        })
        .collect()
}

fn validate_key(key: &ContactKey) -> Result<()> {
    if key.account.is_empty() {
        return Err(MergeError::MalformedRemoteData(format!(
            "empty account id for handle {:?}",
            key.handle.as_str()
        )));
    }
    if key.handle.is_empty() {
        return Err(MergeError::MalformedRemoteData(format!(
            "empty contact handle in account {}",
            key.account
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Capability, Presence, PresenceState, SubscriptionState};

    fn remote(handle: &str) -> RemoteContact {
        let mut c = RemoteContact::new(ContactKey::new("acc", handle));
        c.alias = format!("{} alias", handle);
        c.presence = Presence::new(PresenceState::Available);
        c.capabilities.insert(Capability::TextChat);
        c.subscribe = SubscriptionState::Yes;
        c.publish = SubscriptionState::Yes;
        c
    }

    fn persisted(remote: &RemoteContact, id: u64) -> PersistedContact {
        match merge_contact(None, remote, ContactMask::all_facets()).unwrap().result {
            MergeResult::Create(c) => c.with_id(LocalId(id)),
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn test_create_initializes_all_facets() {
        let mut r = remote("bob");
        r.alias.clear();
        let outcome = merge_contact(None, &r, ContactMask::of(ContactFacet::Presence)).unwrap();

        let MergeResult::Create(contact) = outcome.result else {
            panic!("expected create");
        };
        assert_eq!(contact.id, None);
        assert_eq!(contact.accounts.len(), 1);
        let sub = &contact.accounts[0];
        assert_eq!(sub.alias, "bob");
        assert_eq!(sub.presence.state, PresenceState::Available);
        assert!(sub.capabilities.contains(&Capability::TextChat));
        assert_eq!(sub.subscribe, SubscriptionState::Yes);
    }

    #[test]
    fn test_create_skipped_for_removed() {
        let outcome = merge_contact(None, &remote("bob"), ContactMask::removed()).unwrap();
        assert!(outcome.result.is_noop());

        let mut r = remote("bob");
        r.subscribe = SubscriptionState::RemovedRemotely;
        let outcome = merge_contact(None, &r, ContactMask::of(ContactFacet::Alias)).unwrap();
        assert!(outcome.result.is_noop());
    }

    #[test]
    fn test_update_is_partial_patch() {
        let r = remote("bob");
        let existing = persisted(&r, 1);

        let mut changed = r.clone();
        changed.alias = "Robert".into();
        changed.presence = Presence::new(PresenceState::Away);

        let outcome = merge_contact(Some(&existing), &changed, ContactMask::of(ContactFacet::Alias)).unwrap();
        let MergeResult::Update(updated) = outcome.result else {
            panic!("expected update");
        };
        let sub = &updated.accounts[0];
        assert_eq!(sub.alias, "Robert");
        // Presence was not flagged and keeps its persisted value.
        assert_eq!(sub.presence.state, PresenceState::Available);
        assert_eq!(updated.id, Some(LocalId(1)));
    }

    #[test]
    fn test_unchanged_patch_is_noop() {
        let r = remote("bob");
        let existing = persisted(&r, 1);
        let outcome = merge_contact(Some(&existing), &r, ContactMask::all_facets()).unwrap();
        assert!(outcome.result.is_noop());
    }

    #[test]
    fn test_removed_deletes_sole_link() {
        let r = remote("bob");
        let existing = persisted(&r, 7);
        let mask = ContactMask::removed() | ContactFacet::Alias | ContactFacet::Presence;
        let outcome = merge_contact(Some(&existing), &r, mask).unwrap();
        assert_eq!(outcome.result, MergeResult::Delete(LocalId(7)));
    }

    #[test]
    fn test_removed_strips_when_other_links_remain() {
        let r = remote("bob");
        let mut existing = persisted(&r, 3);
        existing.upsert_sub_record(OnlineAccount::new(ContactKey::new("other", "bob")));

        let outcome = merge_contact(Some(&existing), &r, ContactMask::removed()).unwrap();
        let MergeResult::Update(updated) = outcome.result else {
            panic!("expected update");
        };
        assert_eq!(updated.accounts.len(), 1);
        assert_eq!(updated.accounts[0].key, ContactKey::new("other", "bob"));
    }

    #[test]
    fn test_remote_removal_strips_when_local_details_exist() {
        let mut r = remote("bob");
        let mut existing = persisted(&r, 3);
        existing.local_details.insert("note".into(), "met at fosdem".into());
        r.subscribe = SubscriptionState::RemovedRemotely;

        let outcome = merge_contact(Some(&existing), &r, ContactMask::of(ContactFacet::Subscription)).unwrap();
        let MergeResult::Update(updated) = outcome.result else {
            panic!("expected update");
        };
        assert!(updated.accounts.is_empty());
        assert_eq!(updated.local_details.len(), 1);
    }

    #[test]
    fn test_link_to_existing_local_contact() {
        let mut local = PersistedContact::new().with_id(LocalId(9));
        local.local_details.insert("name".into(), "Bob".into());

        let r = remote("bob");
        let outcome = merge_contact(Some(&local), &r, ContactMask::of(ContactFacet::Presence)).unwrap();
        let MergeResult::Update(updated) = outcome.result else {
            panic!("expected update");
        };
        // A new link is fully initialized regardless of the mask.
        assert_eq!(updated.accounts[0].alias, "bob alias");
        assert_eq!(updated.id, Some(LocalId(9)));
    }

    #[test]
    fn test_malformed_handle_rejected() {
        let r = RemoteContact::new(ContactKey::new("acc", ""));
        let err = merge_contact(None, &r, ContactMask::all_facets()).unwrap_err();
        assert!(matches!(err, MergeError::MalformedRemoteData(_)));
    }

    #[test]
    fn test_avatar_url_requests_fetch_without_blocking() {
        let mut r = remote("bob");
        let existing = persisted(&r, 1);
        r.avatar = Some(AvatarRef::with_url("tok1", "https://example.org/a.png"));

        let outcome = merge_contact(Some(&existing), &r, ContactMask::of(ContactFacet::Avatar)).unwrap();
        let request = outcome.avatar_request.expect("fetch requested");
        assert_eq!(request.token, "tok1");
        assert_eq!(request.key, r.key);

        let MergeResult::Update(updated) = outcome.result else {
            panic!("expected update");
        };
        let avatar = updated.accounts[0].avatar.as_ref().unwrap();
        assert_eq!(avatar.token, "tok1");
        assert!(avatar.data.is_none());
    }

    #[test]
    fn test_avatar_fetched_data_lands() {
        let mut r = remote("bob");
        r.avatar = Some(AvatarRef::with_url("tok1", "https://example.org/a.png"));
        let existing = persisted(&r, 1);

        r.avatar.as_mut().unwrap().data = Some(bytes::Bytes::from_static(b"png"));
        let outcome = merge_contact(Some(&existing), &r, ContactMask::of(ContactFacet::Avatar)).unwrap();
        assert!(outcome.avatar_request.is_none());
        let stored = outcome.result.contact().unwrap().accounts[0].avatar.clone().unwrap();
        assert_eq!(stored.data.as_deref(), Some(&b"png"[..]));

        // Same token with data already stored: nothing left to do.
        let settled = outcome.result.contact().unwrap().clone();
        r.avatar.as_mut().unwrap().data = None;
        let again = merge_contact(Some(&settled), &r, ContactMask::of(ContactFacet::Avatar)).unwrap();
        assert!(again.result.is_noop());
        assert!(again.avatar_request.is_none());
    }

    fn account(id: &str) -> RemoteAccount {
        let mut a = RemoteAccount::new(id, "jabber");
        a.display_name = "Work".into();
        a.nickname = "alice".into();
        a.self_handle = "alice@example.org".into();
        a.online = true;
        a
    }

    #[test]
    fn test_account_add_creates_self_contact() {
        let result = merge_account(None, &account("acc"), AccountMask::all_facets()).unwrap();
        let MergeResult::Create(me) = result else {
            panic!("expected create");
        };
        assert!(me.is_self);
        let sub = &me.accounts[0];
        assert_eq!(sub.key, ContactKey::new("acc", "alice@example.org"));
        let info = sub.account_info.as_ref().unwrap();
        assert!(info.enabled && info.online);
        assert_eq!(info.protocol, "jabber");
        assert_eq!(sub.alias, "alice");
    }

    #[test]
    fn test_account_update_and_remove() {
        let MergeResult::Create(me) = merge_account(None, &account("acc"), AccountMask::all_facets()).unwrap() else {
            panic!("expected create");
        };
        let me = me.with_id(LocalId(1));

        let mut changed = account("acc");
        changed.enabled = false;
        changed.display_name = "Ignored".into();
        let MergeResult::Update(updated) = merge_account(Some(&me), &changed, AccountMask::of(AccountFacet::Enabled)).unwrap() else {
            panic!("expected update");
        };
        let info = updated.accounts[0].account_info.as_ref().unwrap();
        assert!(!info.enabled);
        assert_eq!(info.display_name, "Work");

        let removed = merge_account(Some(&updated), &changed, AccountMask::removed()).unwrap();
        let MergeResult::Update(stripped) = removed else {
            panic!("expected update");
        };
        assert!(stripped.accounts.is_empty());
        assert!(stripped.is_self);
    }

    #[test]
    fn test_second_account_joins_self_contact() {
        let MergeResult::Create(me) = merge_account(None, &account("a"), AccountMask::all_facets()).unwrap() else {
            panic!("expected create");
        };
        let result = merge_account(Some(&me), &account("b"), AccountMask::of(AccountFacet::Presence)).unwrap();
        assert_eq!(result.contact().unwrap().accounts.len(), 2);
    }

    #[test]
    fn test_cascade_account_removal() {
        let only_a = persisted(&remote("bob"), 1);

        let mut shared = persisted(&remote("carol"), 2);
        shared.upsert_sub_record(OnlineAccount::new(ContactKey::new("other", "carol")));

        let unrelated = {
            let mut r = remote("dave");
            r.key = ContactKey::new("other", "dave");
            persisted(&r, 3)
        };

        let results = cascade_account_removal(&[only_a, shared, unrelated], &AccountId::new("acc"));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], MergeResult::Delete(LocalId(1)));
        let MergeResult::Update(c) = &results[1] else {
            panic!("expected update");
        };
        assert_eq!(c.id, Some(LocalId(2)));
        assert_eq!(c.accounts.len(), 1);
    }
}
