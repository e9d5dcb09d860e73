//! The account sync coordinator.
//!
//! Applies inbound account and contact events to the change queues and the
//! remote snapshot cache, and commits one [`ChangeSet`] per flush. The
//! coordinator is owned by a single task; nothing in here is shared.
//!
//! ## Flush
//!
//! 1. Drain both queues. Later events land in the next cycle.
//! 2. Merge accounts into the self contact. A removed account cascades to
//!    every contact linked to it; a re-add in the same window, with its
//!    contact changes, is requeued for the next cycle.
//! 3. Merge contacts against the current snapshot, in key order. Entity
//!    errors are logged and skipped, as are changes to contacts of a removed
//!    account and roster entries matching an own handle.
//! 4. Commit: self contact, contact saves per mask, then removals. The first
//!    store failure aborts the rest and the change set is dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use roster_bridge_core::{
    cascade_account_removal, diff_roster, known_keys, merge_account, merge_contact,
    strip_self_account, AccountFacet, AccountId, AccountMask, AvatarRequest, ContactFacet,
    ContactHandle, ContactKey, ContactMask, LocalId, MergeResult, PersistedContact, Presence,
    RemoteAccount, RemoteContact,
};
use roster_bridge_store::ContactStore;

use crate::cache::RemoteCache;
use crate::changeset::{ChangeSet, ChangeSetBuilder, Lookup};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{AccountEvent, ContactEvent};
use crate::queue::{ChangeQueue, PendingChange};
use crate::scheduler::{ArmDecision, FlushScheduler};

/// Outcome of one flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Contacts saved, including the self contact.
    pub saved: usize,
    /// Contacts removed.
    pub removed: usize,
    /// Entities skipped because of entity-level errors.
    pub skipped: usize,
    /// Avatar fetches requested by the merge.
    pub avatar_requests: Vec<AvatarRequest>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.saved == 0 && self.removed == 0 && self.skipped == 0 && self.avatar_requests.is_empty()
    }
}

pub struct AccountSyncCoordinator<S: ContactStore> {
    store: Arc<S>,
    accounts: ChangeQueue<AccountId, AccountFacet>,
    contacts: ChangeQueue<ContactKey, ContactFacet>,
    scheduler: FlushScheduler,
    /// Set when the max-wait bound was hit on enqueue.
    flush_requested: bool,
    cache: RemoteCache,
    /// Explicit link requests: key -> local contact to merge into.
    link_targets: HashMap<ContactKey, LocalId>,
}

impl<S: ContactStore> AccountSyncCoordinator<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig) -> Self {
        Self {
            store,
            accounts: ChangeQueue::new(),
            contacts: ChangeQueue::new(),
            scheduler: FlushScheduler::from_config(config),
            flush_requested: false,
            cache: RemoteCache::new(),
            link_targets: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &RemoteCache {
        &self.cache
    }

    /// When the next flush is due, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// Whether a flush should run at `now`.
    pub fn flush_due(&self, now: Instant) -> bool {
        self.flush_requested || self.scheduler.is_due(now)
    }

    pub fn has_pending(&self) -> bool {
        !self.accounts.is_empty() || !self.contacts.is_empty()
    }

    /// Pending mask of a contact, if any.
    pub fn pending_contact(&self, key: &ContactKey) -> Option<ContactMask> {
        self.contacts.get(key)
    }

    /// Pending mask of an account, if any.
    pub fn pending_account(&self, id: &AccountId) -> Option<AccountMask> {
        self.accounts.get(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event dispatch
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn handle_account_event(&mut self, event: AccountEvent) -> Result<()> {
        match event {
            AccountEvent::Snapshot(accounts) => self.sync_accounts(&accounts).await,
            AccountEvent::Added(account) => self.create_account(account),
            AccountEvent::Updated(account, mask) => self.update_account(account, mask),
            AccountEvent::Removed(id) => {
                self.remove_account(&id);
                Ok(())
            }
        }
    }

    pub async fn handle_contact_event(&mut self, event: ContactEvent) -> Result<()> {
        match event {
            ContactEvent::Added(contact) => {
                self.update_contact(contact, ContactMask::all_facets())
            }
            ContactEvent::Updated(contact, mask) => self.update_contact(contact, mask),
            ContactEvent::Removed(key) => self.remove_contact(&key),
            ContactEvent::RosterSnapshot { account, contacts } => {
                self.sync_account_contacts(&account, contacts).await
            }
            ContactEvent::RosterDelta {
                account,
                added,
                removed,
            } => self.sync_account_contacts_delta(&account, added, &removed),
            ContactEvent::AvatarFetched { key, token, data } => {
                self.avatar_fetched(&key, &token, data);
                Ok(())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// Reconcile the full account list.
    ///
    /// Known accounts are refreshed, new ones created. Accounts with a cached
    /// snapshot or a stored self sub-record that are missing from the list
    /// are removed.
    pub async fn sync_accounts(&mut self, accounts: &[RemoteAccount]) -> Result<()> {
        for account in accounts {
            if self.cache.has_account(&account.id) {
                self.update_account(account.clone(), AccountMask::all_facets())?;
            } else {
                self.create_account(account.clone())?;
            }
        }

        let mut stale: Vec<AccountId> = self
            .cache
            .account_ids()
            .filter(|id| !accounts.iter().any(|a| &a.id == *id))
            .cloned()
            .collect();

        if let Some(me) = self.store.self_contact().await? {
            for record in &me.accounts {
                let id = record.account();
                if !accounts.iter().any(|a| &a.id == id) && !stale.contains(id) {
                    stale.push(id.clone());
                }
            }
        }

        for id in stale {
            debug!(account = %id, "account no longer reported, removing");
            self.remove_account(&id);
        }
        Ok(())
    }

    pub fn create_account(&mut self, account: RemoteAccount) -> Result<()> {
        if account.id.is_empty() {
            return Err(SyncError::MalformedRemoteData("account with empty id".into()));
        }
        debug!(account = %account.id, protocol = %account.protocol, "account added");

        let id = account.id.clone();
        self.cache.upsert_account(account);
        self.enqueue_account(id, AccountMask::all_facets());
        Ok(())
    }

    /// Apply an account change.
    ///
    /// An account going offline or disabled resets the presence of all its
    /// contacts to unknown.
    pub fn update_account(&mut self, account: RemoteAccount, mask: AccountMask) -> Result<()> {
        if account.id.is_empty() {
            return Err(SyncError::MalformedRemoteData("account with empty id".into()));
        }
        if !self.cache.has_account(&account.id) {
            debug!(account = %account.id, "update for unseen account, treating as add");
            return self.create_account(account);
        }

        let connectivity = mask.contains(AccountFacet::Online) || mask.contains(AccountFacet::Enabled);
        if connectivity && (!account.online || !account.enabled) {
            self.reset_presence(&account.id);
        }

        let id = account.id.clone();
        self.cache.upsert_account(account);
        self.enqueue_account(id, mask);
        Ok(())
    }

    fn reset_presence(&mut self, account: &AccountId) {
        let keys = self.cache.contact_keys(account);
        debug!(account = %account, contacts = keys.len(), "account offline, resetting presence");

        for key in keys {
            let reset = match self.cache.contact_mut(&key) {
                Some(contact) if contact.presence != Presence::unknown() => {
                    contact.presence = Presence::unknown();
                    true
                }
                _ => false,
            };
            if reset {
                self.enqueue_contact(key, ContactMask::of(ContactFacet::Presence));
            }
        }
    }

    /// Remove an account.
    ///
    /// Pending contact changes of the account are cancelled; the flush strips
    /// the self sub-record and cascades to linked contacts.
    pub fn remove_account(&mut self, id: &AccountId) {
        let cancelled = self.contacts.retain(|key| &key.account != id);
        self.link_targets.retain(|key, _| &key.account != id);
        self.cache.remove_account(id);
        info!(account = %id, cancelled, "account removed");

        self.enqueue_account(id.clone(), AccountMask::removed());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contacts
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a contact change: the hot path for presence churn.
    pub fn update_contact(&mut self, contact: RemoteContact, mask: ContactMask) -> Result<()> {
        self.require_known(&contact.key.account)?;
        let key = contact.key.clone();
        self.cache.upsert_contact(contact);
        self.enqueue_contact(key, mask);
        Ok(())
    }

    pub fn remove_contact(&mut self, key: &ContactKey) -> Result<()> {
        self.require_known(&key.account)?;
        self.forget_contact(key);
        self.enqueue_contact(key.clone(), ContactMask::removed());
        Ok(())
    }

    /// Full reconciliation of one account's roster.
    pub async fn sync_account_contacts(
        &mut self,
        account: &AccountId,
        roster: Vec<RemoteContact>,
    ) -> Result<()> {
        self.require_known(account)?;

        let roster: Vec<RemoteContact> = roster
            .into_iter()
            .filter(|contact| {
                let own = &contact.key.account == account;
                if !own {
                    warn!(account = %account, key = %contact.key, "roster entry for another account");
                }
                own
            })
            .collect();

        let persisted = known_keys(&self.store.contacts_for_account(account).await?, account);
        let diff = diff_roster(persisted.iter(), &roster);

        for key in &diff.removed {
            self.forget_contact(key);
            self.enqueue_contact(key.clone(), ContactMask::removed());
        }

        // Not persisted and not in the roster: drop without a write.
        let in_roster: HashSet<&ContactKey> = roster.iter().map(|c| &c.key).collect();
        let unsaved: Vec<ContactKey> = self
            .contacts
            .keys()
            .chain(self.link_targets.keys())
            .filter(|k| &k.account == account && !in_roster.contains(k) && !persisted.contains(*k))
            .cloned()
            .collect();
        for key in &unsaved {
            self.forget_contact(key);
        }
        for key in self.cache.contact_keys(account) {
            if !in_roster.contains(&key) {
                self.cache.remove_contact(&key);
            }
        }

        info!(
            account = %account,
            added = diff.added.len(),
            removed = diff.removed.len(),
            retained = diff.retained.len(),
            "roster reconciled"
        );

        for contact in roster {
            let key = contact.key.clone();
            self.cache.upsert_contact(contact);
            self.enqueue_contact(key, ContactMask::all_facets());
        }
        Ok(())
    }

    /// Incremental roster change. Removed handles replace any pending change
    /// with a removal.
    pub fn sync_account_contacts_delta(
        &mut self,
        account: &AccountId,
        added: Vec<RemoteContact>,
        removed: &[ContactHandle],
    ) -> Result<()> {
        self.require_known(account)?;

        for contact in added {
            if &contact.key.account != account {
                warn!(account = %account, key = %contact.key, "roster delta entry for another account");
                continue;
            }
            let key = contact.key.clone();
            self.cache.upsert_contact(contact);
            self.enqueue_contact(key, ContactMask::all_facets());
        }

        for handle in removed {
            let key = ContactKey {
                account: account.clone(),
                handle: handle.clone(),
            };
            self.forget_contact(&key);
            self.enqueue_contact(key, ContactMask::removed());
        }
        Ok(())
    }

    /// Explicit request to link remote handles to a local contact.
    ///
    /// With `local_id == None` every handle becomes its own new contact.
    pub fn create_account_contacts(
        &mut self,
        account: &AccountId,
        handles: &[ContactHandle],
        local_id: Option<LocalId>,
    ) -> Result<()> {
        if !self.cache.has_account(account) {
            return Err(SyncError::UnknownAccount(account.clone()));
        }
        if let Some(bad) = handles.iter().find(|h| h.is_empty()) {
            return Err(SyncError::MalformedRemoteData(format!(
                "empty handle {:?} for account {}",
                bad.as_str(),
                account
            )));
        }

        for handle in handles {
            let key = ContactKey {
                account: account.clone(),
                handle: handle.clone(),
            };
            if self.cache.contact(&key).is_none() {
                self.cache.upsert_contact(RemoteContact::new(key.clone()));
            }
            if let Some(id) = local_id {
                self.link_targets.insert(key.clone(), id);
            }
            self.enqueue_contact(key, ContactMask::all_facets());
        }

        debug!(account = %account, count = handles.len(), local_id = ?local_id, "link requested");
        Ok(())
    }

    /// Explicit request to unlink remote handles.
    pub fn remove_account_contacts(
        &mut self,
        account: &AccountId,
        handles: &[ContactHandle],
    ) -> Result<()> {
        if !self.cache.has_account(account) {
            return Err(SyncError::UnknownAccount(account.clone()));
        }

        for handle in handles {
            let key = ContactKey {
                account: account.clone(),
                handle: handle.clone(),
            };
            self.forget_contact(&key);
            self.enqueue_contact(key, ContactMask::removed());
        }
        Ok(())
    }

    /// Completion of an avatar fetch. Stale tokens are ignored.
    pub fn avatar_fetched(&mut self, key: &ContactKey, token: &str, data: Bytes) {
        if self.cache.set_avatar_data(key, token, data) {
            self.enqueue_contact(key.clone(), ContactMask::of(ContactFacet::Avatar));
        } else {
            debug!(key = %key, token, "discarding stale avatar");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Flush
    // ─────────────────────────────────────────────────────────────────────────

    /// Drain the queues and commit the resulting change set.
    ///
    /// On a store failure the change set is dropped and its entities are not
    /// re-enqueued.
    pub async fn commit(&mut self) -> Result<FlushReport> {
        self.scheduler.begin_flush();
        self.flush_requested = false;

        let accounts = self.accounts.drain();
        let contacts = self.contacts.drain();
        debug!(accounts = accounts.len(), contacts = contacts.len(), "flush started");

        let result = self.flush(accounts, contacts).await;

        let pending = self.has_pending();
        self.scheduler.finish_flush(Instant::now(), pending);
        result
    }

    async fn flush(
        &mut self,
        accounts: PendingChange<AccountId, AccountFacet>,
        contacts: PendingChange<ContactKey, ContactFacet>,
    ) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        if accounts.is_empty() && contacts.is_empty() {
            return Ok(report);
        }

        let mut builder = ChangeSetBuilder::new(self.store.self_contact().await?);

        let accounts: BTreeMap<_, _> = accounts.into_iter().collect();
        let removed: HashSet<AccountId> = accounts
            .iter()
            .filter(|(_, mask)| mask.is_removed())
            .map(|(id, _)| id.clone())
            .collect();
        for (id, mask) in accounts {
            self.merge_account_change(&mut builder, &id, mask, &mut report)
                .await?;
        }

        let contacts: BTreeMap<_, _> = contacts.into_iter().collect();
        let mut readded = Vec::new();
        for (key, mask) in contacts {
            let target = self.link_targets.remove(&key);
            // The cascade already settled every contact of a removed account.
            if removed.contains(&key.account) {
                debug!(key = %key, "account removed this cycle, deferring contact change");
                if self.cache.contact(&key).is_some() {
                    readded.push(key);
                }
                continue;
            }
            self.merge_contact_change(&mut builder, &key, mask, target, &mut report)
                .await?;
        }

        let changeset = builder.build();
        self.apply(changeset, &mut report).await?;

        // A re-add in the same window takes effect next cycle.
        for id in removed {
            if self.cache.has_account(&id) {
                debug!(account = %id, "account re-added after removal, requeueing");
                self.enqueue_account(id, AccountMask::all_facets());
            }
        }
        for key in readded {
            self.enqueue_contact(key, ContactMask::all_facets());
        }
        Ok(report)
    }

    async fn merge_account_change(
        &self,
        builder: &mut ChangeSetBuilder,
        id: &AccountId,
        mask: AccountMask,
        report: &mut FlushReport,
    ) -> Result<()> {
        if mask.is_removed() {
            let stripped = strip_self_account(builder.self_contact(), id);
            builder.apply_self(stripped);

            for stored in self.store.contacts_for_account(id).await? {
                if stored.is_self {
                    continue;
                }
                let Some(current) = builder.resolve(stored) else {
                    continue;
                };
                for result in cascade_account_removal(std::slice::from_ref(&current), id) {
                    builder.apply(Some(&current), result, ContactMask::removed());
                }
            }
            return Ok(());
        }

        let Some(account) = self.cache.account(id) else {
            warn!(account = %id, "no snapshot for pending account change");
            report.skipped += 1;
            return Ok(());
        };

        let result = match merge_account(builder.self_contact(), account, mask) {
            Ok(result) => result,
            Err(e) => {
                warn!(account = %id, error = %e, "skipping account");
                report.skipped += 1;
                return Ok(());
            }
        };

        if let Some(key) = self.taken_self_key(builder, id, &result).await? {
            warn!(account = %id, key = %key, "own handle held by another contact, skipping account");
            report.skipped += 1;
            return Ok(());
        }
        builder.apply_self(result);
        Ok(())
    }

    /// The new self key of `id` in `result`, if another contact already holds it.
    async fn taken_self_key(
        &self,
        builder: &ChangeSetBuilder,
        id: &AccountId,
        result: &MergeResult,
    ) -> Result<Option<ContactKey>> {
        let (MergeResult::Create(merged) | MergeResult::Update(merged)) = result else {
            return Ok(None);
        };
        let Some(key) = merged.sub_record_for_account(id).map(|r| &r.key) else {
            return Ok(None);
        };
        let previous = builder
            .self_contact()
            .and_then(|me| me.sub_record_for_account(id))
            .map(|r| &r.key);
        if previous == Some(key) || key.handle.is_empty() {
            return Ok(None);
        }

        // The self contact is saved first, so a holder stripped or deleted
        // later in this cycle still collides.
        if let Lookup::Touched(contact) = builder.lookup(key) {
            if !contact.is_self {
                return Ok(Some(key.clone()));
            }
        }
        let stored = self.store.find_by_key(key).await?;
        Ok(stored.filter(|c| !c.is_self).map(|_| key.clone()))
    }

    async fn merge_contact_change(
        &self,
        builder: &mut ChangeSetBuilder,
        key: &ContactKey,
        mask: ContactMask,
        target: Option<LocalId>,
        report: &mut FlushReport,
    ) -> Result<()> {
        let removal = mask.is_removed();

        if !removal && !self.cache.has_account(&key.account) {
            let conflict = SyncError::MergeConflict(format!("{} references an unknown account", key));
            warn!(key = %key, error = %conflict, "skipping contact");
            report.skipped += 1;
            return Ok(());
        }

        let snapshot = match self.cache.contact(key) {
            Some(contact) => contact.clone(),
            None if removal => RemoteContact::new(key.clone()),
            None => {
                warn!(key = %key, "no snapshot for pending contact change");
                report.skipped += 1;
                return Ok(());
            }
        };

        // The self contact is not in the builder index and may not be stored yet.
        if builder.self_contact().and_then(|me| me.sub_record(key)).is_some() {
            warn!(key = %key, "roster entry matches an own handle, skipping");
            report.skipped += 1;
            return Ok(());
        }

        let existing = match builder.lookup(key) {
            Lookup::Touched(contact) => Some(contact.clone()),
            Lookup::Detached if removal => None,
            Lookup::Detached => {
                // Recreating the key would collide with the pending delete.
                debug!(key = %key, "contact deleted this cycle, dropping change");
                return Ok(());
            }
            Lookup::Untouched => match self.store.find_by_key(key).await? {
                Some(stored) => builder.resolve(stored),
                None => self.link_target(builder, key, target).await?,
            },
        };

        if existing.as_ref().map(|c| c.is_self).unwrap_or(false) {
            warn!(key = %key, "roster entry matches an own handle, skipping");
            report.skipped += 1;
            return Ok(());
        }

        match merge_contact(existing.as_ref(), &snapshot, mask) {
            Ok(outcome) => {
                if let Some(request) = outcome.avatar_request {
                    report.avatar_requests.push(request);
                }
                builder.apply(existing.as_ref(), outcome.result, mask);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "skipping contact");
                report.skipped += 1;
            }
        }
        Ok(())
    }

    /// Resolve an explicit link target for a key with no stored sub-record.
    async fn link_target(
        &self,
        builder: &ChangeSetBuilder,
        key: &ContactKey,
        target: Option<LocalId>,
    ) -> Result<Option<PersistedContact>> {
        let Some(id) = target else {
            return Ok(None);
        };
        if builder.is_removed(id) {
            return Ok(None);
        }

        match self.store.get_contact(id).await? {
            Some(stored) => Ok(builder.resolve(stored)),
            None => {
                warn!(key = %key, local_id = %id, "link target does not exist, creating a new contact");
                Ok(None)
            }
        }
    }

    async fn apply(&self, changeset: ChangeSet, report: &mut FlushReport) -> Result<()> {
        if changeset.is_empty() {
            debug!(skipped = report.skipped, "nothing to commit");
            return Ok(());
        }

        if let Some(me) = changeset.self_contact {
            self.store.save_batch(std::slice::from_ref(&me)).await?;
            report.saved += 1;
        }

        for (mask, contacts) in &changeset.saves {
            self.store.save_batch(contacts).await?;
            debug!(mask = ?mask, count = contacts.len(), "saved batch");
            report.saved += contacts.len();
        }

        if !changeset.removes.is_empty() {
            self.store.remove_batch(&changeset.removes).await?;
            report.removed = changeset.removes.len();
        }

        info!(
            saved = report.saved,
            removed = report.removed,
            skipped = report.skipped,
            "committed change set"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn require_known(&self, account: &AccountId) -> Result<()> {
        if self.cache.has_account(account) {
            Ok(())
        } else {
            Err(SyncError::MergeConflict(format!(
                "event for unknown account {}",
                account
            )))
        }
    }

    /// Drop every trace of a contact from the queue, cache and link targets.
    fn forget_contact(&mut self, key: &ContactKey) {
        self.contacts.cancel(key);
        self.cache.remove_contact(key);
        self.link_targets.remove(key);
    }

    fn enqueue_account(&mut self, id: AccountId, mask: AccountMask) {
        if self.accounts.enqueue(id, mask) {
            self.arm();
        }
    }

    fn enqueue_contact(&mut self, key: ContactKey, mask: ContactMask) {
        if self.contacts.enqueue(key, mask) {
            self.arm();
        }
    }

    fn arm(&mut self) {
        if self.scheduler.on_enqueue(Instant::now()) == ArmDecision::FlushNow {
            self.flush_requested = true;
        }
    }
}
