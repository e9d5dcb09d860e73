//! Change sets: the writes of one flush cycle.
//!
//! The builder tracks the evolving version of every contact touched during a
//! flush, so two keys that resolve to the same contact patch one record and
//! a delete evicts any earlier save of the same contact. The finished
//! [`ChangeSet`] holds each contact at most once, in the save lists or the
//! remove list but never both.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use roster_bridge_core::{ContactKey, ContactMask, LocalId, MergeResult, PersistedContact};

/// The writes of one flush, grouped for commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// The self contact, when it changed.
    pub self_contact: Option<PersistedContact>,
    /// Contacts to save, grouped by their final mask.
    pub saves: BTreeMap<ContactMask, Vec<PersistedContact>>,
    /// Contacts to remove, ascending.
    pub removes: Vec<LocalId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.self_contact.is_none() && self.saves.is_empty() && self.removes.is_empty()
    }

    /// Number of contact saves, excluding the self contact.
    pub fn save_count(&self) -> usize {
        self.saves.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Slot {
    Stored(LocalId),
    /// A contact created in this cycle, by creation order.
    Pending(usize),
}

#[derive(Debug)]
struct Entry {
    contact: PersistedContact,
    mask: ContactMask,
}

/// Where a key stands within the current cycle.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// A contact touched this cycle holds the key.
    Touched(&'a PersistedContact),
    /// The key was stripped or its contact deleted this cycle.
    Detached,
    /// Not touched this cycle; the store is authoritative.
    Untouched,
}

#[derive(Debug, Default)]
pub struct ChangeSetBuilder {
    self_contact: Option<PersistedContact>,
    self_dirty: bool,
    entries: BTreeMap<Slot, Entry>,
    /// `None` marks a key detached during this cycle.
    index: HashMap<ContactKey, Option<Slot>>,
    removes: BTreeSet<LocalId>,
    next_pending: usize,
}

impl ChangeSetBuilder {
    /// Start a cycle from the currently stored self contact.
    pub fn new(self_contact: Option<PersistedContact>) -> Self {
        Self {
            self_contact,
            ..Self::default()
        }
    }

    pub fn self_contact(&self) -> Option<&PersistedContact> {
        self.self_contact.as_ref()
    }

    /// Record the result of an account merge.
    pub fn apply_self(&mut self, result: MergeResult) {
        match result {
            MergeResult::Create(contact) | MergeResult::Update(contact) => {
                self.self_contact = Some(contact);
                self.self_dirty = true;
            }
            // The self contact is never deleted.
            MergeResult::Delete(_) | MergeResult::NoOp => {}
        }
    }

    pub fn lookup(&self, key: &ContactKey) -> Lookup<'_> {
        match self.index.get(key) {
            Some(Some(slot)) => match self.entries.get(slot) {
                Some(entry) => Lookup::Touched(&entry.contact),
                None => Lookup::Untouched,
            },
            Some(None) => Lookup::Detached,
            None => Lookup::Untouched,
        }
    }

    /// The current-cycle version of a contact read from the store.
    ///
    /// Returns `None` if the contact was deleted during this cycle.
    pub fn resolve(&self, contact: PersistedContact) -> Option<PersistedContact> {
        match contact.id {
            Some(id) if self.removes.contains(&id) => None,
            Some(id) => Some(
                self.entries
                    .get(&Slot::Stored(id))
                    .map(|entry| entry.contact.clone())
                    .unwrap_or(contact),
            ),
            None => Some(contact),
        }
    }

    /// Whether the contact with `id` was deleted during this cycle.
    pub fn is_removed(&self, id: LocalId) -> bool {
        self.removes.contains(&id)
    }

    /// Record a merge result.
    ///
    /// `origin` is the contact the merge started from, if any.
    pub fn apply(&mut self, origin: Option<&PersistedContact>, result: MergeResult, mask: ContactMask) {
        match result {
            MergeResult::NoOp => {}
            MergeResult::Create(contact) => {
                let slot = self.next_slot();
                self.put(slot, contact, mask, origin);
            }
            MergeResult::Update(contact) => {
                let slot = contact
                    .id
                    .map(Slot::Stored)
                    .or_else(|| origin.and_then(|o| self.slot_of(o)))
                    .unwrap_or_else(|| self.next_slot());
                self.put(slot, contact, mask, origin);
            }
            MergeResult::Delete(id) => {
                let evicted = self.entries.remove(&Slot::Stored(id));
                let keys = evicted
                    .iter()
                    .map(|e| &e.contact)
                    .chain(origin)
                    .flat_map(|c| c.accounts.iter().map(|a| a.key.clone()))
                    .collect::<Vec<_>>();
                for key in keys {
                    self.index.insert(key, None);
                }
                self.removes.insert(id);
            }
        }
    }

    pub fn build(self) -> ChangeSet {
        let mut saves: BTreeMap<ContactMask, Vec<PersistedContact>> = BTreeMap::new();
        for entry in self.entries.into_values() {
            saves.entry(entry.mask).or_default().push(entry.contact);
        }

        ChangeSet {
            self_contact: if self.self_dirty { self.self_contact } else { None },
            saves,
            removes: self.removes.into_iter().collect(),
        }
    }

    fn next_slot(&mut self) -> Slot {
        let slot = Slot::Pending(self.next_pending);
        self.next_pending += 1;
        slot
    }

    fn slot_of(&self, contact: &PersistedContact) -> Option<Slot> {
        contact.id.map(Slot::Stored).or_else(|| {
            contact
                .accounts
                .iter()
                .find_map(|a| self.index.get(&a.key).copied().flatten())
        })
    }

    fn put(
        &mut self,
        slot: Slot,
        contact: PersistedContact,
        mask: ContactMask,
        origin: Option<&PersistedContact>,
    ) {
        let previous: Vec<ContactKey> = self
            .entries
            .get(&slot)
            .map(|e| &e.contact)
            .into_iter()
            .chain(origin)
            .flat_map(|c| c.accounts.iter().map(|a| a.key.clone()))
            .collect();

        for key in previous {
            if contact.sub_record(&key).is_none() {
                self.index.insert(key, None);
            }
        }
        for record in &contact.accounts {
            self.index.insert(record.key.clone(), Some(slot));
        }

        match self.entries.get_mut(&slot) {
            Some(entry) => {
                entry.contact = contact;
                entry.mask |= mask;
            }
            None => {
                self.entries.insert(slot, Entry { contact, mask });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_bridge_core::{ContactFacet, OnlineAccount};

    fn key(h: &str) -> ContactKey {
        ContactKey::new("acc", h)
    }

    fn stored(id: u64, handles: &[&str]) -> PersistedContact {
        let mut c = PersistedContact::new().with_id(LocalId(id));
        for h in handles {
            c.upsert_sub_record(OnlineAccount::new(key(h)));
        }
        c
    }

    #[test]
    fn test_same_contact_touched_twice_saved_once() {
        let mut builder = ChangeSetBuilder::new(None);
        let original = stored(1, &["bob", "robert"]);

        let mut first = original.clone();
        first.accounts[0].alias = "Bob".into();
        builder.apply(Some(&original), MergeResult::Update(first), ContactMask::of(ContactFacet::Alias));

        let Lookup::Touched(current) = builder.lookup(&key("robert")) else {
            panic!("robert should resolve to the touched contact");
        };
        let current = current.clone();
        let mut second = current.clone();
        second.accounts[1].blocked = true;
        builder.apply(Some(&current), MergeResult::Update(second), ContactMask::of(ContactFacet::Blocked));

        let set = builder.build();
        assert_eq!(set.save_count(), 1);
        let (mask, contacts) = set.saves.iter().next().unwrap();
        assert_eq!(*mask, ContactMask::of(ContactFacet::Alias) | ContactFacet::Blocked);
        assert_eq!(contacts[0].accounts[0].alias, "Bob");
        assert!(contacts[0].accounts[1].blocked);
    }

    #[test]
    fn test_delete_evicts_save() {
        let mut builder = ChangeSetBuilder::new(None);
        let original = stored(4, &["bob"]);

        let mut patched = original.clone();
        patched.accounts[0].alias = "Bob".into();
        builder.apply(Some(&original), MergeResult::Update(patched.clone()), ContactMask::of(ContactFacet::Alias));
        builder.apply(Some(&patched), MergeResult::Delete(LocalId(4)), ContactMask::removed());

        assert!(matches!(builder.lookup(&key("bob")), Lookup::Detached));
        assert!(builder.resolve(original).is_none());

        let set = builder.build();
        assert_eq!(set.save_count(), 0);
        assert_eq!(set.removes, vec![LocalId(4)]);
    }

    #[test]
    fn test_stripped_key_is_detached() {
        let mut builder = ChangeSetBuilder::new(None);
        let original = stored(2, &["bob", "robert"]);
        let mut stripped = original.clone();
        stripped.strip_sub_record(&key("robert"));

        builder.apply(Some(&original), MergeResult::Update(stripped), ContactMask::removed());
        assert!(matches!(builder.lookup(&key("robert")), Lookup::Detached));
        assert!(matches!(builder.lookup(&key("bob")), Lookup::Touched(_)));
        assert!(matches!(builder.lookup(&key("carol")), Lookup::Untouched));
    }

    #[test]
    fn test_creates_grouped_by_mask_in_order() {
        let mut builder = ChangeSetBuilder::new(None);
        let mut a = PersistedContact::new();
        a.upsert_sub_record(OnlineAccount::new(key("a")));
        let mut b = PersistedContact::new();
        b.upsert_sub_record(OnlineAccount::new(key("b")));

        builder.apply(None, MergeResult::Create(a), ContactMask::all_facets());
        builder.apply(None, MergeResult::Create(b), ContactMask::all_facets());
        builder.apply(None, MergeResult::NoOp, ContactMask::of(ContactFacet::Alias));

        let set = builder.build();
        let creates = &set.saves[&ContactMask::all_facets()];
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[0].accounts[0].key, key("a"));
        assert!(set.self_contact.is_none());
    }

    #[test]
    fn test_self_contact_only_when_changed() {
        let me = PersistedContact::new_self().with_id(LocalId(1));
        let builder = ChangeSetBuilder::new(Some(me.clone()));
        assert!(builder.build().is_empty());

        let mut builder = ChangeSetBuilder::new(Some(me.clone()));
        builder.apply_self(MergeResult::Update(me));
        assert!(builder.build().self_contact.is_some());
    }
}
