//! Facets and change masks.
//!
//! A facet is one named attribute of a remote account or contact. A change
//! notification names the facets that changed, never their values; the merge
//! engine always reads the current remote snapshot.
//!
//! Accounts and contacts have different facet sets but share one coalescing
//! algorithm, so [`ChangeMask`] is generic over a [`Facet`] tag type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};

/// A tag naming one facet of a remote entity.
pub trait Facet: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every tag of this facet set, in bit order.
    const ALL: &'static [Self];

    /// The terminal tag: once present, the entity is being removed.
    const REMOVED: Self;

    /// Bit position of this tag (must be < 32 and unique).
    fn bit(self) -> u32;
}

/// Facets of a remote contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactFacet {
    Alias,
    Presence,
    Capabilities,
    Avatar,
    /// Subscribe/publish authorization state.
    Subscription,
    Blocked,
    /// Roster membership flags (visible in the stored roster).
    Membership,
    Removed,
}

impl Facet for ContactFacet {
    const ALL: &'static [Self] = &[
        ContactFacet::Alias,
        ContactFacet::Presence,
        ContactFacet::Capabilities,
        ContactFacet::Avatar,
        ContactFacet::Subscription,
        ContactFacet::Blocked,
        ContactFacet::Membership,
        ContactFacet::Removed,
    ];

    const REMOVED: Self = ContactFacet::Removed;

    fn bit(self) -> u32 {
        self as u32
    }
}

/// Facets of a remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountFacet {
    Enabled,
    /// Connection status.
    Online,
    DisplayName,
    Nickname,
    Avatar,
    /// The account's own presence.
    Presence,
    Removed,
}

impl Facet for AccountFacet {
    const ALL: &'static [Self] = &[
        AccountFacet::Enabled,
        AccountFacet::Online,
        AccountFacet::DisplayName,
        AccountFacet::Nickname,
        AccountFacet::Avatar,
        AccountFacet::Presence,
        AccountFacet::Removed,
    ];

    const REMOVED: Self = AccountFacet::Removed;

    fn bit(self) -> u32 {
        self as u32
    }
}

/// A set of facet tags. Masks combine by set union.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct ChangeMask<F: Facet> {
    bits: u32,
    #[serde(skip)]
    _facet: PhantomData<F>,
}

/// Mask over contact facets.
pub type ContactMask = ChangeMask<ContactFacet>;

/// Mask over account facets.
pub type AccountMask = ChangeMask<AccountFacet>;

impl<F: Facet> ChangeMask<F> {
    const fn from_bits(bits: u32) -> Self {
        Self {
            bits,
            _facet: PhantomData,
        }
    }

    /// The empty mask.
    pub const fn empty() -> Self {
        Self::from_bits(0)
    }

    /// A mask naming a single facet.
    pub fn of(facet: F) -> Self {
        Self::from_bits(1 << facet.bit())
    }

    /// Every facet except the terminal `Removed` tag.
    ///
    /// Used for creates and full reconciliation.
    pub fn all_facets() -> Self {
        F::ALL
            .iter()
            .copied()
            .filter(|f| *f != F::REMOVED)
            .collect()
    }

    /// The terminal removal mask.
    pub fn removed() -> Self {
        Self::of(F::REMOVED)
    }

    /// Builder-style insert.
    pub fn with(mut self, facet: F) -> Self {
        self.insert(facet);
        self
    }

    pub fn insert(&mut self, facet: F) {
        self.bits |= 1 << facet.bit();
    }

    pub fn remove(&mut self, facet: F) {
        self.bits &= !(1 << facet.bit());
    }

    pub fn contains(&self, facet: F) -> bool {
        self.bits & (1 << facet.bit()) != 0
    }

    /// Whether the terminal tag is present. It dominates all other tags.
    pub fn is_removed(&self) -> bool {
        self.contains(F::REMOVED)
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Set union.
    pub fn union(self, other: Self) -> Self {
        Self::from_bits(self.bits | other.bits)
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Iterate over the tags present, in bit order.
    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(move |f| self.contains(*f))
    }

    /// Raw bit representation.
    pub fn bits(&self) -> u32 {
        self.bits
    }
}

// Manual impls: deriving would put bounds on F that PhantomData does not need.

impl<F: Facet> Clone for ChangeMask<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: Facet> Copy for ChangeMask<F> {}

impl<F: Facet> PartialEq for ChangeMask<F> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<F: Facet> Eq for ChangeMask<F> {}

impl<F: Facet> PartialOrd for ChangeMask<F> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: Facet> Ord for ChangeMask<F> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bits.cmp(&other.bits)
    }
}

impl<F: Facet> Hash for ChangeMask<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<F: Facet> Default for ChangeMask<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Facet> fmt::Debug for ChangeMask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<F: Facet> BitOr for ChangeMask<F> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl<F: Facet> BitOr<F> for ChangeMask<F> {
    type Output = Self;

    fn bitor(self, rhs: F) -> Self {
        self.with(rhs)
    }
}

impl<F: Facet> BitOrAssign for ChangeMask<F> {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl<F: Facet> From<F> for ChangeMask<F> {
    fn from(facet: F) -> Self {
        Self::of(facet)
    }
}

impl<F: Facet> FromIterator<F> for ChangeMask<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for facet in iter {
            mask.insert(facet);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_is_set_union() {
        let a = ContactMask::of(ContactFacet::Presence);
        let b = ContactMask::of(ContactFacet::Alias);
        let merged = a | b;
        assert!(merged.contains(ContactFacet::Presence));
        assert!(merged.contains(ContactFacet::Alias));
        assert_eq!(merged.len(), 2);
        assert_eq!(a | a, a);
    }

    #[test]
    fn test_all_facets_excludes_removed() {
        let all = ContactMask::all_facets();
        assert!(!all.is_removed());
        assert_eq!(all.len(), ContactFacet::ALL.len() - 1);

        let all = AccountMask::all_facets();
        assert!(!all.contains(AccountFacet::Removed));
        assert!(all.contains(AccountFacet::Enabled));
    }

    #[test]
    fn test_removed_survives_union() {
        let mask = ContactMask::removed() | ContactFacet::Alias;
        assert!(mask.is_removed());
        assert!(mask.contains(ContactFacet::Alias));
    }

    #[test]
    fn test_iter_in_bit_order() {
        let mask: ContactMask = [ContactFacet::Blocked, ContactFacet::Alias]
            .into_iter()
            .collect();
        let tags: Vec<_> = mask.iter().collect();
        assert_eq!(tags, vec![ContactFacet::Alias, ContactFacet::Blocked]);
    }

    #[test]
    fn test_debug_lists_tags() {
        let mask = ContactMask::of(ContactFacet::Avatar);
        assert_eq!(format!("{:?}", mask), "{Avatar}");
    }

    #[test]
    fn test_serde_is_transparent() {
        let mask = AccountMask::of(AccountFacet::Online) | AccountFacet::Nickname;
        let json = serde_json::to_string(&mask).unwrap();
        assert_eq!(json, mask.bits().to_string());
        let back: AccountMask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);
    }
}
