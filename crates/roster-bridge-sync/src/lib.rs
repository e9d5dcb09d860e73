//! # Roster Bridge Sync
//!
//! Change coalescing, flush timing and account sync coordination.
//!
//! ## Overview
//!
//! Remote notifications only name the facets that changed. They are
//! coalesced per entity in a [`ChangeQueue`] and flushed after a quiet
//! period chosen by the [`FlushScheduler`]. Each flush merges the current
//! remote snapshots into persisted contacts and commits one [`ChangeSet`].
//!
//! ## Key Properties
//!
//! - **Coalescing**: an entity appears at most once per flush, under the
//!   union of its pending masks
//! - **Partial patches**: only flagged facets are written
//! - **Isolation**: a bad entity is skipped, a store failure drops the batch
//! - **No retry**: lost updates heal on the next event touching the entity
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roster_bridge_sync::{AccountSyncCoordinator, SyncConfig};
//! use roster_bridge_store::MemoryStore;
//! use roster_bridge_core::{ContactMask, ContactKey, RemoteAccount, RemoteContact};
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let mut coordinator = AccountSyncCoordinator::new(store, &SyncConfig::default());
//!
//!     coordinator.create_account(RemoteAccount::new("acc", "jabber")).unwrap();
//!     let bob = RemoteContact::new(ContactKey::new("acc", "bob@example.org"));
//!     coordinator.update_contact(bob, ContactMask::all_facets()).unwrap();
//!
//!     let report = coordinator.commit().await.unwrap();
//!     println!("saved {} contacts", report.saved);
//! }
//! ```

pub mod avatar;
pub mod cache;
pub mod changeset;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod queue;
pub mod scheduler;

pub use avatar::{memory::MemoryFetcher, AvatarFetcher, FetchError, NoFetch};
pub use cache::RemoteCache;
pub use changeset::{ChangeSet, ChangeSetBuilder, Lookup};
pub use config::SyncConfig;
pub use coordinator::{AccountSyncCoordinator, FlushReport};
pub use error::{ErrorCode, Result, SyncError};
pub use events::{AccountEvent, ContactEvent};
pub use queue::{ChangeQueue, PendingChange};
pub use scheduler::{ArmDecision, FlushScheduler, SchedulerState};
