//! # Roster Bridge Store
//!
//! Storage gateway for roster-bridge. Provides a trait-based interface for
//! contact persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync core only ever talks to the [`ContactStore`] trait. The primary
//! implementation is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`ContactStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use roster_bridge_store::{ContactStore, SqliteStore};
//! use roster_bridge_core::{ContactKey, OnlineAccount, PersistedContact};
//!
//! async fn example() {
//!     let store = SqliteStore::open("contacts.db").unwrap();
//!
//!     let mut bob = PersistedContact::new();
//!     bob.upsert_sub_record(OnlineAccount::new(ContactKey::new("acc", "bob@example.org")));
//!
//!     let ids = store.save_batch(&[bob]).await.unwrap();
//!     let saved = store.get_contact(ids[0]).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Atomic batches**: a failing batch leaves the store untouched
//! - **Unique keys**: each `(account, handle)` lives in exactly one sub-record
//! - **Opaque records**: sub-records are stored as CBOR blobs, indexed by key

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ContactStore;
