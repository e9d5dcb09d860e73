//! # Roster Bridge
//!
//! Keeps a local contact database in step with the accounts and contacts
//! reported by a remote presence service.
//!
//! ## Overview
//!
//! Remote notifications are sent to a [`RosterBridgeHandle`]; a single owner
//! task coalesces them, waits for a quiet period and commits the resulting
//! writes as one batch. Failed commits are reported on an error signal
//! channel and are not retried.
//!
//! - **Accounts** become sub-records of the single self contact
//! - **Contacts** become sub-records of local contacts, keyed by
//!   `(account, handle)`
//! - **Avatars** are fetched out of band and patched in when they arrive
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roster_bridge::{RosterBridge, ServiceConfig};
//! use roster_bridge::core::{ContactKey, ContactMask, RemoteAccount, RemoteContact};
//! use roster_bridge::sync::NoFetch;
//!
//! async fn example() {
//!     let config = ServiceConfig::from_json_str(r#"{ "database_path": "contacts.db" }"#).unwrap();
//!     let (bridge, task) = RosterBridge::open(config, Arc::new(NoFetch)).await.unwrap();
//!
//!     bridge.account_added(RemoteAccount::new("acc", "jabber")).await.unwrap();
//!     let bob = RemoteContact::new(ContactKey::new("acc", "bob@example.org"));
//!     bridge.contact_updated(bob, ContactMask::all_facets()).await.unwrap();
//!
//!     bridge.shutdown().await.unwrap();
//!     task.await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `roster_bridge::core` - Identities, facets, merge engine
//! - `roster_bridge::store` - Storage gateway and SQLite
//! - `roster_bridge::sync` - Queues, scheduler and coordinator

pub mod error;
pub mod service;

// Re-export component crates
pub use roster_bridge_core as core;
pub use roster_bridge_store as store;
pub use roster_bridge_sync as sync;

pub use error::{Result, ServiceError};
pub use service::{ErrorSignal, RosterBridge, RosterBridgeHandle, ServiceConfig};

pub use roster_bridge_sync::{AccountEvent, ContactEvent, FlushReport, SyncConfig};
