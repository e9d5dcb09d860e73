//! # Roster Bridge Testkit
//!
//! Testing utilities for roster-bridge.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Builders for accounts, contacts and pre-seeded stores
//! - **Generators**: Proptest strategies for property-based testing
//! - **Recording store**: A store wrapper that records every batch and can
//!   inject failures
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use roster_bridge_core::merge_contact;
//! use roster_bridge_testkit::generators::{contact_mask, remote_contact};
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_deterministic(remote in remote_contact("acc"), mask in contact_mask()) {
//!         let a = merge_contact(None, &remote, mask).unwrap();
//!         let b = merge_contact(None, &remote, mask).unwrap();
//!         prop_assert_eq!(a, b);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust
//! use roster_bridge_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let bob = fixture.contact("bob@example.org");
//! assert_eq!(bob.key.account, fixture.account.id);
//! ```

pub mod fixtures;
pub mod generators;
pub mod recording;

pub use fixtures::{multi_account_fixtures, TestFixture};
pub use recording::{RecordedBatch, RecordingStore};
