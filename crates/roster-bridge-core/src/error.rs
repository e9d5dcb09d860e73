//! Error types for roster-bridge core.

use thiserror::Error;

use crate::types::ContactKey;

/// Errors produced by the merge engine.
///
/// These are always scoped to a single entity; the caller skips the entity
/// and carries on with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The remote snapshot has an empty or otherwise unusable identity.
    #[error("malformed remote data: {0}")]
    MalformedRemoteData(String),

    /// A patch targeted a sub-record the contact does not hold.
    #[error("contact has no sub-record for {0}")]
    MissingSubRecord(ContactKey),
}

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
