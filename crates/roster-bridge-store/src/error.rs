//! Error types for the store module.

use roster_bridge_core::{ContactKey, LocalId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A save referenced a contact id the store does not hold.
    #[error("contact not found: {0}")]
    NotFound(LocalId),

    /// The batch would leave two sub-records with the same key.
    #[error("duplicate sub-record for {0}")]
    DuplicateSubRecord(ContactKey),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backend cannot be reached (poisoned lock or failed worker).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
