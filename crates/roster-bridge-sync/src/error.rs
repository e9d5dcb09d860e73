//! Error types for the sync module.

use roster_bridge_core::{AccountId, MergeError};
use roster_bridge_store::StoreError;
use thiserror::Error;

/// Integer codes carried by the outbound error signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Storage could not be reached. Transient.
    StoreUnavailable = 1,
    /// Storage rejected the batch.
    StoreRejected = 2,
    /// Remote data references an account with no record.
    MergeConflict = 3,
    /// Remote data with an empty or invalid identity.
    MalformedRemoteData = 4,
    /// Explicit request for an account that is not known.
    UnknownAccount = 5,
    /// Bad configuration or unusable store at startup.
    Configuration = 6,
    /// The owner loop is gone.
    ChannelClosed = 7,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote data references an account the coordinator has no record of.
    #[error("merge conflict: {0}")]
    MergeConflict(String),

    /// An entity with an empty or invalid identity.
    #[error("malformed remote data: {0}")]
    MalformedRemoteData(String),

    /// An explicit request named an account that is not known.
    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Invalid configuration, or a store unusable at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The owner loop has stopped.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// The code reported on the error signal.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Store(
                StoreError::Database(_) | StoreError::Io(_) | StoreError::Unavailable(_),
            ) => ErrorCode::StoreUnavailable,
            SyncError::Store(_) => ErrorCode::StoreRejected,
            SyncError::MergeConflict(_) => ErrorCode::MergeConflict,
            SyncError::MalformedRemoteData(_) => ErrorCode::MalformedRemoteData,
            SyncError::UnknownAccount(_) => ErrorCode::UnknownAccount,
            SyncError::Configuration(_) => ErrorCode::Configuration,
            SyncError::ChannelClosed => ErrorCode::ChannelClosed,
        }
    }

    /// Whether a later event may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        self.code() == ErrorCode::StoreUnavailable
    }
}

impl From<MergeError> for SyncError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::MalformedRemoteData(msg) => SyncError::MalformedRemoteData(msg),
            MergeError::MissingSubRecord(key) => {
                SyncError::MergeConflict(format!("no sub-record for {}", key))
            }
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use roster_bridge_core::{ContactKey, LocalId};

    #[test]
    fn test_store_errors_map_to_codes() {
        let transient = SyncError::from(StoreError::Unavailable("down".into()));
        assert_eq!(transient.code(), ErrorCode::StoreUnavailable);
        assert!(transient.is_transient());

        let rejected = SyncError::from(StoreError::NotFound(LocalId(3)));
        assert_eq!(rejected.code().as_u16(), 2);
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_merge_errors_convert() {
        let err = SyncError::from(MergeError::MalformedRemoteData("empty handle".into()));
        assert_eq!(err.code(), ErrorCode::MalformedRemoteData);

        let err = SyncError::from(MergeError::MissingSubRecord(ContactKey::new("acc", "bob")));
        assert!(matches!(err, SyncError::MergeConflict(_)));
    }
}
