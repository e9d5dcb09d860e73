//! Error types for the roster bridge service.

use roster_bridge_store::StoreError;
use roster_bridge_sync::{ErrorCode, SyncError};
use thiserror::Error;

/// Errors that can occur while running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The owner loop has stopped.
    #[error("roster bridge stopped")]
    Stopped,
}

impl ServiceError {
    /// The integer code reported by the error signal.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Sync(e) => e.code(),
            ServiceError::Store(
                StoreError::Database(_) | StoreError::Io(_) | StoreError::Unavailable(_),
            ) => ErrorCode::StoreUnavailable,
            ServiceError::Store(_) => ErrorCode::StoreRejected,
            ServiceError::Stopped => ErrorCode::ChannelClosed,
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
