//! Out-of-band avatar fetching.
//!
//! Fetches never block a flush. The owner loop spawns one task per request
//! and feeds the result back as an avatar-fetched event.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors returned by an [`AvatarFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("avatar not found: {0}")]
    NotFound(String),

    #[error("avatar fetch failed: {0}")]
    Failed(String),
}

/// Fetches avatar images by URL.
#[async_trait]
pub trait AvatarFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// A fetcher that never succeeds, for deployments without avatar fetching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFetch;

#[async_trait]
impl AvatarFetcher for NoFetch {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        Err(FetchError::Failed(format!("fetching disabled for {}", url)))
    }
}

/// A simple in-memory fetcher for testing.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// Serves images registered with [`MemoryFetcher::insert`].
    #[derive(Default)]
    pub struct MemoryFetcher {
        images: RwLock<HashMap<String, Bytes>>,
    }

    impl MemoryFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
            self.images.write().await.insert(url.into(), data.into());
        }
    }

    #[async_trait]
    impl AvatarFetcher for MemoryFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
            self.images
                .read()
                .await
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(url.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_memory_fetcher() {
            let fetcher = MemoryFetcher::new();
            fetcher.insert("https://example.org/a.png", &b"png"[..]).await;

            let data = fetcher.fetch("https://example.org/a.png").await.unwrap();
            assert_eq!(&data[..], b"png");
            assert!(matches!(
                fetcher.fetch("https://example.org/missing.png").await,
                Err(FetchError::NotFound(_))
            ));
            assert!(NoFetch.fetch("https://example.org/a.png").await.is_err());
        }
    }
}
