//! Sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Configuration for flush timing and the owner loop.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use roster_bridge_sync::SyncConfig;
///
/// let config = SyncConfig::from_json_str(r#"{ "idle_window_ms": 50 }"#).unwrap();
/// assert_eq!(config.idle_window_ms, 50);
/// assert_eq!(config.max_wait_ms, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last event before a flush.
    pub idle_window_ms: u64,
    /// Upper bound on how long the first pending event may wait.
    pub max_wait_ms: u64,
    /// Whether avatar URLs are fetched at all.
    pub fetch_avatars: bool,
    /// Capacity of the inbound event channel.
    pub event_channel_capacity: usize,
    /// Capacity of the error signal broadcast channel.
    pub error_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            idle_window_ms: 150,
            max_wait_ms: 500,
            fetch_avatars: true,
            event_channel_capacity: 256,
            error_channel_capacity: 16,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_wait_ms < self.idle_window_ms {
            return Err(SyncError::Configuration(format!(
                "max_wait_ms ({}) is shorter than idle_window_ms ({})",
                self.max_wait_ms, self.idle_window_ms
            )));
        }
        if self.event_channel_capacity == 0 || self.error_channel_capacity == 0 {
            return Err(SyncError::Configuration(
                "channel capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_millis(self.idle_window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.idle_window(), Duration::from_millis(150));
        assert_eq!(config.max_wait(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
        assert_eq!(SyncConfig::from_json_str("{}").unwrap(), config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SyncConfig::from_json_str(r#"{ "idle_window_ms": 900 }"#).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));

        let err = SyncConfig::from_json_str(r#"{ "event_channel_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));

        assert!(SyncConfig::from_json_str("not json").is_err());
    }
}
