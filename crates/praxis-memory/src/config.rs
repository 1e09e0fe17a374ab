use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Tuning knobs of a [`crate::MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maintain `message_threads:{messageId}` pointers so message lookups
    /// skip the full thread scan. Pointers are verified on read and fall back
    /// to the scan when stale.
    pub track_message_threads: bool,
    /// Parallel message fetches while hydrating a listing.
    pub hydrate_concurrency: usize,
    /// Parallel thread probes while scanning for a message or listing threads.
    pub scan_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            track_message_threads: false,
            hydrate_concurrency: 16,
            scan_concurrency: 16,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_thread_tracking(mut self, enabled: bool) -> Self {
        self.track_message_threads = enabled;
        self
    }

    pub fn with_hydrate_concurrency(mut self, limit: usize) -> Self {
        self.hydrate_concurrency = limit;
        self
    }

    pub fn with_scan_concurrency(mut self, limit: usize) -> Self {
        self.scan_concurrency = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hydrate_concurrency == 0 {
            return Err(MemoryError::Config("hydrate_concurrency must be at least 1".to_string()));
        }
        if self.scan_concurrency == 0 {
            return Err(MemoryError::Config("scan_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    pub(crate) fn hydrate_limit(&self) -> usize {
        self.hydrate_concurrency.max(1)
    }

    pub(crate) fn scan_limit(&self) -> usize {
        self.scan_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_partial_deserialize() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"track_message_threads": true}"#).unwrap();
        assert!(config.track_message_threads);
        assert_eq!(config.hydrate_concurrency, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = StoreConfig::new().with_scan_concurrency(0);
        assert!(matches!(config.validate(), Err(MemoryError::Config(_))));
    }
}
