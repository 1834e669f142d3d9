use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunables for the polling scheduler and aggregation sink.
///
/// Every field has a serde default so partial config files keep working
/// when new knobs are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiverConfig {
    /// Number of feeds polled concurrently within a batch.
    pub workers: usize,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Pause between dispatch batches in seconds.
    pub batch_sleep_secs: u64,
    /// Floor for the estimated poll interval in seconds.
    pub min_poll_secs: u64,
    /// Raw estimates above this many seconds are replaced by a jittered draw.
    pub max_estimate_secs: u64,
    /// Lower bound of the jitter window in seconds.
    pub jitter_floor_secs: u64,
    /// Fixed retry delay after a failed fetch or parse, in seconds.
    pub failure_retry_secs: u64,
    /// Fingerprints remembered per feed before the oldest are evicted.
    pub ledger_cap: usize,
    /// Arrival timestamps remembered per feed.
    pub history_cap: usize,
    /// Updates retained per river log.
    pub river_cap: usize,
    /// Updates retained in the firehose log.
    pub firehose_cap: usize,
    /// Updates appended on the very first successful poll of a feed.
    pub initial_item_limit: usize,
    /// User-Agent header sent with every fetch.
    pub user_agent: String,
}

impl Default for RiverConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            request_timeout_secs: 15,
            batch_sleep_secs: 15,
            min_poll_secs: 60,
            max_estimate_secs: 2 * 60 * 60,
            jitter_floor_secs: 60 * 60,
            failure_retry_secs: 60 * 60,
            ledger_cap: 1000,
            history_cap: 100,
            river_cap: 250,
            firehose_cap: 1000,
            initial_item_limit: 5,
            user_agent: "riverd/0.1 (+https://riverjs.org/)".to_string(),
        }
    }
}

impl RiverConfig {
    /// Load a config file, falling back to defaults when it is missing or
    /// unreadable. Defaults are never fatal; a malformed file is.
    pub fn from_file(path: &Path) -> Result<Self, serde_json::Error> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "config file unreadable, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_sleep(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.batch_sleep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RiverConfig::from_file(Path::new("/nonexistent/river.json")).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.ledger_cap, 1000);
        assert_eq!(config.initial_item_limit, 5);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: RiverConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.river_cap, 250);
    }
}
