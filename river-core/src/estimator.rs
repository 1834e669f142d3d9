use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::RiverConfig;
use crate::storage;

/// Samples considered when the poll discovered new entries.
const ACTIVE_WINDOW: usize = 9;
/// Samples considered when the poll came back empty.
const IDLE_WINDOW: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct HistoryData {
    // feed url -> arrival timestamps, oldest first
    arrivals: HashMap<String, VecDeque<DateTime<Utc>>>,
}

/// Estimates the next poll delay for a feed from its item-arrival history.
///
/// Feeds that post often get polled often; quiet feeds decay towards a
/// jittered one-to-two-hour cadence so a fleet of stale feeds never
/// converges on the same due-time.
#[derive(Debug, Clone)]
pub struct IntervalEstimator {
    inner: Arc<RwLock<HistoryData>>,
    path: Option<PathBuf>,
    history_cap: usize,
    min_secs: u64,
    max_estimate_secs: u64,
    jitter_floor_secs: u64,
}

impl IntervalEstimator {
    pub fn in_memory(config: &RiverConfig) -> Self {
        Self::with_data(HistoryData::default(), None, config)
    }

    pub async fn load_from(path: impl AsRef<Path>, config: &RiverConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: HistoryData = storage::read_json_with_tmp_fallback(&path).await;
        Self::with_data(data, Some(path), config)
    }

    fn with_data(data: HistoryData, path: Option<PathBuf>, config: &RiverConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
            path,
            history_cap: config.history_cap,
            min_secs: config.min_poll_secs,
            max_estimate_secs: config.max_estimate_secs,
            jitter_floor_secs: config.jitter_floor_secs,
        }
    }

    /// Fold this poll's discoveries into the feed's history and return the
    /// delay before the next poll.
    ///
    /// `new_timestamps` are the publish times of entries first seen this
    /// poll, oldest first. An empty slice records one synthetic "nothing
    /// new" sample so idle feeds keep slowing down.
    pub async fn next_delay(&self, feed_url: &str, new_timestamps: &[DateTime<Utc>]) -> Duration {
        let mut inner = self.inner.write().await;
        let history = inner.arrivals.entry(feed_url.to_owned()).or_default();

        if new_timestamps.is_empty() {
            history.push_back(Utc::now());
        } else {
            history.extend(new_timestamps.iter().copied());
        }
        while history.len() > self.history_cap {
            history.pop_front();
        }

        let window = if new_timestamps.is_empty() {
            IDLE_WINDOW
        } else {
            ACTIVE_WINDOW
        };
        let start = history.len().saturating_sub(window);
        let recent: Vec<DateTime<Utc>> = history.iter().skip(start).copied().collect();
        drop(inner);

        let raw_secs = mean_delta_secs(&recent);
        self.clamp(raw_secs)
    }

    fn clamp(&self, raw_secs: u64) -> Duration {
        if raw_secs < self.min_secs {
            Duration::from_secs(self.min_secs)
        } else if raw_secs > self.max_estimate_secs {
            let jittered =
                rand::rng().random_range(self.jitter_floor_secs..=self.max_estimate_secs);
            Duration::from_secs(jittered)
        } else {
            Duration::from_secs(raw_secs)
        }
    }

    /// Number of samples currently held for a feed.
    pub async fn history_len(&self, feed_url: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .arrivals
            .get(feed_url)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    pub async fn persist(&self) {
        if let Some(path) = &self.path {
            let inner = self.inner.read().await;
            if let Err(err) = storage::write_json_atomic(path, &*inner).await {
                warn!(error = %err, path = %path.display(), "failed to persist arrival history");
            }
        }
    }
}

/// Mean absolute spacing between consecutive samples, in whole seconds.
/// Fewer than two samples means no spacing information at all; the clamp
/// floor takes over.
fn mean_delta_secs(samples: &[DateTime<Utc>]) -> u64 {
    if samples.len() < 2 {
        return 0;
    }
    let total: i64 = samples
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds().abs())
        .sum();
    (total / (samples.len() as i64 - 1)).max(0) as u64
}
