use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::storage;

#[derive(Debug, Default)]
struct ScheduleData {
    // Sorted by due-time; the companion map enforces one entry per feed.
    by_due: BTreeSet<(DateTime<Utc>, String)>,
    due_times: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedSchedule {
    due_times: HashMap<String, DateTime<Utc>>,
}

/// Ordered index of (feed, due-time) pairs; the single source of "what to
/// check next". At most one pending entry exists per feed.
#[derive(Debug, Clone)]
pub struct Schedule {
    inner: Arc<RwLock<ScheduleData>>,
    path: Option<PathBuf>,
}

impl Schedule {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ScheduleData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let persisted: PersistedSchedule = storage::read_json_with_tmp_fallback(&path).await;
        let mut data = ScheduleData::default();
        for (feed, due) in persisted.due_times {
            data.by_due.insert((due, feed.clone()));
            data.due_times.insert(feed, due);
        }
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    /// Remove and return every feed whose due-time is at or before `now`.
    /// Drained feeds stay out of the schedule until rescheduled, so a feed
    /// is never dispatched twice in one batch.
    pub async fn due_feeds(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let due: Vec<(DateTime<Utc>, String)> = inner
            .by_due
            .iter()
            .take_while(|(due, _)| *due <= now)
            .cloned()
            .collect();
        for entry in &due {
            inner.by_due.remove(entry);
            inner.due_times.remove(&entry.1);
        }
        due.into_iter().map(|(_, feed)| feed).collect()
    }

    /// Insert or replace the feed's pending entry.
    pub async fn reschedule(&self, feed_url: &str, due: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.due_times.insert(feed_url.to_owned(), due) {
            inner.by_due.remove(&(previous, feed_url.to_owned()));
        }
        inner.by_due.insert((due, feed_url.to_owned()));
    }

    /// Schedule a feed only when it has no pending entry. New subscriptions
    /// enter due immediately; known feeds keep their slot.
    pub async fn ensure(&self, feed_url: &str, due: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if inner.due_times.contains_key(feed_url) {
            return;
        }
        inner.due_times.insert(feed_url.to_owned(), due);
        inner.by_due.insert((due, feed_url.to_owned()));
    }

    pub async fn due_time(&self, feed_url: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.due_times.get(feed_url).copied()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.due_times.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn persist(&self) {
        if let Some(path) = &self.path {
            let inner = self.inner.read().await;
            let persisted = PersistedSchedule {
                due_times: inner.due_times.clone(),
            };
            drop(inner);
            if let Err(err) = storage::write_json_atomic(path, &persisted).await {
                warn!(error = %err, path = %path.display(), "failed to persist schedule");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn due_feeds_drains_everything_at_or_before_now() {
        let schedule = Schedule::in_memory();
        let now = Utc::now();
        schedule.reschedule("a", now - chrono::Duration::minutes(5)).await;
        schedule.reschedule("b", now).await;
        schedule.reschedule("c", now + chrono::Duration::minutes(5)).await;

        let due = schedule.due_feeds(now).await;
        assert_eq!(due, vec!["a".to_string(), "b".to_string()]);
        // Drained feeds are gone until rescheduled.
        assert!(schedule.due_feeds(now).await.is_empty());
        assert_eq!(schedule.len().await, 1);
    }

    #[tokio::test]
    async fn reschedule_replaces_the_pending_entry() {
        let schedule = Schedule::in_memory();
        let now = Utc::now();
        schedule.reschedule("a", now - chrono::Duration::minutes(1)).await;
        schedule.reschedule("a", now + chrono::Duration::hours(1)).await;

        assert!(schedule.due_feeds(now).await.is_empty());
        assert_eq!(schedule.len().await, 1);
    }

    #[tokio::test]
    async fn ensure_keeps_existing_slots() {
        let schedule = Schedule::in_memory();
        let now = Utc::now();
        let later = now + chrono::Duration::hours(2);
        schedule.reschedule("a", later).await;
        schedule.ensure("a", now).await;
        assert_eq!(schedule.due_time("a").await, Some(later));

        schedule.ensure("b", now).await;
        assert_eq!(schedule.due_time("b").await, Some(now));
    }
}
