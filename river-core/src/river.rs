use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::RiverConfig;
use crate::parse::{ParsedEntry, ParsedFeed};
use crate::subscriptions::Subscription;
use crate::text::clean_text;

/// The river that receives every update from every feed.
pub const FIREHOSE: &str = "firehose";

/// Character cap applied to update titles and bodies.
const TEXT_LIMIT: usize = 280;

/// One deduplicated, normalized item derived from a feed entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub id: u64,
    pub fingerprint: String,
    pub feed_url: String,
    pub title: String,
    pub body: Option<String>,
    pub link: Option<String>,
    pub permalink: Option<String>,
    pub comments: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl Update {
    /// Normalize a parsed entry. The id stays zero until the sink appends
    /// the update and stamps it from the global counter.
    pub fn from_entry(
        feed_url: &str,
        entry: &ParsedEntry,
        fingerprint: String,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        let raw_title = entry.title.clone().unwrap_or_default();
        let raw_description = entry.description.clone().unwrap_or_default();

        // The entry title gets first crack at being the update title,
        // falling back to the description. When the description already
        // became the title, or repeats it verbatim, the body stays empty.
        let title_source = if raw_title.is_empty() {
            &raw_description
        } else {
            &raw_title
        };
        let title = clean_text(title_source, TEXT_LIMIT);
        let body = if raw_title.is_empty() {
            None
        } else {
            Some(clean_text(&raw_description, TEXT_LIMIT))
                .filter(|body| !body.is_empty() && *body != clean_text(&raw_title, TEXT_LIMIT))
        };

        // The guid doubles as a permalink only when it looks like a URL.
        let permalink = entry
            .guid
            .clone()
            .filter(|guid| guid.starts_with("http://") || guid.starts_with("https://"));

        Self {
            id: 0,
            fingerprint,
            feed_url: feed_url.to_owned(),
            title,
            body,
            link: entry.link.clone(),
            permalink,
            comments: entry.comments.clone(),
            published_at: entry.published_at.unwrap_or(ingested_at),
        }
    }
}

/// Feed-level metadata captured at the latest successful poll, used when a
/// river is rendered for publication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedMeta {
    pub title: String,
    pub website: Option<String>,
    pub description: String,
    pub last_update: DateTime<Utc>,
}

impl FeedMeta {
    pub fn from_parsed(parsed: &ParsedFeed, polled_at: DateTime<Utc>) -> Self {
        Self {
            title: clean_text(&parsed.title, TEXT_LIMIT),
            website: parsed.link.clone(),
            description: clean_text(&parsed.description, TEXT_LIMIT),
            last_update: polled_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RiverState {
    title: String,
    description: String,
    feeds: Vec<String>,
    // newest first
    updates: VecDeque<Update>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SinkData {
    rivers: BTreeMap<String, RiverState>,
    dirty: BTreeSet<String>,
    known_feeds: HashSet<String>,
    feed_meta: HashMap<String, FeedMeta>,
    next_id: u64,
}

/// What `append_updates` did with a poll's worth of updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Updates actually appended after first-poll truncation.
    pub appended: usize,
    /// True when this was the feed's first successful poll ever.
    pub first_poll: bool,
}

/// Everything the user sees about one river at one moment.
#[derive(Debug, Clone)]
pub struct RiverSnapshot {
    pub name: String,
    pub title: String,
    pub description: String,
    pub updates: Vec<Update>,
    pub feed_meta: HashMap<String, FeedMeta>,
}

/// Owner of all river logs and the only writer of river state.
#[derive(Debug, Clone)]
pub struct AggregationSink {
    inner: Arc<RwLock<SinkData>>,
    path: Option<PathBuf>,
    river_cap: usize,
    firehose_cap: usize,
    initial_item_limit: usize,
}

impl AggregationSink {
    pub fn in_memory(config: &RiverConfig) -> Self {
        Self::with_data(SinkData::default(), None, config)
    }

    pub async fn load_from(path: impl AsRef<Path>, config: &RiverConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: SinkData = crate::storage::read_json_with_tmp_fallback(&path).await;
        Self::with_data(data, Some(path), config)
    }

    fn with_data(mut data: SinkData, path: Option<PathBuf>, config: &RiverConfig) -> Self {
        data.rivers.entry(FIREHOSE.to_owned()).or_insert(RiverState {
            title: "Firehose".to_owned(),
            description: "Every update from every feed".to_owned(),
            feeds: Vec::new(),
            updates: VecDeque::new(),
        });
        Self {
            inner: Arc::new(RwLock::new(data)),
            path,
            river_cap: config.river_cap,
            firehose_cap: config.firehose_cap,
            initial_item_limit: config.initial_item_limit,
        }
    }

    /// Create or refresh river definitions from the subscription list.
    /// Existing logs survive; membership and metadata are replaced.
    pub async fn register_subscriptions(&self, subscriptions: &[Subscription]) {
        let mut inner = self.inner.write().await;
        for sub in subscriptions {
            let river = inner
                .rivers
                .entry(sub.name.clone())
                .or_insert_with(|| RiverState {
                    title: String::new(),
                    description: String::new(),
                    feeds: Vec::new(),
                    updates: VecDeque::new(),
                });
            river.title = sub.title.clone();
            river.description = sub.description.clone();
            river.feeds = sub.feeds.clone();
        }
    }

    /// Append a poll's new updates to every river that owns the feed and to
    /// the firehose, newest first, trimming each log to its cap.
    ///
    /// Always call this after a successful poll, even with zero updates: it
    /// consumes the feed's first-seen status and refreshes its metadata.
    pub async fn append_updates(
        &self,
        feed_url: &str,
        meta: FeedMeta,
        mut updates: Vec<Update>,
    ) -> AppendOutcome {
        let mut inner = self.inner.write().await;

        let first_poll = inner.known_feeds.insert(feed_url.to_owned());
        if first_poll {
            // A new subscription's entire backlog would flood its rivers.
            updates.truncate(self.initial_item_limit);
        }

        inner.feed_meta.insert(feed_url.to_owned(), meta);

        if updates.is_empty() {
            return AppendOutcome {
                appended: 0,
                first_poll,
            };
        }

        for update in updates.iter_mut() {
            inner.next_id += 1;
            update.id = inner.next_id;
        }

        let owners: Vec<String> = inner
            .rivers
            .iter()
            .filter(|(name, river)| {
                name.as_str() == FIREHOSE || river.feeds.iter().any(|feed| feed == feed_url)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &owners {
            let cap = if name == FIREHOSE {
                self.firehose_cap
            } else {
                self.river_cap
            };
            if let Some(river) = inner.rivers.get_mut(name) {
                // Batches arrive newest-first; reversed pushes keep that
                // order at the head of the log.
                for update in updates.iter().rev() {
                    river.updates.push_front(update.clone());
                }
                river.updates.truncate(cap);
            }
            inner.dirty.insert(name.clone());
        }

        AppendOutcome {
            appended: updates.len(),
            first_poll,
        }
    }

    /// Return every river touched since the last drain, once each, and
    /// clear the set.
    pub async fn drain_dirty_rivers(&self) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let dirty = std::mem::take(&mut inner.dirty);
        dirty.into_iter().collect()
    }

    pub async fn river_snapshot(&self, name: &str) -> Option<RiverSnapshot> {
        let inner = self.inner.read().await;
        let river = inner.rivers.get(name)?;
        let updates: Vec<Update> = river.updates.iter().cloned().collect();
        let feed_meta = updates
            .iter()
            .filter_map(|update| {
                inner
                    .feed_meta
                    .get(&update.feed_url)
                    .map(|meta| (update.feed_url.clone(), meta.clone()))
            })
            .collect();
        Some(RiverSnapshot {
            name: name.to_owned(),
            title: river.title.clone(),
            description: river.description.clone(),
            updates,
            feed_meta,
        })
    }

    pub async fn river_names(&self) -> Vec<String> {
        self.inner.read().await.rivers.keys().cloned().collect()
    }

    pub async fn persist(&self) {
        if let Some(path) = &self.path {
            let inner = self.inner.read().await;
            if let Err(err) = crate::storage::write_json_atomic(path, &*inner).await {
                warn!(error = %err, path = %path.display(), "failed to persist river logs");
            }
        }
    }
}
