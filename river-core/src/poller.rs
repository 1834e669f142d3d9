use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RiverConfig;
use crate::error::PollError;
use crate::estimator::IntervalEstimator;
use crate::fetch::Fetcher;
use crate::fingerprint::{fingerprint, FingerprintLedger};
use crate::parse::parse_feed;
use crate::river::{AggregationSink, FeedMeta, Update};
use crate::schedule::Schedule;

/// Downstream change notification: a river has unpublished updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RiverChanged(String),
}

/// Shared handles for everything a worker touches. Cloning is cheap; all
/// components are Arc-backed.
#[derive(Debug, Clone)]
pub struct PollContext {
    pub config: RiverConfig,
    pub fetcher: Fetcher,
    pub ledger: FingerprintLedger,
    pub estimator: IntervalEstimator,
    pub schedule: Schedule,
    pub sink: AggregationSink,
}

pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(self) -> Result<(), PollError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(PollError::from)
    }
}

/// Spawn the dispatch loop: drain due feeds, poll them on a bounded worker
/// pool, publish dirty-river notifications, sleep, repeat forever.
pub fn spawn_poller(ctx: PollContext, update_tx: mpsc::Sender<Event>) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        loop {
            // A batch always runs to completion; cancellation lands at
            // batch boundaries, bounded by the per-request timeout.
            run_batch(&ctx, &update_tx).await;
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("poller shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(ctx.config.batch_sleep()) => {}
            }
        }
    });

    PollerHandle { cancel_tx, join }
}

/// One dispatch cycle. Public so tests and one-shot tools can drive the
/// pipeline without the loop.
pub async fn run_batch(ctx: &PollContext, update_tx: &mpsc::Sender<Event>) {
    let now = Utc::now();
    let due = ctx.schedule.due_feeds(now).await;

    if !due.is_empty() {
        info!(feeds = due.len(), "dispatching due feeds");
        futures_util::stream::iter(due)
            .for_each_concurrent(ctx.config.workers.max(1), |feed_url| {
                let ctx = ctx.clone();
                async move {
                    poll_feed(&ctx, &feed_url).await;
                }
            })
            .await;
    }

    ctx.ledger.persist().await;
    ctx.fetcher.cache().persist().await;
    ctx.estimator.persist().await;
    ctx.schedule.persist().await;
    ctx.sink.persist().await;

    for river in ctx.sink.drain_dirty_rivers().await {
        if update_tx.send(Event::RiverChanged(river)).await.is_err() {
            warn!("update receiver dropped");
            return;
        }
    }
}

/// The full per-feed pipeline: fetch, parse, dedupe, aggregate, estimate,
/// reschedule. Failures are contained to this feed: they log, schedule a
/// fixed-delay retry, and leave ledger, cache, and river logs untouched.
pub async fn poll_feed(ctx: &PollContext, feed_url: &str) {
    let fetched = match ctx.fetcher.fetch(feed_url).await {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(feed = %feed_url, error = %err, "fetch failed");
            retry_later(ctx, feed_url).await;
            return;
        }
    };

    // A 304 still goes through dedup: unchanged validators do not
    // guarantee an unchanged entry set against our bounded ledger.
    let parsed = match parse_feed(&fetched.body) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(feed = %feed_url, error = %err, "parse failed");
            retry_later(ctx, feed_url).await;
            return;
        }
    };

    let now = Utc::now();
    let mut updates: Vec<Update> = Vec::new();
    for entry in &parsed.entries {
        let fp = fingerprint(entry);
        if ctx.ledger.is_new(feed_url, &fp).await {
            ctx.ledger.record(feed_url, fp.clone()).await;
            updates.push(Update::from_entry(feed_url, entry, fp, now));
        }
    }

    // Publish times of this poll's discoveries, oldest first, for the
    // arrival history.
    let mut new_timestamps: Vec<DateTime<Utc>> =
        updates.iter().map(|update| update.published_at).collect();
    new_timestamps.sort();

    let meta = FeedMeta::from_parsed(&parsed, now);
    let outcome = ctx.sink.append_updates(feed_url, meta, updates).await;
    if outcome.appended > 0 {
        info!(
            feed = %feed_url,
            new = outcome.appended,
            first_poll = outcome.first_poll,
            fresh = fetched.fresh,
            "aggregated updates"
        );
    } else {
        debug!(feed = %feed_url, fresh = fetched.fresh, "no new entries");
    }

    let delay = ctx.estimator.next_delay(feed_url, &new_timestamps).await;
    let due = now + chrono::Duration::seconds(delay.as_secs() as i64);
    ctx.schedule.reschedule(feed_url, due).await;
}

async fn retry_later(ctx: &PollContext, feed_url: &str) {
    let due = Utc::now() + chrono::Duration::seconds(ctx.config.failure_retry_secs as i64);
    ctx.schedule.reschedule(feed_url, due).await;
}
