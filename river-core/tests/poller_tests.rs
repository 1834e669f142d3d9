use chrono::Utc;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use river_core::{
    poll_feed, run_batch, spawn_poller, AggregationSink, Event, FetchCache, Fetcher,
    FingerprintLedger, IntervalEstimator, PollContext, RiverConfig, Schedule, Subscription,
    FIREHOSE,
};

fn rss_with_guids(guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|guid| {
            format!(
                "<item><title>Title {guid}</title><link>http://example.com/{guid}</link>\
                 <guid>{guid}</guid><description>Body {guid}</description>\
                 <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Test Feed</title><link>http://example.com/</link><description>Test</description>
{items}
</channel></rss>"#
    )
}

async fn context_with_rivers(rivers: &[(&str, &[&str])]) -> PollContext {
    let config = RiverConfig::default();
    let ctx = PollContext {
        fetcher: Fetcher::new(reqwest::Client::new(), FetchCache::in_memory()),
        ledger: FingerprintLedger::in_memory(config.ledger_cap),
        estimator: IntervalEstimator::in_memory(&config),
        schedule: Schedule::in_memory(),
        sink: AggregationSink::in_memory(&config),
        config,
    };
    let subs: Vec<Subscription> = rivers
        .iter()
        .map(|(name, feeds)| Subscription {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            feeds: feeds.iter().map(|f| f.to_string()).collect(),
        })
        .collect();
    ctx.sink.register_subscriptions(&subs).await;
    ctx
}

#[tokio::test]
async fn first_poll_aggregates_then_deduplicates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(rss_with_guids(&["g1", "g2", "g3"])),
        )
        .mount(&server)
        .await;

    let feed = format!("{}/feed", server.uri());
    let ctx = context_with_rivers(&[("tech", &[feed.as_str()]), ("news", &[feed.as_str()])]).await;

    poll_feed(&ctx, &feed).await;

    // All three land in both owning rivers and the firehose.
    for river in ["tech", "news", FIREHOSE] {
        let snapshot = ctx.sink.river_snapshot(river).await.unwrap();
        assert_eq!(snapshot.updates.len(), 3, "river {river}");
    }
    for guid in ["g1", "g2", "g3"] {
        assert!(!ctx.ledger.is_new(&feed, guid).await);
    }
    let history_after_first = ctx.estimator.history_len(&feed).await;
    assert_eq!(history_after_first, 3);

    // Same entries again: nothing new, but the history still grows by one
    // synthetic sample.
    poll_feed(&ctx, &feed).await;
    let snapshot = ctx.sink.river_snapshot("tech").await.unwrap();
    assert_eq!(snapshot.updates.len(), 3);
    assert_eq!(ctx.estimator.history_len(&feed).await, history_after_first + 1);
}

#[tokio::test]
async fn first_poll_truncates_backlog_to_initial_limit() {
    let server = MockServer::start().await;
    let guids: Vec<String> = (0..20).map(|i| format!("g{i}")).collect();
    let guid_refs: Vec<&str> = guids.iter().map(|s| s.as_str()).collect();
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(rss_with_guids(&guid_refs)),
        )
        .mount(&server)
        .await;

    let feed = format!("{}/feed", server.uri());
    let ctx = context_with_rivers(&[("tech", &[feed.as_str()])]).await;

    poll_feed(&ctx, &feed).await;

    let snapshot = ctx.sink.river_snapshot("tech").await.unwrap();
    assert_eq!(snapshot.updates.len(), 5);

    // Every fingerprint was recorded, not just the five appended.
    assert!(!ctx.ledger.is_new(&feed, "g19").await);
}

#[tokio::test]
async fn http_500_schedules_fixed_retry_and_mutates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let feed = format!("{}/feed", server.uri());
    let ctx = context_with_rivers(&[("tech", &[feed.as_str()])]).await;

    let before = Utc::now();
    poll_feed(&ctx, &feed).await;

    let due = ctx.schedule.due_time(&feed).await.expect("feed rescheduled");
    assert!(due >= before + chrono::Duration::minutes(59));
    assert!(due <= Utc::now() + chrono::Duration::minutes(61));

    assert!(ctx.ledger.is_empty_for(&feed).await);
    assert!(ctx.fetcher.cache().get(&feed).await.is_none());
    let snapshot = ctx.sink.river_snapshot("tech").await.unwrap();
    assert!(snapshot.updates.is_empty());
}

#[tokio::test]
async fn unparsable_body_schedules_fixed_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not a feed at all"))
        .mount(&server)
        .await;

    let feed = format!("{}/feed", server.uri());
    let ctx = context_with_rivers(&[("tech", &[feed.as_str()])]).await;

    let before = Utc::now();
    poll_feed(&ctx, &feed).await;

    let due = ctx.schedule.due_time(&feed).await.expect("feed rescheduled");
    assert!(due >= before + chrono::Duration::minutes(59));
    let snapshot = ctx.sink.river_snapshot("tech").await.unwrap();
    assert!(snapshot.updates.is_empty());
}

#[tokio::test]
async fn spawn_poller_emits_change_events_and_stops() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_guids(&["g1"])))
        .mount(&server)
        .await;

    let feed = format!("{}/feed", server.uri());
    let mut ctx = context_with_rivers(&[("tech", &[feed.as_str()])]).await;
    ctx.config.batch_sleep_secs = 1;
    ctx.schedule.ensure(&feed, Utc::now()).await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_poller(ctx, tx);

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("channel closed");
    assert!(matches!(event, Event::RiverChanged(_)));

    handle.stop().await.expect("stop poller");
}

#[tokio::test]
async fn batch_reports_each_dirty_river_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(rss_with_guids(&["a1", "a2"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_guids(&["b1"])))
        .mount(&server)
        .await;

    let feed_a = format!("{}/a", server.uri());
    let feed_b = format!("{}/b", server.uri());
    let ctx =
        context_with_rivers(&[("shared", &[feed_a.as_str(), feed_b.as_str()])]).await;

    let now = Utc::now();
    ctx.schedule.ensure(&feed_a, now).await;
    ctx.schedule.ensure(&feed_b, now).await;

    let (tx, mut rx) = mpsc::channel(8);
    run_batch(&ctx, &tx).await;

    let mut changed = Vec::new();
    while let Ok(Event::RiverChanged(name)) = rx.try_recv() {
        changed.push(name);
    }
    changed.sort();
    // Two feeds, one river: reported once, plus the firehose.
    assert_eq!(changed, vec![FIREHOSE.to_string(), "shared".to_string()]);

    // Both feeds were rescheduled into the future.
    assert_eq!(ctx.schedule.len().await, 2);
    assert!(ctx.schedule.due_feeds(Utc::now()).await.is_empty());
}
