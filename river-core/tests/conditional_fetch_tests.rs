use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use river_core::{FetchCache, Fetcher, PollError};

const BODY_V1: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
<title>T</title><link>http://e/</link><description>d</description>
<item><title>A</title><guid>1</guid></item>
</channel></rss>"#;

fn fetcher() -> Fetcher {
    Fetcher::new(reqwest::Client::new(), FetchCache::in_memory())
}

#[tokio::test]
async fn fresh_response_stores_body_and_validators() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .insert_header("last-modified", "Mon, 21 Oct 2024 07:28:00 GMT")
                .set_body_string(BODY_V1),
        )
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let fetcher = fetcher();
    let fetched = fetcher.fetch(&url).await.unwrap();
    assert!(fetched.fresh);
    assert_eq!(fetched.body, BODY_V1);

    let cached = fetcher.cache().get(&url).await.unwrap();
    assert_eq!(cached.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        cached.last_modified.as_deref(),
        Some("Mon, 21 Oct 2024 07:28:00 GMT")
    );
    assert_eq!(cached.body, BODY_V1);
}

#[tokio::test]
async fn not_modified_serves_cached_body_and_keeps_cache_untouched() {
    let server = MockServer::start().await;
    // First request: a 200 carrying validators. Consumed once.
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_string(BODY_V1),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Revalidation: the stored etag comes back, the server says 304.
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let fetcher = fetcher();

    let first = fetcher.fetch(&url).await.unwrap();
    assert!(first.fresh);

    let second = fetcher.fetch(&url).await.unwrap();
    assert!(!second.fresh);
    assert_eq!(second.body, BODY_V1);

    let cached = fetcher.cache().get(&url).await.unwrap();
    assert_eq!(cached.etag.as_deref(), Some("\"v1\""));
    assert_eq!(cached.body, BODY_V1);
}

#[tokio::test]
async fn error_status_maps_to_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let err = fetcher().fetch(&url).await.unwrap_err();
    match err {
        PollError::Http(status) => assert_eq!(status.as_u16(), 503),
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_maps_to_network_error() {
    // Nothing listens here; connection is refused immediately.
    let err = fetcher()
        .fetch("http://127.0.0.1:1/feed")
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Network(_)));
}
