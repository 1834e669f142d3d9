use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::RiverConfig;
use crate::error::PollError;
use crate::storage;

/// Last successful response for one feed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFeed {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CacheData {
    feeds: HashMap<String, CachedFeed>,
}

/// Stored bodies and revalidation headers, keyed by feed URL.
#[derive(Debug, Clone)]
pub struct FetchCache {
    inner: Arc<RwLock<CacheData>>,
    path: Option<PathBuf>,
}

impl FetchCache {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: CacheData = storage::read_json_with_tmp_fallback(&path).await;
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    pub async fn get(&self, feed_url: &str) -> Option<CachedFeed> {
        self.inner.read().await.feeds.get(feed_url).cloned()
    }

    async fn store(&self, feed_url: &str, cached: CachedFeed) {
        self.inner
            .write()
            .await
            .feeds
            .insert(feed_url.to_owned(), cached);
    }

    pub async fn persist(&self) {
        if let Some(path) = &self.path {
            let inner = self.inner.read().await;
            if let Err(err) = storage::write_json_atomic(path, &*inner).await {
                warn!(error = %err, path = %path.display(), "failed to persist fetch cache");
            }
        }
    }
}

/// Result of a cache-aware fetch. `fresh` is false when the server answered
/// 304 and the body is the cached copy.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: String,
    pub fresh: bool,
}

/// Performs conditional GETs against feed URLs, persisting validators and
/// bodies on every 200.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    cache: FetchCache,
}

impl Fetcher {
    pub fn new(client: Client, cache: FetchCache) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    pub async fn fetch(&self, feed_url: &str) -> Result<Fetched, PollError> {
        let cached = self.cache.get(feed_url).await;

        let mut request = self.client.get(feed_url);
        if let Some(cached) = &cached {
            if let Some(etag) = &cached.etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &cached.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            // The cache is left untouched: 304 certifies the stored copy.
            return match cached {
                Some(cached) => Ok(Fetched {
                    body: cached.body,
                    fresh: false,
                }),
                None => Err(PollError::Http(status)),
            };
        }

        if !status.is_success() {
            return Err(PollError::Http(status));
        }

        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let body = response.text().await?;

        self.cache
            .store(
                feed_url,
                CachedFeed {
                    etag,
                    last_modified,
                    body: body.clone(),
                },
            )
            .await;

        Ok(Fetched { body, fresh: true })
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Build the shared HTTP client: bounded timeout, limited redirects, a
/// stable User-Agent.
pub fn build_client(config: &RiverConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(config.user_agent.clone())
        .build()
}
