use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::warn;

use crate::parse::ParsedEntry;
use crate::storage;

/// Derive the stable identity of a feed entry.
///
/// The GUID wins when the feed supplies one; otherwise the identity is a
/// hash over title and link. Either way the result is scoped per feed by
/// the ledger, so identical GUIDs across feeds never collide.
pub fn fingerprint(entry: &ParsedEntry) -> String {
    if let Some(guid) = entry.guid.as_deref() {
        if !guid.is_empty() {
            return guid.to_owned();
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(entry.title.as_deref().unwrap_or_default().as_bytes());
    hasher.update(entry.link.as_deref().unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerData {
    // feed url -> fingerprints in arrival order, oldest first
    seen: HashMap<String, VecDeque<String>>,
}

/// Bounded per-feed memory of recently seen fingerprints.
///
/// Membership is defined purely by the current window: a fingerprint that
/// scrolls past the cap may be reported new again later. That is the
/// intended memory bound, not a uniqueness guarantee.
#[derive(Debug, Clone)]
pub struct FingerprintLedger {
    inner: Arc<RwLock<LedgerData>>,
    path: Option<PathBuf>,
    cap: usize,
}

impl FingerprintLedger {
    pub fn in_memory(cap: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerData::default())),
            path: None,
            cap,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>, cap: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let data: LedgerData = storage::read_json_with_tmp_fallback(&path).await;
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
            cap,
        }
    }

    pub async fn is_new(&self, feed_url: &str, fp: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .seen
            .get(feed_url)
            .map(|window| !window.iter().any(|seen| seen == fp))
            .unwrap_or(true)
    }

    pub async fn record(&self, feed_url: &str, fp: String) {
        let mut inner = self.inner.write().await;
        let window = inner.seen.entry(feed_url.to_owned()).or_default();
        window.push_back(fp);
        while window.len() > self.cap {
            window.pop_front();
        }
    }

    /// True until the first fingerprint for this feed is recorded.
    pub async fn is_empty_for(&self, feed_url: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .seen
            .get(feed_url)
            .map(|window| window.is_empty())
            .unwrap_or(true)
    }

    pub async fn persist(&self) {
        if let Some(path) = &self.path {
            let inner = self.inner.read().await;
            if let Err(err) = storage::write_json_atomic(path, &*inner).await {
                warn!(error = %err, path = %path.display(), "failed to persist fingerprint ledger");
            }
        }
    }
}
