use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// One named river grouping from the subscription list.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub name: String,
    pub title: String,
    pub description: String,
    pub feeds: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to read subscription list: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to fetch subscription list: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed subscription list: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("subscription list defines no feeds")]
    Empty,
}

// A river maps either straight to its feed URLs or to a block with
// optional title/description.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RiverSpec {
    Feeds(Vec<String>),
    Detailed {
        title: Option<String>,
        #[serde(default)]
        description: String,
        feeds: Vec<String>,
    },
}

/// Load the subscription list from a local path or an HTTP(S) URL.
///
/// The YAML document is a map of river name to either a feed-URL list or a
/// `{title, description, feeds}` block. A feed may appear under several
/// rivers.
pub async fn load_subscriptions(
    location: &str,
    client: &reqwest::Client,
) -> Result<Vec<Subscription>, SubscriptionError> {
    let raw = if location.starts_with("http://") || location.starts_with("https://") {
        client
            .get(location)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?
    } else {
        tokio::fs::read_to_string(location).await?
    };
    parse_subscriptions(&raw)
}

pub fn parse_subscriptions(raw: &str) -> Result<Vec<Subscription>, SubscriptionError> {
    let doc: BTreeMap<String, RiverSpec> = serde_yaml::from_str(raw)?;

    let subscriptions: Vec<Subscription> = doc
        .into_iter()
        .map(|(name, spec)| match spec {
            RiverSpec::Feeds(feeds) => Subscription {
                title: name.clone(),
                name,
                description: String::new(),
                feeds: keep_valid_urls(feeds),
            },
            RiverSpec::Detailed {
                title,
                description,
                feeds,
            } => Subscription {
                title: title.unwrap_or_else(|| name.clone()),
                name,
                description,
                feeds: keep_valid_urls(feeds),
            },
        })
        .filter(|sub| !sub.feeds.is_empty())
        .collect();

    if subscriptions.is_empty() {
        return Err(SubscriptionError::Empty);
    }

    info!(
        rivers = subscriptions.len(),
        feeds = subscriptions.iter().map(|s| s.feeds.len()).sum::<usize>(),
        "loaded subscription list"
    );
    Ok(subscriptions)
}

// Entries that do not parse as http(s) URLs are dropped with a warning
// instead of poisoning the schedule.
fn keep_valid_urls(feeds: Vec<String>) -> Vec<String> {
    feeds
        .into_iter()
        .filter(|feed| match url::Url::parse(feed) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => true,
            Ok(parsed) => {
                warn!(feed = %feed, scheme = %parsed.scheme(), "skipping feed with unsupported scheme");
                false
            }
            Err(err) => {
                warn!(feed = %feed, error = %err, "skipping malformed feed URL");
                false
            }
        })
        .collect()
}
