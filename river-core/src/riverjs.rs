use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::Serialize;

use crate::river::{RiverSnapshot, Update};
use crate::storage;

/// Callback name wrapping the JSON payload, per the river.js convention.
const CALLBACK: &str = "onGetRiverStream";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RiverDoc {
    updated_feeds: UpdatedFeeds,
    metadata: Metadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatedFeeds {
    updated_feed: Vec<UpdatedFeed>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatedFeed {
    feed_title: String,
    feed_url: String,
    website_url: String,
    feed_description: String,
    when_last_update: String,
    item: Vec<Item>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    id: String,
    title: String,
    link: String,
    perma_link: String,
    body: String,
    pub_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    comments: Option<String>,
}

#[derive(Serialize)]
struct Metadata {
    docs: String,
    #[serde(rename = "whenGMT")]
    when_gmt: String,
    #[serde(rename = "whenLocal")]
    when_local: String,
    version: String,
    secs: String,
}

impl Item {
    fn from_update(update: &Update) -> Self {
        Self {
            id: update.id.to_string(),
            title: update.title.clone(),
            link: update.link.clone().unwrap_or_default(),
            perma_link: update.permalink.clone().unwrap_or_default(),
            body: update.body.clone().unwrap_or_default(),
            pub_date: update.published_at.to_rfc2822(),
            comments: update.comments.clone(),
        }
    }
}

/// Render a river snapshot as a river.js v3 JSONP document.
///
/// Runs of consecutive updates from the same feed become one updatedFeed
/// block, preserving the log's newest-first order.
pub fn render_river_js(snapshot: &RiverSnapshot) -> String {
    let started = std::time::Instant::now();

    let mut groups: Vec<UpdatedFeed> = Vec::new();
    for update in &snapshot.updates {
        let matches_last = groups
            .last()
            .map(|group| group.feed_url == update.feed_url)
            .unwrap_or(false);
        if !matches_last {
            let meta = snapshot.feed_meta.get(&update.feed_url);
            groups.push(UpdatedFeed {
                feed_title: meta
                    .map(|m| m.title.clone())
                    .filter(|title| !title.is_empty())
                    .unwrap_or_else(|| update.feed_url.clone()),
                feed_url: update.feed_url.clone(),
                website_url: meta.and_then(|m| m.website.clone()).unwrap_or_default(),
                feed_description: meta.map(|m| m.description.clone()).unwrap_or_default(),
                when_last_update: meta
                    .map(|m| m.last_update)
                    .unwrap_or(update.published_at)
                    .to_rfc2822(),
                item: Vec::new(),
            });
        }
        if let Some(group) = groups.last_mut() {
            group.item.push(Item::from_update(update));
        }
    }

    let now = Utc::now();
    let doc = RiverDoc {
        updated_feeds: UpdatedFeeds {
            updated_feed: groups,
        },
        metadata: Metadata {
            docs: "http://riverjs.org/".to_owned(),
            when_gmt: now.to_rfc2822(),
            when_local: Local::now().to_rfc2822(),
            version: "3".to_owned(),
            secs: format!("{:.3}", started.elapsed().as_secs_f64()),
        },
    };

    let json = serde_json::to_string(&doc).unwrap_or_else(|_| "{}".to_owned());
    format!("{CALLBACK}({json})")
}

/// Write `rivers/<name>.js` under `output_dir`, atomically.
pub async fn write_river_js(
    output_dir: &Path,
    snapshot: &RiverSnapshot,
) -> Result<PathBuf, std::io::Error> {
    let rendered = render_river_js(snapshot);
    let path = output_dir
        .join("rivers")
        .join(format!("{}.js", snapshot.name));
    storage::write_atomic(&path, rendered.as_bytes()).await?;
    Ok(path)
}
