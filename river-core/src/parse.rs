use chrono::{DateTime, Utc};

use crate::error::ParseError;

/// Feed-level metadata plus its entries, normalized across RSS and Atom.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub entries: Vec<ParsedEntry>,
}

/// One syndication entry as the upstream document reported it.
///
/// Fields are raw: markup stripping and truncation happen when an entry
/// is turned into an `Update`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub description: Option<String>,
    pub comments: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parse a feed document, trying RSS first and falling back to Atom.
pub fn parse_feed(body: &str) -> Result<ParsedFeed, ParseError> {
    match rss::Channel::read_from(body.as_bytes()) {
        Ok(channel) => Ok(from_rss(channel)),
        Err(rss_err) => match atom_syndication::Feed::read_from(body.as_bytes()) {
            Ok(feed) => Ok(from_atom(feed)),
            Err(atom_err) => Err(ParseError::Unrecognized {
                rss: rss_err,
                atom: atom_err,
            }),
        },
    }
}

fn from_rss(channel: rss::Channel) -> ParsedFeed {
    let entries = channel
        .items()
        .iter()
        .map(|item| ParsedEntry {
            title: item.title().map(ToOwned::to_owned),
            link: item.link().map(ToOwned::to_owned),
            guid: item.guid().map(|guid| guid.value().to_owned()),
            description: item.description().map(ToOwned::to_owned),
            comments: item.comments().map(ToOwned::to_owned),
            published_at: item
                .pub_date()
                .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .and_then(reject_future),
        })
        .collect();

    ParsedFeed {
        title: channel.title().to_owned(),
        link: Some(channel.link().to_owned()).filter(|link| !link.is_empty()),
        description: channel.description().to_owned(),
        entries,
    }
}

fn from_atom(feed: atom_syndication::Feed) -> ParsedFeed {
    let entries = feed
        .entries()
        .iter()
        .map(|entry| ParsedEntry {
            title: Some(entry.title().to_string()),
            link: entry.links().first().map(|link| link.href().to_owned()),
            guid: Some(entry.id().to_owned()),
            description: entry
                .summary()
                .map(|text| text.to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(ToOwned::to_owned))),
            comments: None,
            published_at: reject_future(
                entry
                    .published()
                    .copied()
                    .unwrap_or_else(|| *entry.updated())
                    .with_timezone(&Utc),
            ),
        })
        .collect();

    ParsedFeed {
        title: feed.title().to_string(),
        link: feed.links().first().map(|link| link.href().to_owned()),
        description: feed
            .subtitle()
            .map(|text| text.to_string())
            .unwrap_or_default(),
        entries,
    }
}

/// A publish time claimed to be in the future is treated as absent; the
/// update falls back to ingestion time instead.
fn reject_future(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ts <= Utc::now() {
        Some(ts)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>g1</guid>
      <comments>http://example.com/1#comments</comments>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link href="https://example.com/"/>
  <updated>2024-10-21T07:28:00Z</updated>
  <id>urn:uuid:feed</id>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link href="https://example.com/entry"/>
    <summary>Entry summary</summary>
    <updated>2024-10-21T07:28:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss() {
        let feed = parse_feed(RSS_SAMPLE).unwrap();
        assert_eq!(feed.title, "Test Feed");
        assert_eq!(feed.entries.len(), 1);
        let entry = &feed.entries[0];
        assert_eq!(entry.guid.as_deref(), Some("g1"));
        assert_eq!(entry.link.as_deref(), Some("http://example.com/1"));
        assert_eq!(
            entry.comments.as_deref(),
            Some("http://example.com/1#comments")
        );
        assert!(entry.published_at.is_some());
    }

    #[test]
    fn parses_atom_fallback() {
        let feed = parse_feed(ATOM_SAMPLE).unwrap();
        assert_eq!(feed.title, "Atom Feed");
        assert_eq!(feed.entries.len(), 1);
        let entry = &feed.entries[0];
        assert_eq!(entry.guid.as_deref(), Some("urn:uuid:1"));
        assert_eq!(entry.description.as_deref(), Some("Entry summary"));
    }

    #[test]
    fn rejects_future_publish_times() {
        let future = (Utc::now() + chrono::Duration::days(30)).to_rfc2822();
        let doc = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
            <link>http://e/</link><description>d</description>
            <item><title>A</title><guid>1</guid><pubDate>{future}</pubDate></item>
            </channel></rss>"#
        );
        let feed = parse_feed(&doc).unwrap();
        assert_eq!(feed.entries[0].published_at, None);
    }

    #[test]
    fn rejects_non_feed_documents() {
        assert!(parse_feed("this is not a feed").is_err());
    }
}
