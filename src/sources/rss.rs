//! RSS 2.0 feed adapter.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Activity, ActivityMeta, FeedItem};
use crate::source::{Source, StreamSink};
use crate::source_type::SourceType;
use crate::sources::{emit_all, get_text, http_client};

/// Streams every item of one RSS feed.
///
/// ```toml
/// [[sources]]
/// type = "rss-feed"
/// url = "https://blog.rust-lang.org/feed.xml"
/// headers = { "Accept-Language" = "en" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RssFeedSource {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

#[async_trait]
impl Source for RssFeedSource {
    fn uid(&self) -> String {
        format!("{}/{}", SourceType::RssFeed, self.url)
    }

    fn name(&self) -> String {
        format!("RSS ({})", self.url)
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn source_type(&self) -> SourceType {
        SourceType::RssFeed
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.url.trim().is_empty() {
            bail!("URL is required");
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            headers.insert(name, value);
        }

        self.client = Some(http_client(headers)?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = &self.client else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let fetched = tokio::select! {
            _ = sink.cancelled() => return,
            body = get_text(client.get(&self.url)) => body,
        };

        let result = fetched.and_then(|xml| parse_feed(&xml, &self.url, &self.uid()));
        match result {
            Ok(items) => {
                emit_all(&sink, items).await;
            }
            Err(e) => {
                sink.error(e.context(format!("failed to parse RSS feed {}", self.url)))
                    .await;
            }
        }
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    author: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
    enclosure: Option<Enclosure>,
}

/// Element text, ignoring attributes such as `isPermaLink` or `domain`.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type", default)]
    mime: Option<String>,
}

/// Map an RSS document to feed item activities.
pub(crate) fn parse_feed(xml: &str, feed_url: &str, source_uid: &str) -> Result<Vec<Activity>> {
    let cleaned = scrub_html_entities_for_xml(xml);
    let rss: Rss = quick_xml::de::from_str(&cleaned).context("parsing rss xml")?;

    if rss.channel.items.is_empty() {
        bail!("feed has no items");
    }

    let mut activities = Vec::with_capacity(rss.channel.items.len());
    for item in rss.channel.items {
        let guid = item
            .guid
            .map(|g| g.value.trim().to_string())
            .filter(|g| !g.is_empty());
        let link = item.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        let title = item.title.unwrap_or_default().trim().to_string();

        let Some(uid) = guid.or_else(|| link.clone()).or_else(|| {
            (!title.is_empty()).then(|| format!("{}#{}", feed_url, title))
        }) else {
            tracing::debug!(feed = feed_url, "skipping feed item without identity");
            continue;
        };

        let image_url = item
            .enclosure
            .filter(|e| e.mime.as_deref().is_some_and(|m| m.starts_with("image/")))
            .map(|e| e.url);

        activities.push(Activity::FeedItem(FeedItem {
            meta: ActivityMeta {
                uid,
                source_uid: source_uid.to_string(),
                source_type: SourceType::RssFeed,
                title,
                body: item.description.unwrap_or_default(),
                url: link.unwrap_or_else(|| feed_url.to_string()),
                image_url,
                created_at: item
                    .pub_date
                    .as_deref()
                    .and_then(parse_pub_date)
                    .unwrap_or_else(Utc::now),
            },
            feed_url: feed_url.to_string(),
            author: item.author.filter(|a| !a.trim().is_empty()),
            categories: item
                .categories
                .into_iter()
                .map(|c| c.value)
                .filter(|c| !c.is_empty())
                .collect(),
        }));
    }

    Ok(activities)
}

/// RSS dates are RFC 2822; some feeds use RFC 3339 instead.
fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
