//! Hacker News adapter over the public Firebase API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::executor::{Batch, FanOut};
use crate::models::{Activity, ActivityMeta, ForumPost};
use crate::source::{Source, StreamSink};
use crate::source_type::SourceType;
use crate::sources::{emit_batch, get_json, http_client};

const API_BASE: &str = "https://hacker-news.firebaseio.com/v0";
const SORT_ORDERS: [&str; 3] = ["top", "new", "best"];

/// Front-page stories in one of the `top`, `new` or `best` orders.
///
/// ```toml
/// [[sources]]
/// type = "hacker-news"
/// sort_by = "best"
/// limit = 20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HackerNewsSource {
    /// Unknown values fall back to `top`.
    pub sort_by: String,
    /// Stories fetched per stream.
    pub limit: usize,
    pub workers: usize,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for HackerNewsSource {
    fn default() -> Self {
        Self {
            sort_by: "top".to_string(),
            limit: 15,
            workers: 8,
            client: None,
        }
    }
}

#[async_trait]
impl Source for HackerNewsSource {
    fn uid(&self) -> String {
        format!("{}/{}", SourceType::HackerNews, self.sort_by)
    }

    fn name(&self) -> String {
        format!("Hacker News ({})", self.sort_by)
    }

    fn url(&self) -> String {
        match self.sort_by.as_str() {
            "top" => "https://news.ycombinator.com/news".to_string(),
            "new" => "https://news.ycombinator.com/newest".to_string(),
            other => format!("https://news.ycombinator.com/{}", other),
        }
    }

    fn source_type(&self) -> SourceType {
        SourceType::HackerNews
    }

    async fn initialize(&mut self) -> Result<()> {
        if !SORT_ORDERS.contains(&self.sort_by.as_str()) {
            self.sort_by = "top".to_string();
        }
        if self.limit == 0 {
            bail!("limit must be >= 1");
        }
        self.client = Some(http_client(HeaderMap::new())?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = self.client.clone() else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let ids = tokio::select! {
            _ = sink.cancelled() => return,
            ids = fetch_story_ids(&client, &self.sort_by) => ids,
        };
        let ids = match ids {
            Ok(ids) if ids.is_empty() => {
                sink.error(anyhow::anyhow!("no stories found")).await;
                return;
            }
            Ok(ids) => ids.into_iter().take(self.limit).collect::<Vec<_>>(),
            Err(e) => {
                sink.error(e.context("fetching story ids")).await;
                return;
            }
        };

        let source_uid = self.uid();
        let fan_out = FanOut::new(move |id: u64| {
            let client = client.clone();
            let source_uid = source_uid.clone();
            async move {
                let url = format!("{}/item/{}.json", API_BASE, id);
                let item: Option<RawItem> = get_json(client.get(url))
                    .await
                    .with_context(|| format!("fetching story {}", id))?;
                Ok::<_, anyhow::Error>(item.and_then(|item| map_story(item, &source_uid)))
            }
        })
        .workers(self.workers);

        let results = tokio::select! {
            _ = sink.cancelled() => return,
            results = fan_out.run(ids) => results,
        };

        let batch = Batch::collect(results);
        for (_, err) in &batch.failures {
            tracing::warn!(source = %self.uid(), error = %format!("{:#}", err), "story fetch failed");
        }

        // Deleted or dead stories count as fetched, not failed.
        let (stories, outcome) = batch.into_parts();
        let posts: Vec<Activity> = stories.into_iter().flatten().collect();
        emit_batch(&sink, posts, outcome).await;
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

async fn fetch_story_ids(client: &reqwest::Client, sort_by: &str) -> Result<Vec<u64>> {
    let url = format!("{}/{}stories.json", API_BASE, sort_by);
    get_json(client.get(url)).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawItem {
    id: u64,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    descendants: u64,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

/// `None` for deleted, dead, untitled, or non-story items.
pub(crate) fn map_story(raw: RawItem, source_uid: &str) -> Option<Activity> {
    if raw.deleted || raw.dead {
        return None;
    }
    if !matches!(raw.kind.as_deref(), None | Some("story") | Some("job") | Some("poll")) {
        return None;
    }
    let title = raw.title.filter(|t| !t.trim().is_empty())?;
    let discussion_url = format!("https://news.ycombinator.com/item?id={}", raw.id);
    let created_at = Utc.timestamp_opt(raw.time, 0).single()?;

    Some(Activity::ForumPost(ForumPost {
        meta: ActivityMeta {
            uid: raw.id.to_string(),
            source_uid: source_uid.to_string(),
            source_type: SourceType::HackerNews,
            body: raw.text.unwrap_or_else(|| title.clone()),
            title,
            url: raw.url.unwrap_or_else(|| discussion_url.clone()),
            image_url: None,
            created_at,
        },
        discussion_url,
        author: raw.by,
        score: raw.score,
        comment_count: raw.descendants,
    }))
}
