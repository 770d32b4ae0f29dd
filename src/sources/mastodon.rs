//! Mastodon public tag timeline adapter.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::models::{Activity, ActivityMeta, StatusUpdate};
use crate::source::{Source, StreamSink};
use crate::source_type::SourceType;
use crate::sources::{emit_all, get_json, http_client};
use crate::summarize::clean_text;

const TITLE_MAX_CHARS: usize = 80;

/// ```toml
/// [[sources]]
/// type = "mastodon-tag"
/// instance_url = "https://fosstodon.org"
/// tag = "rustlang"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MastodonTagSource {
    pub instance_url: String,
    /// Hashtag without the leading `#`.
    pub tag: String,
    pub limit: usize,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for MastodonTagSource {
    fn default() -> Self {
        Self {
            instance_url: "https://mastodon.social".to_string(),
            tag: String::new(),
            limit: 20,
            client: None,
        }
    }
}

#[async_trait]
impl Source for MastodonTagSource {
    fn uid(&self) -> String {
        format!("{}/{}/{}", SourceType::MastodonTag, self.instance_url, self.tag)
    }

    fn name(&self) -> String {
        format!("Mastodon (#{})", self.tag)
    }

    fn url(&self) -> String {
        format!("{}/tags/{}", self.instance_url, self.tag)
    }

    fn source_type(&self) -> SourceType {
        SourceType::MastodonTag
    }

    async fn initialize(&mut self) -> Result<()> {
        self.instance_url = self.instance_url.trim_end_matches('/').to_string();
        self.tag = self.tag.trim_start_matches('#').to_string();

        if self.instance_url.is_empty() {
            bail!("instance URL is required");
        }
        if self.tag.is_empty() {
            bail!("tag is required");
        }
        if self.limit == 0 || self.limit > 40 {
            self.limit = 20;
        }

        self.client = Some(http_client(HeaderMap::new())?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = &self.client else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let url = format!(
            "{}/api/v1/timelines/tag/{}?limit={}",
            self.instance_url, self.tag, self.limit
        );
        let statuses = tokio::select! {
            _ = sink.cancelled() => return,
            statuses = get_json::<Vec<RawStatus>>(client.get(url)) => statuses,
        };

        match statuses {
            Ok(statuses) => {
                let source_uid = self.uid();
                let updates = statuses
                    .into_iter()
                    .map(|s| map_status(s, &source_uid))
                    .collect();
                emit_all(&sink, updates).await;
            }
            Err(e) => {
                sink.error(e.context(format!("fetching #{} timeline", self.tag)))
                    .await;
            }
        }
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawStatus {
    uri: String,
    #[serde(default)]
    url: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    content: String,
    account: RawAccount,
    #[serde(default)]
    reblogs_count: u64,
    #[serde(default)]
    favourites_count: u64,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    media_attachments: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAccount {
    acct: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTag {
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMedia {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    preview_url: Option<String>,
}

pub(crate) fn map_status(raw: RawStatus, source_uid: &str) -> Activity {
    let text = clean_text(&raw.content);
    let title = if text.chars().count() > TITLE_MAX_CHARS {
        let cut: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("@{}: {}…", raw.account.acct, cut.trim_end())
    } else {
        format!("@{}: {}", raw.account.acct, text)
    };

    let image_url = raw
        .media_attachments
        .into_iter()
        .find(|m| m.kind == "image")
        .and_then(|m| m.preview_url);

    Activity::StatusUpdate(StatusUpdate {
        meta: ActivityMeta {
            url: raw.url.unwrap_or_else(|| raw.uri.clone()),
            uid: raw.uri,
            source_uid: source_uid.to_string(),
            source_type: SourceType::MastodonTag,
            title,
            body: raw.content,
            image_url,
            created_at: raw.created_at,
        },
        account: raw.account.acct,
        reblogs: raw.reblogs_count,
        favourites: raw.favourites_count,
        tags: raw.tags.into_iter().map(|t| t.name).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status() {
        let raw: RawStatus = serde_json::from_value(serde_json::json!({
            "id": "112233",
            "uri": "https://fosstodon.org/users/ferris/statuses/112233",
            "url": "https://fosstodon.org/@ferris/112233",
            "created_at": "2024-06-01T09:30:00.000Z",
            "content": "<p>Shipped a new crate! <a href=\"https://fosstodon.org/tags/rustlang\">#<span>rustlang</span></a></p>",
            "account": { "acct": "ferris", "avatar": "https://x/a.png" },
            "reblogs_count": 4,
            "favourites_count": 12,
            "tags": [{ "name": "rustlang", "url": "https://fosstodon.org/tags/rustlang" }],
            "media_attachments": [
                { "type": "video", "preview_url": "https://x/v.png" },
                { "type": "image", "preview_url": "https://x/i.png" }
            ]
        }))
        .unwrap();

        let activity = map_status(raw, "mastodon-tag/https://fosstodon.org/rustlang");
        let Activity::StatusUpdate(status) = &activity else {
            panic!("expected a status update");
        };
        assert_eq!(status.meta.uid, "https://fosstodon.org/users/ferris/statuses/112233");
        assert_eq!(status.meta.url, "https://fosstodon.org/@ferris/112233");
        assert_eq!(status.meta.title, "@ferris: Shipped a new crate! # rustlang");
        assert_eq!(status.meta.image_url.as_deref(), Some("https://x/i.png"));
        assert_eq!(status.tags, vec!["rustlang"]);
        assert_eq!(status.favourites, 12);
    }

    #[tokio::test]
    async fn test_initialize_normalizes_tag_and_instance() {
        let mut source = MastodonTagSource {
            instance_url: "https://fosstodon.org/".to_string(),
            tag: "#rustlang".to_string(),
            ..Default::default()
        };
        source.initialize().await.unwrap();
        assert_eq!(source.uid(), "mastodon-tag/https://fosstodon.org/rustlang");
        assert_eq!(source.url(), "https://fosstodon.org/tags/rustlang");
    }

    #[tokio::test]
    async fn test_initialize_requires_tag() {
        let mut source = MastodonTagSource::default();
        assert!(source.initialize().await.is_err());
    }
}
