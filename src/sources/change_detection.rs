//! changedetection.io watch adapter.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::executor::{Batch, FanOut};
use crate::models::{Activity, ActivityMeta, ChangeNotice};
use crate::source::{Source, StreamSink};
use crate::source_type::SourceType;
use crate::sources::{emit_batch, get_json, http_client, parse_rfc3339, sort_newest};

/// The latest detected change of each watch on a changedetection.io instance.
///
/// ```toml
/// [[sources]]
/// type = "change-detection"
/// instance_url = "https://changes.example.com"
/// watches = ["1d3f0b5e-4c52-4f0e-9d3b-5f1e0c6a7b21"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectionSource {
    pub instance_url: String,
    /// Watch UUIDs.
    pub watches: Vec<String>,
    /// Sent as `X-API-Key`.
    pub token: Option<String>,
    pub workers: usize,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for ChangeDetectionSource {
    fn default() -> Self {
        Self {
            instance_url: "https://www.changedetection.io".to_string(),
            watches: Vec::new(),
            token: None,
            workers: 4,
            client: None,
        }
    }
}

#[async_trait]
impl Source for ChangeDetectionSource {
    fn uid(&self) -> String {
        format!("{}/{}", SourceType::ChangeDetection, self.watches.join(","))
    }

    fn name(&self) -> String {
        "Change Detection".to_string()
    }

    fn url(&self) -> String {
        self.instance_url.clone()
    }

    fn source_type(&self) -> SourceType {
        SourceType::ChangeDetection
    }

    async fn initialize(&mut self) -> Result<()> {
        self.instance_url = self.instance_url.trim_end_matches('/').to_string();
        if self.instance_url.is_empty() {
            self.instance_url = Self::default().instance_url;
        }
        if self.watches.is_empty() {
            bail!("at least one watch is required");
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value =
                HeaderValue::from_str(token).context("API token is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert("X-API-Key", value);
        }

        self.client = Some(http_client(headers)?);
        Ok(())
    }

    async fn stream(&self, sink: StreamSink) {
        let Some(client) = self.client.clone() else {
            sink.error(anyhow::anyhow!("source '{}' is not initialized", self.uid()))
                .await;
            return;
        };

        let source_uid = self.uid();
        let instance_url = self.instance_url.clone();
        let fan_out = FanOut::new(move |watch: String| {
            let client = client.clone();
            let source_uid = source_uid.clone();
            let url = format!("{}/api/v1/watch/{}", instance_url, watch);
            async move {
                let raw: RawWatch = get_json(client.get(url))
                    .await
                    .with_context(|| format!("fetching watch {}", watch))?;
                map_watch(raw, &source_uid)
            }
        })
        .workers(self.workers);

        let results = tokio::select! {
            _ = sink.cancelled() => return,
            results = fan_out.run(self.watches.clone()) => results,
        };

        let batch = Batch::collect(results);
        for (index, err) in &batch.failures {
            tracing::warn!(
                source = %self.uid(),
                watch = %self.watches[*index],
                error = %format!("{:#}", err),
                "watch fetch failed"
            );
        }

        let (mut notices, outcome) = batch.into_parts();
        sort_newest(&mut notices);
        emit_batch(&sink, notices, outcome).await;
    }

    fn config(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWatch {
    #[serde(default)]
    title: Option<String>,
    url: String,
    /// Unix seconds on current instances, RFC 3339 on older ones.
    #[serde(default)]
    last_changed: Option<serde_json::Value>,
    #[serde(default)]
    diff_url: Option<String>,
    #[serde(default)]
    previous_hash: Option<String>,
}

fn parse_last_changed(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        serde_json::Value::String(s) => parse_rfc3339(s),
        _ => None,
    }
}

pub(crate) fn map_watch(raw: RawWatch, source_uid: &str) -> Result<Activity> {
    let Some(changed_at) = raw.last_changed.as_ref().and_then(parse_last_changed) else {
        bail!("watch {} has no recorded change", raw.url);
    };

    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| raw.url.clone());

    Ok(Activity::ChangeNotice(ChangeNotice {
        meta: ActivityMeta {
            uid: format!("{}-{}", raw.url, changed_at.timestamp()),
            source_uid: source_uid.to_string(),
            source_type: SourceType::ChangeDetection,
            title,
            body: String::new(),
            url: raw.url,
            image_url: None,
            created_at: changed_at,
        },
        diff_url: raw.diff_url,
        previous_hash: raw.previous_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_watch_with_unix_timestamp() {
        let raw: RawWatch = serde_json::from_value(serde_json::json!({
            "title": "Pricing page",
            "url": "https://example.com/pricing",
            "last_changed": 1717228800,
            "last_checked": 1717232400
        }))
        .unwrap();

        let activity = map_watch(raw, "change-detection/abc").unwrap();
        assert_eq!(activity.uid(), "https://example.com/pricing-1717228800");
        assert_eq!(activity.title(), "Pricing page");
        assert_eq!(activity.created_at().timestamp(), 1717228800);
    }

    #[test]
    fn test_map_watch_with_rfc3339_and_no_title() {
        let raw: RawWatch = serde_json::from_value(serde_json::json!({
            "title": null,
            "url": "https://example.com/status",
            "last_changed": "2024-06-01T08:00:00Z",
            "diff_url": "https://changes.example.com/diff/abc",
            "previous_hash": "9f86d081"
        }))
        .unwrap();

        let activity = map_watch(raw, "change-detection/abc").unwrap();
        let Activity::ChangeNotice(notice) = &activity else {
            panic!("expected a change notice");
        };
        assert_eq!(notice.meta.title, "https://example.com/status");
        assert_eq!(notice.diff_url.as_deref(), Some("https://changes.example.com/diff/abc"));
        assert_eq!(notice.previous_hash.as_deref(), Some("9f86d081"));
    }

    #[test]
    fn test_unchanged_watch_is_an_error() {
        let raw: RawWatch = serde_json::from_value(serde_json::json!({
            "url": "https://example.com/never",
            "last_changed": 0
        }))
        .unwrap();
        assert!(map_watch(raw, "change-detection/abc").is_err());
    }

    #[tokio::test]
    async fn test_initialize_requires_watches() {
        let mut source = ChangeDetectionSource::default();
        let err = source.initialize().await.unwrap_err();
        assert!(err.to_string().contains("watch"));
    }
}
