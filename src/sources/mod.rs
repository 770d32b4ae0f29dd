//! Concrete source adapters, one per [`SourceType`](crate::source_type::SourceType).
//!
//! | Tag | Adapter | Fans out over |
//! |-----|---------|---------------|
//! | `rss-feed` | [`RssFeedSource`] | |
//! | `github-releases` | [`GithubReleasesSource`] | repositories |
//! | `github-issues` | [`GithubIssuesSource`] | repositories |
//! | `hacker-news` | [`HackerNewsSource`] | story ids |
//! | `mastodon-tag` | [`MastodonTagSource`] | |
//! | `change-detection` | [`ChangeDetectionSource`] | watches |
//!
//! Each adapter keeps the HTTP call and the payload mapping apart; the
//! mapping functions are pure and tested without network access.

pub mod change_detection;
pub mod github;
pub mod hackernews;
pub mod mastodon;
pub mod rss;

pub use change_detection::ChangeDetectionSource;
pub use github::{GithubIssuesSource, GithubReleasesSource};
pub use hackernews::HackerNewsSource;
pub use mastodon::MastodonTagSource;
pub use rss::RssFeedSource;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::BatchError;
use crate::models::Activity;
use crate::source::StreamSink;

pub(crate) const USER_AGENT: &str = concat!("pulse/", env!("CARGO_PKG_VERSION"));

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Client shared by every request of one source.
pub(crate) fn http_client(headers: HeaderMap) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// Send a request and decode a JSON body, failing on non-2xx status.
pub(crate) async fn get_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("GET {} returned {}: {}", url, status, truncate(&body, 200));
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to decode response from {}", url))
}

/// Send a request and return the body text, failing on non-2xx status.
pub(crate) async fn get_text(request: reqwest::RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        bail!("GET {} returned {}", response.url(), status);
    }
    Ok(response.text().await?)
}

/// Emit a fan-out batch: every usable activity, then the batch
/// classification if the batch was not a full success.
pub(crate) async fn emit_batch(
    sink: &StreamSink,
    activities: Vec<Activity>,
    outcome: Option<BatchError>,
) {
    if !emit_all(sink, activities).await {
        return;
    }
    if let Some(err) = outcome {
        sink.error(err.into()).await;
    }
}

/// Emit activities in order; `false` once the sink stops accepting.
pub(crate) async fn emit_all(sink: &StreamSink, activities: Vec<Activity>) -> bool {
    for activity in activities {
        if !sink.activity(activity).await {
            return false;
        }
    }
    true
}

pub(crate) fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Newest first.
pub(crate) fn sort_newest(activities: &mut [Activity]) {
    activities.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_normalizes_to_utc() {
        let parsed = parse_rfc3339("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(parse_rfc3339("yesterday").is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
