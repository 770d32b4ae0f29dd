//! Core data models shared by sources, the ingestion pipeline, and storage.
//!
//! An [`Activity`] is a single unit of external content normalized to a
//! common read-only shape. Each variant carries the common [`ActivityMeta`]
//! plus fields specific to its origin. After enrichment it becomes a
//! [`DecoratedActivity`], the unit that is persisted and searched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::source_type::{ActivityKind, SourceType};

/// Fields every activity carries regardless of its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMeta {
    /// Unique within the source type.
    pub uid: String,
    /// UID of the [`Source`](crate::source::Source) that emitted this activity.
    pub source_uid: String,
    pub source_type: SourceType,
    pub title: String,
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// The activity's own timestamp, not the ingestion time.
    pub created_at: DateTime<Utc>,
}

/// An item from an RSS feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    pub feed_url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A published release of a code repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    pub repository: String,
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
}

/// An issue or pull request that saw recent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    pub repository: String,
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comments: u64,
}

/// A link or discussion post on a forum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    pub discussion_url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub comment_count: u64,
}

/// A status posted on a social timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    pub account: String,
    #[serde(default)]
    pub reblogs: u64,
    #[serde(default)]
    pub favourites: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A detected change on a watched web page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    #[serde(flatten)]
    pub meta: ActivityMeta,
    #[serde(default)]
    pub diff_url: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
}

/// A normalized unit of external content, one variant per kind of origin.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    FeedItem(FeedItem),
    Release(Release),
    Issue(Issue),
    ForumPost(ForumPost),
    StatusUpdate(StatusUpdate),
    ChangeNotice(ChangeNotice),
}

impl Activity {
    pub fn meta(&self) -> &ActivityMeta {
        match self {
            Activity::FeedItem(a) => &a.meta,
            Activity::Release(a) => &a.meta,
            Activity::Issue(a) => &a.meta,
            Activity::ForumPost(a) => &a.meta,
            Activity::StatusUpdate(a) => &a.meta,
            Activity::ChangeNotice(a) => &a.meta,
        }
    }

    pub fn kind(&self) -> ActivityKind {
        match self {
            Activity::FeedItem(_) => ActivityKind::FeedItem,
            Activity::Release(_) => ActivityKind::Release,
            Activity::Issue(_) => ActivityKind::Issue,
            Activity::ForumPost(_) => ActivityKind::ForumPost,
            Activity::StatusUpdate(_) => ActivityKind::StatusUpdate,
            Activity::ChangeNotice(_) => ActivityKind::ChangeNotice,
        }
    }

    pub fn uid(&self) -> &str {
        &self.meta().uid
    }

    pub fn source_uid(&self) -> &str {
        &self.meta().source_uid
    }

    pub fn source_type(&self) -> SourceType {
        self.meta().source_type
    }

    pub fn title(&self) -> &str {
        &self.meta().title
    }

    pub fn body(&self) -> &str {
        &self.meta().body
    }

    pub fn url(&self) -> &str {
        &self.meta().url
    }

    pub fn image_url(&self) -> Option<&str> {
        self.meta().image_url.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }

    /// Serialize the variant payload for storage.
    ///
    /// The output carries no variant tag; [`decode_activity`](crate::source_type::decode_activity)
    /// picks the variant from the row's source type.
    pub fn to_raw_json(&self) -> serde_json::Result<String> {
        match self {
            Activity::FeedItem(a) => serde_json::to_string(a),
            Activity::Release(a) => serde_json::to_string(a),
            Activity::Issue(a) => serde_json::to_string(a),
            Activity::ForumPost(a) => serde_json::to_string(a),
            Activity::StatusUpdate(a) => serde_json::to_string(a),
            Activity::ChangeNotice(a) => serde_json::to_string(a),
        }
    }
}

/// Text produced once by the summarizer; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActivitySummary {
    pub short_summary: String,
    pub full_summary: String,
}

/// An activity plus its enrichment, the unit stored and searched.
///
/// The summary is not optional: an activity is only decorated after it has
/// been summarized. `similarity` is a query-time projection and is never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedActivity {
    pub activity: Activity,
    pub summary: ActivitySummary,
    pub embedding: Vec<f32>,
    pub similarity: f32,
}

impl DecoratedActivity {
    pub fn new(activity: Activity, summary: ActivitySummary) -> Self {
        Self {
            activity,
            summary,
            embedding: Vec::new(),
            similarity: 0.0,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn uid(&self) -> &str {
        self.activity.uid()
    }

    pub fn source_uid(&self) -> &str {
        self.activity.source_uid()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.activity.created_at()
    }
}

/// How search results are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    /// Most similar first; falls back to [`SearchOrder::Newest`] when the
    /// request has no query embedding.
    #[default]
    Similarity,
    Newest,
    Oldest,
}

impl FromStr for SearchOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(SearchOrder::Similarity),
            "newest" | "date" => Ok(SearchOrder::Newest),
            "oldest" => Ok(SearchOrder::Oldest),
            other => anyhow::bail!(
                "Unknown search order: '{}'. Use similarity, newest, or oldest.",
                other
            ),
        }
    }
}

/// Inputs to a ranked search over the stored corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Rank by similarity to this vector when present.
    pub query_embedding: Option<Vec<f32>>,
    /// Drop rows below this similarity; `0.0` disables the filter.
    pub min_similarity: f32,
    /// Restrict to these sources; empty means all.
    pub source_uids: Vec<String>,
    /// Maximum rows returned. Callers clamp this before searching.
    pub limit: usize,
    pub order: SearchOrder,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query_embedding: None,
            min_similarity: 0.0,
            source_uids: Vec::new(),
            limit: 20,
            order: SearchOrder::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_type::decode_activity;
    use chrono::TimeZone;

    fn sample_release() -> Activity {
        Activity::Release(Release {
            meta: ActivityMeta {
                uid: "github-releases/rust-lang/rust/123".to_string(),
                source_uid: "github-releases/rust-lang/rust".to_string(),
                source_type: SourceType::GithubReleases,
                title: "Rust 1.80.0".to_string(),
                body: "Lazy cells are stable.".to_string(),
                url: "https://github.com/rust-lang/rust/releases/tag/1.80.0".to_string(),
                image_url: None,
                created_at: Utc.with_ymd_and_hms(2024, 7, 25, 15, 0, 0).unwrap(),
            },
            repository: "rust-lang/rust".to_string(),
            tag_name: "1.80.0".to_string(),
            prerelease: false,
        })
    }

    #[test]
    fn raw_payload_rebuilds_the_same_variant() {
        let activity = sample_release();
        let raw = activity.to_raw_json().unwrap();
        assert!(!raw.contains("\"Release\""), "payload must be untagged");

        let decoded = decode_activity(SourceType::GithubReleases, &raw).unwrap();
        assert_eq!(decoded, activity);
        assert_eq!(decoded.kind(), ActivityKind::Release);
    }

    #[test]
    fn decorated_activity_starts_without_similarity() {
        let decorated = DecoratedActivity::new(sample_release(), ActivitySummary::default());
        assert_eq!(decorated.similarity, 0.0);
        assert!(decorated.embedding.is_empty());
        assert_eq!(decorated.uid(), "github-releases/rust-lang/rust/123");
    }

    #[test]
    fn search_order_parses_aliases() {
        assert_eq!("date".parse::<SearchOrder>().unwrap(), SearchOrder::Newest);
        assert_eq!(
            "similarity".parse::<SearchOrder>().unwrap(),
            SearchOrder::Similarity
        );
        assert!("random".parse::<SearchOrder>().is_err());
    }
}
