//! Activity and source repositories, and the search ranking they share.
//!
//! Two backends implement both [`ActivityStore`] and [`SourceStore`]:
//! - **[`MemoryStore`]**: process-local maps, for tests and ephemeral runs.
//! - **[`SqliteStore`]**: the persisted layout created by
//!   [`migrate::run_migrations`](crate::migrate::run_migrations).
//!
//! # Ranking
//!
//! [`rank`] is the single implementation of the search algorithm:
//!
//! 1. Keep rows whose `source_uid` is in the allow-list (all rows if empty).
//! 2. With a query embedding, `similarity = cosine(row, query)`, and rows
//!    below `min_similarity` are dropped when it is `> 0`. Without one,
//!    similarity is `0` for every row.
//! 3. Order by the requested [`SearchOrder`]. `Similarity` without a query
//!    embedding orders like `Newest`.
//! 4. Ties break on `created_at` descending, then `uid` ascending.
//! 5. Truncate to `limit`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{Activity, DecoratedActivity, SearchOrder, SearchRequest};
use crate::source::{build_source, Source};
use crate::source_type::SourceType;

/// Persistence for decorated activities. Append-only: there is no upsert.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if the UID is already stored and
    /// with [`StoreError::KindMismatch`] if the variant does not match its
    /// source type.
    async fn add(&self, activity: DecoratedActivity) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if the UID is not stored.
    async fn remove(&self, uid: &str) -> Result<(), StoreError>;

    /// All activities, newest first.
    async fn list(&self) -> Result<Vec<DecoratedActivity>, StoreError>;

    async fn contains(&self, uid: &str) -> Result<bool, StoreError>;

    /// Ranked search; see the [module docs](self).
    async fn search(&self, request: &SearchRequest) -> Result<Vec<DecoratedActivity>, StoreError>;
}

/// Persistence for registered sources.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if the UID is already stored.
    async fn add(&self, record: SourceRecord) -> Result<(), StoreError>;

    async fn remove(&self, uid: &str) -> Result<(), StoreError>;

    /// All sources, ordered by UID.
    async fn list(&self) -> Result<Vec<SourceRecord>, StoreError>;

    async fn get_by_id(&self, uid: &str) -> Result<SourceRecord, StoreError>;
}

/// A source as persisted: identity, presentation fields, type tag, and its
/// configuration in generic structured form.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub uid: String,
    pub name: String,
    pub url: String,
    pub source_type: SourceType,
    pub config: serde_json::Value,
}

impl SourceRecord {
    pub fn from_source(source: &dyn Source) -> Result<Self, StoreError> {
        Ok(Self {
            uid: source.uid(),
            name: source.name(),
            url: source.url(),
            source_type: source.source_type(),
            config: source.config()?,
        })
    }

    /// Build a fresh, uninitialized source from the stored configuration.
    pub fn rebuild(&self) -> Result<Box<dyn Source>, StoreError> {
        build_source(self.source_type.as_str(), self.config.clone()).map_err(|e| {
            StoreError::Rebuild {
                uid: self.uid.clone(),
                reason: format!("{:#}", e),
            }
        })
    }
}

/// Reject an activity whose variant differs from the one its source type
/// decodes to.
pub(crate) fn check_kind(activity: &Activity) -> Result<(), StoreError> {
    let source_type = activity.source_type();
    if activity.kind() != source_type.activity_kind() {
        return Err(StoreError::KindMismatch {
            uid: activity.uid().to_string(),
            source_type,
            kind: activity.kind(),
        });
    }
    Ok(())
}

/// Rank candidate rows for a search request.
pub fn rank(candidates: Vec<DecoratedActivity>, request: &SearchRequest) -> Vec<DecoratedActivity> {
    let query = request
        .query_embedding
        .as_deref()
        .filter(|q| !q.is_empty());

    let mut rows: Vec<DecoratedActivity> = candidates
        .into_iter()
        .filter(|row| {
            request.source_uids.is_empty()
                || request.source_uids.iter().any(|uid| uid == row.source_uid())
        })
        .map(|mut row| {
            row.similarity = match query {
                Some(q) => cosine_similarity(&row.embedding, q),
                None => 0.0,
            };
            row
        })
        .filter(|row| {
            query.is_none()
                || request.min_similarity <= 0.0
                || row.similarity >= request.min_similarity
        })
        .collect();

    let order = match (request.order, query) {
        (SearchOrder::Similarity, None) => SearchOrder::Newest,
        (order, _) => order,
    };

    rows.sort_by(|a, b| compare(a, b, order));
    rows.truncate(request.limit);
    rows
}

fn compare(a: &DecoratedActivity, b: &DecoratedActivity, order: SearchOrder) -> Ordering {
    let primary = match order {
        SearchOrder::Similarity => b.similarity.total_cmp(&a.similarity),
        SearchOrder::Newest => b.created_at().cmp(&a.created_at()),
        SearchOrder::Oldest => a.created_at().cmp(&b.created_at()),
    };
    primary
        .then_with(|| b.created_at().cmp(&a.created_at()))
        .then_with(|| a.uid().cmp(b.uid()))
}

/// Newest first, then UID; the order of [`ActivityStore::list`].
pub(crate) fn sort_for_listing(rows: &mut [DecoratedActivity]) {
    rows.sort_by(|a, b| compare(a, b, SearchOrder::Newest));
}


#[cfg(test)]
mod tests {
    use super::fixtures::{post, unit};
    use super::*;

    fn request(min_similarity: f32, limit: usize) -> SearchRequest {
        SearchRequest {
            query_embedding: Some(vec![1.0, 0.0]),
            min_similarity,
            limit,
            ..Default::default()
        }
    }

    fn corpus() -> Vec<DecoratedActivity> {
        vec![
            post("low", "hacker-news/top", 3, unit(0.1)),
            post("high", "hacker-news/top", 1, unit(0.9)),
            post("mid", "hacker-news/new", 2, unit(0.5)),
        ]
    }

    fn uids(rows: &[DecoratedActivity]) -> Vec<&str> {
        rows.iter().map(|r| r.uid()).collect()
    }

    #[test]
    fn test_min_similarity_keeps_the_two_closest() {
        let rows = rank(corpus(), &request(0.4, 10));
        assert_eq!(uids(&rows), vec!["high", "mid"]);
        assert!((rows[0].similarity - 0.9).abs() < 1e-4);
        assert!((rows[1].similarity - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_raising_threshold_never_grows_or_reorders() {
        let mut previous: Option<Vec<String>> = None;
        for min in [0.0, 0.05, 0.3, 0.6, 0.95] {
            let current: Vec<String> = rank(corpus(), &request(min, 10))
                .iter()
                .map(|r| r.uid().to_string())
                .collect();
            if let Some(prev) = &previous {
                assert!(current.len() <= prev.len());
                let surviving: Vec<&String> = prev.iter().filter(|u| current.contains(u)).collect();
                assert_eq!(surviving, current.iter().collect::<Vec<_>>());
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_without_embedding_similarity_is_zero_and_order_is_temporal() {
        let mut req = SearchRequest::default();
        let rows = rank(corpus(), &req);
        assert_eq!(uids(&rows), vec!["low", "mid", "high"]);
        assert!(rows.iter().all(|r| r.similarity == 0.0));

        req.order = SearchOrder::Oldest;
        req.min_similarity = 0.99;
        let rows = rank(corpus(), &req);
        assert_eq!(uids(&rows), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_newest_order_still_applies_similarity_filter() {
        let mut req = request(0.4, 10);
        req.order = SearchOrder::Newest;
        let rows = rank(corpus(), &req);
        assert_eq!(uids(&rows), vec!["mid", "high"]);
        assert!(rows[0].similarity > 0.0);
    }

    #[test]
    fn test_source_allow_list_and_limit() {
        let mut req = request(0.0, 10);
        req.source_uids = vec!["hacker-news/new".to_string()];
        assert_eq!(uids(&rank(corpus(), &req)), vec!["mid"]);

        let rows = rank(corpus(), &request(0.0, 1));
        assert_eq!(uids(&rows), vec!["high"]);
    }

    #[test]
    fn test_equal_similarity_breaks_ties_by_time_then_uid() {
        let rows = vec![
            post("b", "s", 1, unit(0.7)),
            post("a", "s", 1, unit(0.7)),
            post("c", "s", 2, unit(0.7)),
        ];
        let ranked = rank(rows.clone(), &request(0.0, 10));
        assert_eq!(uids(&ranked), vec!["c", "a", "b"]);

        let again = rank(rows, &request(0.0, 10));
        assert_eq!(uids(&again), uids(&ranked));
    }
}
