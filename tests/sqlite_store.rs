use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use pulse::error::StoreError;
use pulse::models::{
    Activity, ActivityMeta, ActivitySummary, DecoratedActivity, Issue, Release, SearchOrder,
    SearchRequest,
};
use pulse::source_type::SourceType;
use pulse::store::{ActivityStore, SourceRecord, SourceStore, SqliteStore};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn unit(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt()]
}

fn issue(uid: &str, source_uid: &str, created: i64, embedding: Vec<f32>) -> DecoratedActivity {
    let activity = Activity::Issue(Issue {
        meta: ActivityMeta {
            uid: uid.to_string(),
            source_uid: source_uid.to_string(),
            source_type: SourceType::GithubIssues,
            title: format!("Issue {}", uid),
            body: "Steps to reproduce".to_string(),
            url: format!("https://github.com/{}", uid),
            image_url: None,
            created_at: at(created),
        },
        repository: "tokio-rs/tokio".to_string(),
        number: 42,
        state: "open".to_string(),
        labels: vec!["bug".to_string()],
        comments: 3,
    });
    DecoratedActivity::new(
        activity,
        ActivitySummary {
            short_summary: format!("short {}", uid),
            full_summary: format!("full {}", uid),
        },
    )
    .with_embedding(embedding)
}

fn release(uid: &str, created: i64) -> DecoratedActivity {
    let activity = Activity::Release(Release {
        meta: ActivityMeta {
            uid: uid.to_string(),
            source_uid: "github-releases/tokio-rs/tokio".to_string(),
            source_type: SourceType::GithubReleases,
            title: "tokio-rs/tokio tokio-1.40.0".to_string(),
            body: "Fixes".to_string(),
            url: "https://github.com/tokio-rs/tokio/releases/tag/tokio-1.40.0".to_string(),
            image_url: Some("https://avatars.githubusercontent.com/u/1".to_string()),
            created_at: at(created),
        },
        repository: "tokio-rs/tokio".to_string(),
        tag_name: "tokio-1.40.0".to_string(),
        prerelease: false,
    });
    DecoratedActivity::new(activity, ActivitySummary::default())
}

/// An issue created `micros` microseconds after the base timestamp.
fn issue_at_micros(uid: &str, micros: i64) -> DecoratedActivity {
    let mut row = issue(uid, "gh", 0, Vec::new());
    if let Activity::Issue(i) = &mut row.activity {
        i.meta.created_at = at(0) + Duration::microseconds(micros);
    }
    row
}

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("data/pulse.sqlite"))
        .await
        .unwrap();
    (tmp, store)
}

#[tokio::test]
async fn test_add_and_list_reconstructs_variants() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, issue("tokio#1", "gh", 10, unit(0.5)))
        .await
        .unwrap();
    ActivityStore::add(&store, release("9001", 20)).await.unwrap();

    let rows = ActivityStore::list(&store).await.unwrap();
    assert_eq!(rows.len(), 2);

    // Newest first.
    assert_eq!(rows[0].uid(), "9001");
    assert!(matches!(&rows[0].activity, Activity::Release(r) if r.tag_name == "tokio-1.40.0"));
    assert!(rows[0].embedding.is_empty());

    match &rows[1].activity {
        Activity::Issue(i) => {
            assert_eq!(i.labels, vec!["bug".to_string()]);
            assert_eq!(i.meta.created_at, at(10));
        }
        other => panic!("expected issue, got {:?}", other.kind()),
    }
    assert_eq!(rows[1].summary.full_summary, "full tokio#1");
    assert_eq!(rows[1].embedding, unit(0.5));
    assert_eq!(rows[1].similarity, 0.0);
}

#[tokio::test]
async fn test_duplicate_activity_is_a_conflict() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, issue("a", "gh", 1, Vec::new()))
        .await
        .unwrap();

    let err = ActivityStore::add(&store, issue("a", "gh", 2, Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(uid) if uid == "a"));
    assert_eq!(ActivityStore::list(&store).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mismatched_kind_is_rejected_before_write() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, release("9001", 1)).await.unwrap();

    let mut mislabeled = release("9002", 2);
    if let Activity::Release(r) = &mut mislabeled.activity {
        r.meta.source_type = SourceType::HackerNews;
    }
    let err = ActivityStore::add(&store, mislabeled).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::KindMismatch { ref uid, source_type: SourceType::HackerNews, .. } if uid == "9002"
    ));

    // The store stays readable.
    let rows = ActivityStore::list(&store).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].uid(), "9001");
    let found = store
        .search(&SearchRequest {
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_remove_and_contains() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, issue("a", "gh", 1, Vec::new()))
        .await
        .unwrap();
    assert!(store.contains("a").await.unwrap());

    ActivityStore::remove(&store, "a").await.unwrap();
    assert!(!store.contains("a").await.unwrap());
    assert!(matches!(
        ActivityStore::remove(&store, "a").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_search_filters_by_min_similarity() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, issue("low", "gh", 3, unit(0.1)))
        .await
        .unwrap();
    ActivityStore::add(&store, issue("high", "gh", 1, unit(0.9)))
        .await
        .unwrap();
    ActivityStore::add(&store, issue("mid", "gh", 2, unit(0.5)))
        .await
        .unwrap();

    let request = SearchRequest {
        query_embedding: Some(vec![1.0, 0.0]),
        min_similarity: 0.4,
        limit: 10,
        ..Default::default()
    };
    let rows = store.search(&request).await.unwrap();
    let uids: Vec<&str> = rows.iter().map(|r| r.uid()).collect();
    assert_eq!(uids, vec!["high", "mid"]);
    assert!((rows[0].similarity - 0.9).abs() < 1e-5);
    assert!((rows[1].similarity - 0.5).abs() < 1e-5);

    // Same request, same answer.
    let again = store.search(&request).await.unwrap();
    let again_uids: Vec<&str> = again.iter().map(|r| r.uid()).collect();
    assert_eq!(again_uids, uids);
}

#[tokio::test]
async fn test_search_without_query_is_temporal() {
    let (_tmp, store) = open_store().await;
    for (uid, source, created) in [("a", "one", 1), ("b", "two", 2), ("c", "one", 3), ("d", "one", 4)]
    {
        ActivityStore::add(&store, issue(uid, source, created, unit(0.7)))
            .await
            .unwrap();
    }

    let oldest = store
        .search(&SearchRequest {
            source_uids: vec!["one".to_string()],
            limit: 2,
            order: SearchOrder::Oldest,
            ..Default::default()
        })
        .await
        .unwrap();
    let uids: Vec<&str> = oldest.iter().map(|r| r.uid()).collect();
    assert_eq!(uids, vec!["a", "c"]);
    assert!(oldest.iter().all(|r| r.similarity == 0.0));

    let newest = store
        .search(&SearchRequest {
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    let uids: Vec<&str> = newest.iter().map(|r| r.uid()).collect();
    assert_eq!(uids, vec!["d", "c", "b", "a"]);
}

#[tokio::test]
async fn test_temporal_limit_uses_full_timestamp_precision() {
    let (_tmp, store) = open_store().await;
    // Same millisecond; "b" is newer by 800 microseconds.
    ActivityStore::add(&store, issue_at_micros("a", 100))
        .await
        .unwrap();
    ActivityStore::add(&store, issue_at_micros("b", 900))
        .await
        .unwrap();

    let newest = store
        .search(&SearchRequest {
            limit: 1,
            order: SearchOrder::Newest,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(newest[0].uid(), "b");

    let oldest = store
        .search(&SearchRequest {
            limit: 1,
            order: SearchOrder::Oldest,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(oldest[0].uid(), "a");
}

#[tokio::test]
async fn test_large_source_allow_list() {
    let (_tmp, store) = open_store().await;
    ActivityStore::add(&store, issue("wanted", "gh/wanted", 1, Vec::new()))
        .await
        .unwrap();
    ActivityStore::add(&store, issue("other", "gh/other", 2, Vec::new()))
        .await
        .unwrap();

    let mut source_uids: Vec<String> = (0..40_000).map(|i| format!("gh/{}", i)).collect();
    source_uids.push("gh/wanted".to_string());

    let rows = store
        .search(&SearchRequest {
            source_uids,
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    let uids: Vec<&str> = rows.iter().map(|r| r.uid()).collect();
    assert_eq!(uids, vec!["wanted"]);
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("pulse.sqlite");

    let store = SqliteStore::open(&path).await.unwrap();
    ActivityStore::add(&store, issue("kept", "gh", 1, unit(0.3)))
        .await
        .unwrap();
    store.close().await;

    let reopened = SqliteStore::open(&path).await.unwrap();
    let rows = ActivityStore::list(&reopened).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].uid(), "kept");
}

#[tokio::test]
async fn test_source_records_round_trip() {
    let (_tmp, store) = open_store().await;
    let record = SourceRecord {
        uid: "rss-feed/https://blog.rust-lang.org/feed.xml".to_string(),
        name: "Rust Blog".to_string(),
        url: "https://blog.rust-lang.org/feed.xml".to_string(),
        source_type: SourceType::RssFeed,
        config: serde_json::json!({ "url": "https://blog.rust-lang.org/feed.xml" }),
    };
    SourceStore::add(&store, record.clone()).await.unwrap();
    assert!(matches!(
        SourceStore::add(&store, record.clone()).await,
        Err(StoreError::Conflict(_))
    ));

    let fetched = store.get_by_id(&record.uid).await.unwrap();
    assert_eq!(fetched, record);
    assert_eq!(SourceStore::list(&store).await.unwrap(), vec![record.clone()]);

    let rebuilt = fetched.rebuild().unwrap();
    assert_eq!(rebuilt.uid(), record.uid);
    assert_eq!(rebuilt.source_type(), SourceType::RssFeed);

    SourceStore::remove(&store, &record.uid).await.unwrap();
    assert!(matches!(
        store.get_by_id(&record.uid).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        SourceStore::remove(&store, &record.uid).await,
        Err(StoreError::NotFound(_))
    ));
}
