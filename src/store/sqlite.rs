//! SQLite repositories over the tables created by
//! [`run_migrations`](crate::migrate::run_migrations).
//!
//! Similarity is computed in Rust over the candidate rows: the source
//! allow-list is applied in SQL as a single JSON array parameter, and the
//! embeddings are decoded from BLOBs and ranked with [`rank`]. Ordering and
//! limiting also happen in [`rank`], over the full-precision timestamps in
//! `raw_json`; the `created_at` column only holds milliseconds.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::StoreError;
use crate::migrate;
use crate::models::{ActivitySummary, DecoratedActivity, SearchRequest};
use crate::source_type::{decode_activity, SourceType};
use crate::store::{check_kind, rank, ActivityStore, SourceRecord, SourceStore};

const ACTIVITY_COLUMNS: &str =
    "uid, source_type, raw_json, short_summary, full_summary, embedding";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database file and apply migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn conflict_or(err: sqlx::Error, uid: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(uid.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn decode_activity_row(row: &SqliteRow) -> Result<DecoratedActivity, StoreError> {
    let source_type: SourceType = row.try_get::<String, _>("source_type")?.parse()?;
    let raw_json: String = row.try_get("raw_json")?;
    let activity = decode_activity(source_type, &raw_json)?;

    let summary = ActivitySummary {
        short_summary: row.try_get("short_summary")?,
        full_summary: row.try_get("full_summary")?,
    };
    let embedding = row
        .try_get::<Option<Vec<u8>>, _>("embedding")?
        .map(|blob| blob_to_vec(&blob))
        .unwrap_or_default();

    Ok(DecoratedActivity::new(activity, summary).with_embedding(embedding))
}

#[async_trait]
impl ActivityStore for SqliteStore {
    async fn add(&self, activity: DecoratedActivity) -> Result<(), StoreError> {
        let a = &activity.activity;
        check_kind(a)?;
        let raw_json = a.to_raw_json()?;
        let embedding = (!activity.embedding.is_empty()).then(|| vec_to_blob(&activity.embedding));

        sqlx::query(
            r#"
            INSERT INTO activities (uid, source_uid, source_type, title, body, url, image_url,
                                    created_at, short_summary, full_summary, raw_json, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(a.uid())
        .bind(a.source_uid())
        .bind(a.source_type().as_str())
        .bind(a.title())
        .bind(a.body())
        .bind(a.url())
        .bind(a.image_url())
        .bind(a.created_at().timestamp_millis())
        .bind(&activity.summary.short_summary)
        .bind(&activity.summary.full_summary)
        .bind(&raw_json)
        .bind(embedding)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, a.uid()))?;

        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM activities WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DecoratedActivity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM activities ORDER BY created_at DESC, uid ASC",
            ACTIVITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_activity_row).collect()
    }

    async fn contains(&self, uid: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM activities WHERE uid = ?")
            .bind(uid)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<DecoratedActivity>, StoreError> {
        let mut sql = format!("SELECT {} FROM activities", ACTIVITY_COLUMNS);
        let allow_list = if request.source_uids.is_empty() {
            None
        } else {
            sql.push_str(" WHERE source_uid IN (SELECT value FROM json_each(?))");
            Some(serde_json::to_string(&request.source_uids)?)
        };

        let mut query = sqlx::query(&sql);
        if let Some(uids) = allow_list {
            query = query.bind(uids);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let candidates = rows
            .iter()
            .map(decode_activity_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rank(candidates, request))
    }
}

fn decode_source_row(row: &SqliteRow) -> Result<SourceRecord, StoreError> {
    let config_json: String = row.try_get("config_json")?;
    Ok(SourceRecord {
        uid: row.try_get("uid")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        source_type: row.try_get::<String, _>("type")?.parse()?,
        config: serde_json::from_str(&config_json)?,
    })
}

#[async_trait]
impl SourceStore for SqliteStore {
    async fn add(&self, record: SourceRecord) -> Result<(), StoreError> {
        let config_json = serde_json::to_string(&record.config)?;

        sqlx::query("INSERT INTO sources (uid, name, url, type, config_json) VALUES (?, ?, ?, ?, ?)")
            .bind(&record.uid)
            .bind(&record.name)
            .bind(&record.url)
            .bind(record.source_type.as_str())
            .bind(&config_json)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, &record.uid))?;

        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sources WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceRecord>, StoreError> {
        let rows = sqlx::query("SELECT uid, name, url, type, config_json FROM sources ORDER BY uid")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_source_row).collect()
    }

    async fn get_by_id(&self, uid: &str) -> Result<SourceRecord, StoreError> {
        let row = sqlx::query("SELECT uid, name, url, type, config_json FROM sources WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;

        decode_source_row(&row)
    }
}
