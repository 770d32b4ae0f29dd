//! In-memory repositories.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{DecoratedActivity, SearchRequest};
use crate::store::{
    check_kind, rank, sort_for_listing, ActivityStore, SourceRecord, SourceStore,
};

/// Activities and sources held in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    activities: RwLock<HashMap<String, DecoratedActivity>>,
    sources: RwLock<BTreeMap<String, SourceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn add(&self, mut activity: DecoratedActivity) -> Result<(), StoreError> {
        check_kind(&activity.activity)?;
        let mut activities = self.activities.write().await;
        if activities.contains_key(activity.uid()) {
            return Err(StoreError::Conflict(activity.uid().to_string()));
        }
        activity.similarity = 0.0;
        activities.insert(activity.uid().to_string(), activity);
        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), StoreError> {
        self.activities
            .write()
            .await
            .remove(uid)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))
    }

    async fn list(&self) -> Result<Vec<DecoratedActivity>, StoreError> {
        let mut rows: Vec<DecoratedActivity> =
            self.activities.read().await.values().cloned().collect();
        sort_for_listing(&mut rows);
        Ok(rows)
    }

    async fn contains(&self, uid: &str) -> Result<bool, StoreError> {
        Ok(self.activities.read().await.contains_key(uid))
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<DecoratedActivity>, StoreError> {
        let candidates: Vec<DecoratedActivity> =
            self.activities.read().await.values().cloned().collect();
        Ok(rank(candidates, request))
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn add(&self, record: SourceRecord) -> Result<(), StoreError> {
        let mut sources = self.sources.write().await;
        if sources.contains_key(&record.uid) {
            return Err(StoreError::Conflict(record.uid));
        }
        sources.insert(record.uid.clone(), record);
        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), StoreError> {
        self.sources
            .write()
            .await
            .remove(uid)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))
    }

    async fn list(&self) -> Result<Vec<SourceRecord>, StoreError> {
        Ok(self.sources.read().await.values().cloned().collect())
    }

    async fn get_by_id(&self, uid: &str) -> Result<SourceRecord, StoreError> {
        self.sources
            .read()
            .await
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))
    }
}
