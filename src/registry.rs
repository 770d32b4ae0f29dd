//! Source lifecycle and the ingestion worker pool.
//!
//! The [`Registry`] is the single authority over which sources are active.
//! Each registered source moves through:
//!
//! ```text
//! Unregistered → Initializing → Streaming → Unregistered
//!                 initialize()   stream task   remove() / shutdown()
//! ```
//!
//! # Pipeline
//!
//! ```text
//! stream task (one per source) ──▶ activity queue ─┐
//!                              └─▶ error queue ───┼──▶ worker × N ──▶ ActivityStore
//!                                                 │    summarize → embed → add
//!                                        done ────┘
//! ```
//!
//! Both queues are bounded mpsc channels. A full queue blocks the producing
//! stream task until a worker catches up; the sends themselves give up when
//! the source is cancelled, so removed sources never leak a task.
//!
//! Workers are at-most-once: an enrichment or storage failure is logged and
//! the item dropped. Nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, SearchConfig};
use crate::embedding::Embedder;
use crate::error::{PipelineError, RegistryError, StoreError};
use crate::models::{Activity, DecoratedActivity, SearchOrder, SearchRequest};
use crate::source::{Source, StreamSink};
use crate::store::{ActivityStore, SourceRecord, SourceStore};
use crate::summarize::Summarizer;

/// A registered source and the token that stops its stream task.
struct CancelableSource {
    source: Arc<dyn Source>,
    cancel: CancellationToken,
}

/// How a registration treats an existing UID and the source store.
#[derive(Clone, Copy)]
enum Registration {
    /// Rebuilt from the source store; never written back.
    Restore,
    Add,
    Replace,
}

/// Caller-facing search parameters, before clamping and embedding.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Free text to embed. `None` or an empty embedding means temporal order.
    pub text: Option<String>,
    pub source_uids: Vec<String>,
    pub min_similarity: f32,
    /// `0` means the configured default.
    pub limit: usize,
    pub order: SearchOrder,
}

/// Clamp a requested limit to `[1, max_limit]`; `0` selects the default.
pub fn clamp_limit(requested: usize, config: &SearchConfig) -> usize {
    let max = config.max_limit.max(1);
    match requested {
        0 => config.default_limit.clamp(1, max),
        n => n.min(max),
    }
}

pub struct Registry {
    sources: Mutex<HashMap<String, CancelableSource>>,
    activity_tx: mpsc::Sender<Activity>,
    error_tx: mpsc::Sender<anyhow::Error>,
    done: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    activity_store: Arc<dyn ActivityStore>,
    source_store: Option<Arc<dyn SourceStore>>,
    embedder: Arc<dyn Embedder>,
    search: SearchConfig,
    refresh_interval: Option<Duration>,
}

impl Registry {
    /// Create the queues and start `pipeline.workers` workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        pipeline: &PipelineConfig,
        search: &SearchConfig,
        activity_store: Arc<dyn ActivityStore>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let capacity = pipeline.queue_capacity.max(1);
        let (activity_tx, activity_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);
        let done = CancellationToken::new();

        let worker = Arc::new(Worker {
            activities: Mutex::new(activity_rx),
            errors: Mutex::new(error_rx),
            done: done.clone(),
            store: activity_store.clone(),
            summarizer,
            embedder: embedder.clone(),
        });

        let count = pipeline.workers.max(1);
        let handles = (0..count)
            .map(|id| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.run(id).await })
            })
            .collect();
        info!(workers = count, queue_capacity = capacity, "ingestion pipeline started");

        Self {
            sources: Mutex::new(HashMap::new()),
            activity_tx,
            error_tx,
            done,
            workers: Mutex::new(handles),
            activity_store,
            source_store: None,
            embedder,
            search: search.clone(),
            refresh_interval: pipeline.refresh_interval_secs.map(Duration::from_secs),
        }
    }

    /// Persist sources on [`add`](Self::add) and delete them on
    /// [`remove`](Self::remove).
    pub fn with_source_store(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.source_store = Some(store);
        self
    }

    /// Initialize and start streaming a source.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] if the UID is registered
    /// and with [`RegistryError::InitializationFailed`] if `initialize`
    /// errors; in both cases nothing is started.
    pub async fn add(&self, source: Box<dyn Source>) -> Result<(), RegistryError> {
        self.register(source, Registration::Add).await
    }

    /// Like [`add`](Self::add), but a source already registered or persisted
    /// under the same UID is stopped and its stored record overwritten.
    ///
    /// If `initialize` fails the existing source keeps running.
    pub async fn replace(&self, source: Box<dyn Source>) -> Result<(), RegistryError> {
        self.register(source, Registration::Replace).await
    }

    async fn register(
        &self,
        mut source: Box<dyn Source>,
        mode: Registration,
    ) -> Result<(), RegistryError> {
        let mut sources = self.sources.lock().await;
        let replacing = matches!(mode, Registration::Replace);

        let requested = source.uid();
        if !replacing && sources.contains_key(&requested) {
            return Err(RegistryError::AlreadyExists(requested));
        }

        source
            .initialize()
            .await
            .map_err(|e| RegistryError::InitializationFailed {
                uid: requested.clone(),
                source: e,
            })?;

        // Defaults applied by initialize may normalize the UID.
        let uid = source.uid();
        if !replacing && uid != requested && sources.contains_key(&uid) {
            return Err(RegistryError::AlreadyExists(uid));
        }

        let source: Arc<dyn Source> = Arc::from(source);

        if let Some(store) = &self.source_store {
            match mode {
                Registration::Restore => {}
                Registration::Add => {
                    match store.add(SourceRecord::from_source(source.as_ref())?).await {
                        Ok(()) | Err(StoreError::Conflict(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Registration::Replace => {
                    let record = SourceRecord::from_source(source.as_ref())?;
                    match store.remove(&uid).await {
                        Ok(()) | Err(StoreError::NotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                    store.add(record).await?;
                }
            }
        }

        if let Some(previous) = sources.remove(&uid) {
            previous.cancel.cancel();
            info!(source = %uid, "replacing running source");
        }

        let cancel = self.done.child_token();
        let sink = StreamSink::new(
            self.activity_tx.clone(),
            self.error_tx.clone(),
            cancel.clone(),
        );
        spawn_stream(source.clone(), sink, self.refresh_interval);

        info!(source = %uid, kind = %source.source_type(), "source added");
        sources.insert(uid, CancelableSource { source, cancel });
        Ok(())
    }

    /// Stop a source's stream task, delete its persisted record, and forget
    /// it.
    ///
    /// A UID that is persisted but not running is still removed from the
    /// source store. Fails with [`RegistryError::NotFound`] if the UID is in
    /// neither. If the store delete fails the source keeps running.
    ///
    /// Cancellation is fire-and-forget: this does not wait for the task to
    /// exit.
    pub async fn remove(&self, uid: &str) -> Result<(), RegistryError> {
        let mut sources = self.sources.lock().await;

        let persisted = match &self.source_store {
            Some(store) => match store.remove(uid).await {
                Ok(()) => true,
                Err(StoreError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            },
            None => false,
        };

        match sources.remove(uid) {
            Some(entry) => entry.cancel.cancel(),
            None if persisted => {}
            None => return Err(RegistryError::NotFound(uid.to_string())),
        }
        info!(source = %uid, "source removed");
        Ok(())
    }

    /// All registered sources, ordered by UID.
    pub async fn sources(&self) -> Vec<Arc<dyn Source>> {
        let sources = self.sources.lock().await;
        let mut out: Vec<Arc<dyn Source>> = sources.values().map(|e| e.source.clone()).collect();
        out.sort_by_key(|s| s.uid());
        out
    }

    pub async fn source(&self, uid: &str) -> Result<Arc<dyn Source>, RegistryError> {
        self.sources
            .lock()
            .await
            .get(uid)
            .map(|e| e.source.clone())
            .ok_or_else(|| RegistryError::NotFound(uid.to_string()))
    }

    /// Every stored activity, oldest first.
    pub async fn activities(&self) -> Result<Vec<DecoratedActivity>, RegistryError> {
        let mut rows = self.activity_store.list().await?;
        rows.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.uid().cmp(b.uid()))
        });
        Ok(rows)
    }

    /// Stored activities from one source, oldest first.
    pub async fn activities_by_source(
        &self,
        source_uid: &str,
    ) -> Result<Vec<DecoratedActivity>, RegistryError> {
        let mut rows = self.activities().await?;
        rows.retain(|a| a.source_uid() == source_uid);
        Ok(rows)
    }

    /// Ranked search over the stored corpus.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<DecoratedActivity>, RegistryError> {
        let query_embedding = match query.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let vector = self
                    .embedder
                    .embed(text)
                    .await
                    .map_err(RegistryError::QueryEmbedding)?;
                (!vector.is_empty()).then_some(vector)
            }
            _ => None,
        };

        let request = SearchRequest {
            query_embedding,
            min_similarity: query.min_similarity,
            source_uids: query.source_uids.clone(),
            limit: clamp_limit(query.limit, &self.search),
            order: query.order,
        };
        Ok(self.activity_store.search(&request).await?)
    }

    /// Register every persisted source without persisting it again.
    ///
    /// Sources that fail to rebuild or initialize, or are already
    /// registered, are logged and skipped. Returns how many were started.
    pub async fn restore(&self) -> Result<usize, RegistryError> {
        let Some(store) = &self.source_store else {
            return Ok(0);
        };

        let mut restored = 0;
        for record in store.list().await? {
            let source = match record.rebuild() {
                Ok(source) => source,
                Err(e) => {
                    warn!(source = %record.uid, error = %e, "skipping persisted source");
                    continue;
                }
            };
            match self.register(source, Registration::Restore).await {
                Ok(()) => restored += 1,
                Err(RegistryError::AlreadyExists(uid)) => {
                    debug!(source = %uid, "persisted source already registered");
                }
                Err(e) => warn!(source = %record.uid, error = %e, "skipping persisted source"),
            }
        }
        Ok(restored)
    }

    /// Stop the workers and every source, then wait for the workers to exit.
    ///
    /// Once this returns no further activity is stored.
    pub async fn shutdown(&self) {
        self.done.cancel();
        {
            let mut sources = self.sources.lock().await;
            for (_, entry) in sources.drain() {
                entry.cancel.cancel();
            }
        }

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "ingestion worker panicked");
            }
        }
        info!("ingestion pipeline stopped");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

fn spawn_stream(source: Arc<dyn Source>, sink: StreamSink, refresh: Option<Duration>) {
    tokio::spawn(async move {
        loop {
            if sink.is_cancelled() {
                break;
            }
            debug!(source = %source.uid(), "streaming");
            source.stream(sink.clone()).await;

            let Some(every) = refresh else { break };
            tokio::select! {
                _ = sink.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
        debug!(source = %source.uid(), "stream task finished");
    });
}

/// State shared by every ingestion worker.
struct Worker {
    activities: Mutex<mpsc::Receiver<Activity>>,
    errors: Mutex<mpsc::Receiver<anyhow::Error>>,
    done: CancellationToken,
    store: Arc<dyn ActivityStore>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
}

enum Processed {
    Stored,
    Known,
    Dropped,
}

impl Worker {
    async fn run(&self, id: usize) {
        debug!(worker = id, "worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.done.cancelled() => break,
                Some(activity) = recv(&self.activities) => {
                    let uid = activity.uid().to_string();
                    match self.process(activity).await {
                        Ok(Processed::Stored) => info!(worker = id, activity = %uid, "activity stored"),
                        Ok(Processed::Known) => debug!(worker = id, activity = %uid, "activity already stored"),
                        Ok(Processed::Dropped) => debug!(worker = id, activity = %uid, "dropped during shutdown"),
                        Err(e) => warn!(worker = id, error = %e, "activity dropped"),
                    }
                }
                Some(err) = recv(&self.errors) => {
                    warn!(worker = id, error = %format!("{:#}", err), "source error");
                }
                else => break,
            }
        }
        debug!(worker = id, "worker stopped");
    }

    async fn process(&self, activity: Activity) -> Result<Processed, PipelineError> {
        let uid = activity.uid().to_string();
        let storage_failed = |source: StoreError| PipelineError::StorageFailed {
            uid: uid.clone(),
            source,
        };
        let enrichment_failed = |source: anyhow::Error| PipelineError::EnrichmentFailed {
            uid: uid.clone(),
            source,
        };

        if self.store.contains(&uid).await.map_err(storage_failed)? {
            return Ok(Processed::Known);
        }

        let summary = self
            .summarizer
            .summarize(&activity)
            .await
            .map_err(enrichment_failed)?;

        let text = format!("{}\n\n{}", activity.title(), summary.full_summary);
        let embedding = self
            .embedder
            .embed(&text)
            .await
            .map_err(enrichment_failed)?;

        if self.done.is_cancelled() {
            return Ok(Processed::Dropped);
        }

        match self
            .store
            .add(DecoratedActivity::new(activity, summary).with_embedding(embedding))
            .await
        {
            Ok(()) => Ok(Processed::Stored),
            // Another worker stored the same UID first.
            Err(StoreError::Conflict(_)) => Ok(Processed::Known),
            Err(e) => Err(storage_failed(e)),
        }
    }
}

async fn recv<T>(rx: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    rx.lock().await.recv().await
}
