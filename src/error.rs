//! Error taxonomy for the ingestion and search engine.
//!
//! Structural errors ([`RegistryError`]) are returned synchronously to the
//! caller of [`Registry::add`](crate::registry::Registry::add) and friends.
//! Batch outcomes ([`BatchError`]) let fan-out adapters distinguish
//! "nothing usable" from "degraded but usable". Pipeline errors
//! ([`PipelineError`]) never reach a caller: the worker pool logs them and
//! drops the item.

use thiserror::Error;

use crate::source_type::{ActivityKind, SourceType};

/// Errors from source lifecycle operations on the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source '{0}' already exists")]
    AlreadyExists(String),

    #[error("source '{0}' not found")]
    NotFound(String),

    #[error("initialize source '{uid}': {source}")]
    InitializationFailed {
        uid: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage: {0}")]
    Storage(#[from] StoreError),

    #[error("embed search query: {0}")]
    QueryEmbedding(#[source] anyhow::Error),
}

/// Classification of a fan-out batch that did not fully succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Every task in the batch failed.
    #[error("no content: all {total} tasks failed")]
    NoContent { total: usize },

    /// Some tasks failed; the successful results are still usable.
    #[error("partial content: {failed} of {total} tasks failed")]
    PartialContent { failed: usize, total: usize },
}

/// A source type tag that no adapter is registered for.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown source type: '{0}'")]
pub struct UnknownSourceType(pub String);

/// Errors from the activity and source repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("'{0}' not found")]
    NotFound(String),

    /// Uniqueness violation: the UID is already stored.
    #[error("'{0}' already exists")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownSourceType(#[from] UnknownSourceType),

    /// The activity variant is not the one its source type produces, so
    /// the stored row could never be decoded.
    #[error("activity '{uid}' is a {kind:?} but is tagged {source_type}")]
    KindMismatch {
        uid: String,
        source_type: SourceType,
        kind: ActivityKind,
    },

    /// A persisted source could not be rebuilt from its configuration.
    #[error("rebuild source '{uid}': {reason}")]
    Rebuild { uid: String, reason: String },
}

/// Per-item failures inside the ingestion worker pool.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("enrichment failed for '{uid}': {source}")]
    EnrichmentFailed {
        uid: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage failed for '{uid}': {source}")]
    StorageFailed {
        uid: String,
        #[source]
        source: StoreError,
    },
}
