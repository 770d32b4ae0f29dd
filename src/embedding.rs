//! Embedding provider abstraction and vector utilities.
//!
//! Defines the [`Embedder`] trait consumed by the ingestion workers and by
//! [`Registry::search`](crate::registry::Registry::search):
//! - **[`DisabledEmbedder`]**: returns an empty vector; rows stored without an
//!   embedding always report similarity `0`.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with retry and backoff.
//!
//! Also provides the vector helpers used by the stores:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! OpenAI calls go through `OpenAiClient`, which retries rate limits and
//! server errors with backoff of 1s, 2s, 4s and so on, capped at 32s.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Produces a fixed-dimension vector for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the vector dimensionality. `0` for the disabled embedder.
    fn dims(&self) -> usize;

    /// Embed one text. Errors surface as enrichment failures.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Instantiate the embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Embedder ============

/// Used when `embedding.provider = "disabled"`. Search falls back to
/// temporal ordering.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

// ============ OpenAI ============

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Authenticated JSON client for the OpenAI REST API, shared by the
/// embedder and the summarizer.
pub(crate) struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    max_retries: u32,
}

impl OpenAiClient {
    /// Reads the key from `OPENAI_API_KEY`.
    pub(crate) fn from_env(timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            max_retries,
        })
    }

    /// POST `body` to `{base}/{path}` and decode the response.
    ///
    /// Rate limits (429), server errors and transport failures are retried
    /// up to `max_retries` times with exponential backoff; any other non-2xx
    /// status fails at once.
    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", OPENAI_API_BASE, path);
        let mut attempt = 0u32;

        loop {
            let failure = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<R>()
                        .await
                        .with_context(|| format!("Unexpected response shape from {}", path));
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    let err = anyhow!("OpenAI {} returned {}: {}", path, status, detail);
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => anyhow::Error::new(e).context(format!("OpenAI {} request failed", path)),
            };

            if attempt >= self.max_retries {
                return Err(failure);
            }
            attempt += 1;
            let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(path, attempt, backoff_secs = backoff.as_secs(), error = %failure, "retrying");
            tokio::time::sleep(backoff).await;
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingsResponse {
    /// Vectors in input order.
    fn into_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

/// Embedder backed by `POST /v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    client: OpenAiClient,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (Some(model), Some(dims)) = (config.model.clone(), config.dims) else {
            bail!("embedding.model and embedding.dims are required for the openai provider");
        };
        Ok(Self {
            model,
            dims,
            client: OpenAiClient::from_env(config.timeout_secs, config.max_retries)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dims,
        });
        let response: EmbeddingsResponse = self.client.post("embeddings", &request).await?;

        let Some(vector) = response.into_vectors().into_iter().next() else {
            bail!("OpenAI returned no embedding");
        };
        if vector.len() != self.dims {
            bail!(
                "embedding has {} dimensions, configured for {}",
                vector.len(),
                self.dims
            );
        }
        Ok(vector)
    }
}

// ============ Vector utilities ============

/// Little-endian `f32` bytes, the on-disk embedding format.
///
/// ```rust
/// use pulse::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5, -4.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), vec![0.5, -4.0]);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a full `f32`
/// are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// `a·b / (‖a‖‖b‖)`, in `[-1, 1]`.
///
/// Empty, mismatched, or zero-length vectors score `0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });

    let norms = (aa * bb).sqrt();
    if norms <= f32::EPSILON {
        0.0
    } else {
        dot / norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_blob_preserves_bits() {
        let v = vec![f32::MIN_POSITIVE, -0.0, 1e-7, 42.0];
        let back = blob_to_vec(&vec_to_blob(&v));
        assert_eq!(
            back.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            v.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_blob_ignores_partial_trailing_bytes() {
        let mut blob = vec_to_blob(&[2.0]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![2.0]);
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        assert!(close(cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]), 1.0));
        assert!(close(cosine_similarity(&[0.0, 2.0], &[5.0, 0.0]), 0.0));
        assert!(close(cosine_similarity(&[1.0, 1.0], &[-2.0, -2.0]), -1.0));
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_embeddings_response_follows_index() {
        let response: EmbeddingsResponse = serde_json::from_value(serde_json::json!({
            "object": "list",
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        }))
        .unwrap();
        assert_eq!(response.into_vectors(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_embedder_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: None,
            ..EmbeddingConfig::default()
        };
        let err = OpenAiEmbedder::new(&config).err().unwrap();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[tokio::test]
    async fn test_disabled_embedder_yields_empty_vector() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert_eq!(embedder.dims(), 0);
        assert!(embedder.embed("anything").await.unwrap().is_empty());
    }
}
