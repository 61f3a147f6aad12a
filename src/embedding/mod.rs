//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **`LocalEmbedder`**: runs models in-process via fastembed (default
//!   `bge-small-en-v1.5`, 384 dims); no network calls after model download.
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed`.
//! - **[`HashEmbedder`]**: deterministic feature-hashing bag of words;
//!   offline, dependency-free, used by tests and air-gapped setups.
//!
//! Ingestion and querying must use the same embedder: distances between
//! vectors from different models are meaningless. The persisted index
//! records the model name and dimension so a mismatch is caught at load.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod hash;
#[cfg(feature = "local-embeddings")]
mod local;

pub use hash::HashEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::RagError;

/// A text → fixed-length vector function.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index manifest.
    fn model_name(&self) -> &str;
    /// Length of every vector this embedder returns.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Check that every vector matches the embedder's declared dimension.
pub fn check_dims(embedder: &dyn Embedder, vectors: &[Vec<f32>]) -> Result<(), RagError> {
    let expected = embedder.dims();
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(RagError::Configuration(format!(
            "embedding model '{}' returned {}-dimensional vectors, expected {}",
            embedder.model_name(),
            v.len(),
            expected
        ))),
        None => Ok(()),
    }
}

/// Create the embedder named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | `LocalEmbedder` (requires the `local-embeddings` feature) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, RagError> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            return Err(RagError::Configuration(
                "local embedding provider requires --features local-embeddings".into(),
            ))
        }
        "openai" => Arc::new(OpenAIEmbedder::new(config)?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        "hash" => Arc::new(HashEmbedder::new(config.dims)),
        other => {
            return Err(RagError::Configuration(format!(
                "unknown embedding provider: {}",
                other
            )))
        }
    };
    Ok(embedder)
}

// ============ OpenAI-compatible provider ============

/// Embedder backed by an OpenAI-compatible `POST {url}/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Configuration(
                "missing credential: OPENAI_API_KEY environment variable not set".into(),
            )
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_with_retry(request, self.max_retries, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, json_to_vec(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama provider ============

/// Embedder backed by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);
        let json = send_with_retry(request, self.max_retries, "Ollama")
            .await
            .map_err(|e| anyhow!("{} (is Ollama running at {}?)", e, self.url))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Shared HTTP plumbing ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, RagError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Send a JSON request, retrying rate limits, server errors and network errors.
async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} embedding retry", label);
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            bail!("{} request body cannot be retried", label);
        };

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use doc_qa::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing bytes short of a full value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Squared Euclidean distance.
///
/// ```text
/// d(a, b) = Σ (aᵢ - bᵢ)²
/// ```
///
/// Vectors must have equal length; extra components of the longer one are ignored.
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
