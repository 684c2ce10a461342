//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`HashEmbeddingProvider`]**: deterministic pseudo-random vectors seeded
//!   by the SHA-256 of each text; offline, used for development and tests.
//! - **[`OpenAiProvider`]**: calls an OpenAI-compatible `/embeddings`
//!   endpoint (OpenAI, GLM, and similar) with timeout, retry, and backoff.
//!
//! Also provides the vector utilities shared by indexing and search:
//! - [`l2_normalize`]: scale a vector to unit length in place
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` byte encoding
//!
//! Providers return raw vectors; callers normalize before storage or search.
//!
//! # Retry Strategy
//!
//! The OpenAI-compatible provider retries transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Result, TriageError};

const DEFAULT_HASH_DIMS: usize = 384;

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier recorded on index and query log rows (e.g. `"hash"`).
    fn provider(&self) -> &str;
    /// Returns the model identifier (e.g. `"embedding-2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` and verify the provider honoured the shape contract.
///
/// Returns L2-normalized rows. A row-count or dimensionality mismatch is an
/// [`TriageError::ExternalService`] error.
pub async fn embed_normalized(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = provider.embed(texts).await?;
    if vectors.len() != texts.len() {
        return Err(TriageError::ExternalService(format!(
            "embedding provider returned {} rows for {} inputs",
            vectors.len(),
            texts.len()
        )));
    }
    let dims = provider.dims();
    for v in vectors.iter_mut() {
        if v.len() != dims {
            return Err(TriageError::ExternalService(format!(
                "embedding provider returned dim {} (expected {})",
                v.len(),
                dims
            )));
        }
        l2_normalize(v);
    }
    Ok(vectors)
}

// ============ Hash Provider ============

/// Deterministic offline provider.
///
/// Identical texts always map to identical vectors; different texts map to
/// effectively uncorrelated ones. Carries no semantic signal, so hybrid
/// ranking is driven by the lexical component when this provider is used.
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed));
        (0..self.dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn provider(&self) -> &str {
        "hash"
    }
    fn model_name(&self) -> &str {
        "hash-v1"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible HTTP APIs.
///
/// Calls `POST {base_url}/embeddings` with the configured model. The bearer
/// key is read once, at construction, from the environment variable named
/// by `embedding.api_key_env`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| TriageError::invalid("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| TriageError::invalid("embedding.dims required for openai provider"))?;
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| TriageError::invalid("embedding.base_url required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            TriageError::invalid(format!("{} environment variable not set", config.api_key_env))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = TriageError::ExternalService(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    ));

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, %status, "embedding request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embedding request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            TriageError::ExternalService("embedding failed after retries".to_string())
        }))
    }
}

/// Parse an OpenAI-style embeddings response, honouring `data[].index`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        TriageError::ExternalService("invalid embedding response: missing data array".into())
    })?;

    let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                TriageError::ExternalService("invalid embedding response: missing embedding".into())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    TriageError::ExternalService("invalid embedding response: non-numeric value".into())
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        rows.push((index, vec));
    }

    rows.sort_by_key(|(index, _)| *index);
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

/// Create the [`EmbeddingProvider`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbeddingProvider`] (`dims` defaults to 384) |
/// | `"openai"` | [`OpenAiProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbeddingProvider::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => Err(TriageError::invalid(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Scale `v` to unit L2 norm in place. Near-zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Encode a float slice as little-endian `f32` bytes.
///
/// ```rust
/// use comment_triage::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode little-endian `f32` bytes. Trailing bytes that do not form a
/// whole value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
