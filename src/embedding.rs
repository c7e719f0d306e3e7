//! Embedding providers.
//!
//! An [`EmbeddingProvider`] turns texts into vectors. The vector indexes never
//! talk to a provider directly; they go through an [`Embedder`], which splits
//! input into `batch_size` batches and checks that every text got a vector.
//!
//! | `embedding.provider` | Implementation |
//! |----------------------|----------------|
//! | `hash` | [`HashProvider`]: feature-hashed bag of words, offline |
//! | `openai` | [`RemoteProvider`] against `{url}/embeddings` |
//! | `ollama` | [`RemoteProvider`] against `{url}/api/embed` |
//! | `local` | `LocalProvider` via fastembed (feature `local-embeddings`) |
//!
//! Remote requests are retried on HTTP 429, 5xx and connection errors with
//! exponential backoff (see [`RetryPolicy`]); other 4xx responses fail at once.
//!
//! Also provides [`cosine_similarity`] / [`cosine_distance`] and the
//! little-endian `f32` BLOB codec used by the SQLite index.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Default dimensionality of the hashing provider.
pub const DEFAULT_HASH_DIMS: usize = 256;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A provider plus the batch size it is fed with.
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(create_provider(config)?, config.batch_size))
    }

    /// Offline hashing embedder with the given dimensionality.
    pub fn hashing(dims: usize) -> Self {
        Self::new(
            Box::new(HashProvider { dims: dims.max(1) }),
            EmbeddingConfig::default().batch_size,
        )
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.provider.embed(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

// ============ Hash Provider ============

/// Deterministic bag-of-words embedding.
///
/// Lowercased alphanumeric tokens are hashed with SHA-256 into `dims`
/// signed buckets and the result is L2-normalized. Texts sharing words have
/// positive cosine similarity; there is no semantic generalization.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            dims: config.dims.unwrap_or(DEFAULT_HASH_DIMS).max(1),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embedding(t, self.dims)).collect())
    }
}

pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dims];
    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign;
    }

    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
    vec
}

// ============ Remote Providers ============

/// Retry budget for remote embedding requests.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at 32x.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Wire format spoken by a [`RemoteProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApi {
    /// `{"data": [{"index", "embedding"}]}`
    OpenAi,
    /// `{"embeddings": [[...]]}`
    Ollama,
}

impl RemoteApi {
    fn label(self) -> &'static str {
        match self {
            RemoteApi::OpenAi => "OpenAI",
            RemoteApi::Ollama => "Ollama",
        }
    }

    fn parse(self, json: &Value) -> Result<Vec<Vec<f32>>> {
        match self {
            RemoteApi::OpenAi => parse_openai_response(json),
            RemoteApi::Ollama => parse_ollama_response(json),
        }
    }
}

/// HTTP embedding client for OpenAI-compatible and Ollama endpoints.
pub struct RemoteProvider {
    api: RemoteApi,
    model: String,
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(
        api: RemoteApi,
        model: impl Into<String>,
        dims: usize,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            api,
            model: model.into(),
            dims,
            endpoint: endpoint.into(),
            api_key,
            retry,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// OpenAI embeddings. Fails if the key variable named by
    /// `embedding.api_key_env` is unset.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, RemoteApi::OpenAi)?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let base = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Self::new(
            RemoteApi::OpenAi,
            model,
            dims,
            format!("{}/embeddings", base.trim_end_matches('/')),
            Some(api_key),
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::from_config(config),
        )
    }

    pub fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, RemoteApi::Ollama)?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_BASE_URL);
        Self::new(
            RemoteApi::Ollama,
            model,
            dims,
            format!("{}/api/embed", base.trim_end_matches('/')),
            None,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::from_config(config),
        )
    }
}

fn model_and_dims(config: &EmbeddingConfig, api: RemoteApi) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", api.label()))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", api.label()))?;
    Ok((model, dims))
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let label = self.api.label();
        let body = json!({ "model": self.model, "input": texts });
        let mut last_err = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        provider = label,
                        attempt,
                        error = %e,
                        "embedding request failed"
                    );
                    last_err = Some(anyhow!(
                        "{} connection error ({}): {}",
                        label,
                        self.endpoint,
                        e
                    ));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: Value = response.json().await?;
                return self.api.parse(&json);
            }

            let body_text = response.text().await.unwrap_or_default();
            let err = anyhow!("{} API error {}: {}", label, status, body_text);
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::warn!(
                    provider = label,
                    %status,
                    attempt,
                    "embedding request failed, retrying"
                );
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, float_array(embedding, RemoteApi::OpenAi)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|embedding| float_array(embedding, RemoteApi::Ollama))
        .collect()
}

fn float_array(value: &Value, api: RemoteApi) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", api.label()))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Local Provider (fastembed) ============

/// Local inference via fastembed. Models are downloaded from Hugging Face on
/// first use and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, default_dims) = fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size,
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashProvider::new(config))),
        "openai" => Ok(Box::new(RemoteProvider::openai(config)?)),
        "ollama" => Ok(Box::new(RemoteProvider::ollama(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance (`1 - similarity`), the ordering key for retrieval.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}
