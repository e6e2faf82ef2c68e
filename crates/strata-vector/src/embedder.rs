//! Embedding generation for semantic indexing
//!
//! Abstracts the text-to-vector step behind the `Embedder` trait. The
//! default `HashEmbedder` is a deterministic character-bag projection:
//! not semantically meaningful, but stable and dependency-free, standing
//! in for a real embedding service. An OpenAI-backed provider is
//! available behind the `openai` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
#[cfg(feature = "openai")]
use tracing::info;
use xxhash_rust::xxh3::xxh3_64;

use strata_core::similarity::normalize;
use strata_core::{Error, Result};

/// Configuration for embedding providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Provider type
    pub provider: EmbedderKind,

    /// Model name reported by the provider
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// API key for cloud providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// API base URL for custom endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Maximum texts per embedding request
    pub max_batch_size: usize,

    /// Timeout in seconds for API requests
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderKind::Hash,
            model: "hash-projection".to_string(),
            dimension: 384,
            api_key: None,
            api_base_url: None,
            max_batch_size: 100,
            timeout_secs: 30,
        }
    }
}

impl EmbedderConfig {
    /// Create config for the deterministic hash projection
    pub fn hash(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Create config for OpenAI text-embedding-3-small
    pub fn openai_small(api_key: &str) -> Self {
        Self {
            provider: EmbedderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: Some(api_key.to_string()),
            api_base_url: Some("https://api.openai.com/v1".to_string()),
            max_batch_size: 100,
            timeout_secs: 30,
        }
    }

    /// Create config for OpenAI text-embedding-3-large
    pub fn openai_large(api_key: &str) -> Self {
        Self {
            provider: EmbedderKind::OpenAi,
            model: "text-embedding-3-large".to_string(),
            dimension: 3072,
            api_key: Some(api_key.to_string()),
            api_base_url: Some("https://api.openai.com/v1".to_string()),
            max_batch_size: 100,
            timeout_secs: 30,
        }
    }
}

/// Supported embedding provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Deterministic character-bag hash projection
    Hash,
    /// OpenAI embeddings API
    OpenAi,
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension produced by this provider
    fn dimension(&self) -> usize;

    /// Model name
    fn name(&self) -> &str;

    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Deterministic hash-projection embedder
///
/// Feature-hashes the character bag of the text into a fixed-width
/// vector and L2-normalizes it. Identical texts always produce
/// identical vectors.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        debug!(dimension, "created hash embedder");
        Self { dimension }
    }

    fn project(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let hash = xxh3_64(ch.encode_utf8(&mut buf).as_bytes());
            let bucket = ((hash >> 1) % self.dimension as u64) as usize;
            // One hash bit picks the sign so buckets cancel rather than
            // accumulate toward all-positive vectors
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-projection"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::EmbeddingFailed("empty text".to_string()));
        }
        Ok(self.project(text))
    }
}

/// OpenAI embedding provider
#[cfg(feature = "openai")]
pub struct OpenAiEmbedder {
    config: EmbedderConfig,
    client: reqwest::Client,
}

#[cfg(feature = "openai")]
impl OpenAiEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(Error::InvalidConfig(
                "OpenAI API key required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        info!(model = %config.model, "created OpenAI embedder");
        Ok(Self { config, client })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingFailed("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("API key missing".to_string()))?;

        let base_url = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let url = format!("{base_url}/embeddings");

        #[derive(Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        if response.status() == 429 {
            return Err(Error::EmbeddingFailed("rate limit exceeded".to_string()));
        }
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::EmbeddingFailed(body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        // Sort by index so responses line up with the request order
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Create an embedding provider from configuration
pub fn create_embedder(config: EmbedderConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        #[cfg(feature = "openai")]
        EmbedderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        #[cfg(not(feature = "openai"))]
        EmbedderKind::OpenAi => Err(Error::InvalidConfig(
            "openai feature not enabled, rebuild with --features openai".to_string(),
        )),
    }
}
