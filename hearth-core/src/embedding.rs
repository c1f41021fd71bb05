//! Vector embedding abstraction layer.
//!
//! Provides a trait-based interface for generating the text embeddings the
//! memory store uses for semantic relevance. Embedding is async and always
//! happens before the store lock is taken; the store itself only compares
//! vectors.
//!
//! Three providers ship with the crate:
//! - [`HashingEmbeddingProvider`] — deterministic feature-hashed bag of
//!   words. Texts sharing vocabulary land close together; no model needed.
//! - [`RemoteEmbeddingProvider`] — vectors from an embedding model behind an
//!   [`EmbeddingService`], e.g. Ollama or an OpenAI-compatible endpoint.
//! - [`StubEmbeddingProvider`] — zero vectors, so ranking falls back to
//!   recency and importance alone.
//!
//! [`open_embedder`] picks one from `[retrieval]` configuration.

use std::sync::Arc;

use async_trait::async_trait;
use hearth_llm::{EmbeddingClient, EmbeddingService, LlmProvider};
use tracing::debug;

use crate::config::HearthConfig;
use crate::error::{HearthError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; they are shared with the
/// reflection worker pool.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// Returns a vector of `dimensions()` floats.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Embedding`] if the model fails to produce an
    /// embedding.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts.
    ///
    /// Default implementation calls `embed` in a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding in the batch fails.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

/// Build the embedding provider named by `retrieval.embedding_provider`.
///
/// `"hashing"` and `"stub"` run in-process. `"ollama"` and `"openai"` call
/// `retrieval.embedding_model` at `retrieval.embedding_base_url`, falling
/// back to `llm.base_url`; `"openai"` reads its key from `llm.api_key_env`.
///
/// # Errors
///
/// Returns [`HearthError::Config`] for an unknown provider, zero dimensions,
/// or a missing API key.
pub fn open_embedder(config: &HearthConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let retrieval = &config.retrieval;
    let dims = retrieval.embedding_dimensions;
    let base_url = || {
        retrieval
            .embedding_base_url
            .clone()
            .unwrap_or_else(|| config.llm.base_url.clone())
    };
    let provider = match retrieval.embedding_provider.as_str() {
        "hashing" => return Ok(Arc::new(HashingEmbeddingProvider::new(dims)?)),
        "stub" => return Ok(Arc::new(StubEmbeddingProvider::new(dims))),
        "ollama" => LlmProvider::Ollama {
            base_url: base_url(),
        },
        "openai" => {
            let api_key = std::env::var(&config.llm.api_key_env).map_err(|_| {
                HearthError::Config(format!(
                    "retrieval.embedding_provider = \"openai\" requires ${} to be set",
                    config.llm.api_key_env
                ))
            })?;
            LlmProvider::OpenAiCompatible {
                base_url: base_url(),
                api_key,
            }
        }
        other => {
            return Err(HearthError::Config(format!(
                "unknown retrieval.embedding_provider '{other}'"
            )));
        }
    };
    let client = EmbeddingClient::new(
        provider,
        retrieval.embedding_model.clone(),
        config.llm.max_retries,
    );
    Ok(Arc::new(RemoteEmbeddingProvider::new(Arc::new(client), dims)?))
}

// ---------------------------------------------------------------------------
// Stub / zero-vector provider
// ---------------------------------------------------------------------------

/// A stub embedding provider that returns zero-vectors.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// Feature-hashing provider
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedding using signed feature hashing.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of
/// `dimensions` buckets; a second hash bit picks the sign. The result is
/// L2-normalised, so cosine similarity reflects shared vocabulary.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a hashing provider.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Config`] if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(HearthError::Config(
                "embedding dimensions must be at least 1".into(),
            ));
        }
        Ok(Self { dims: dimensions })
    }

    /// Embed `text` synchronously; hashing cannot fail.
    #[must_use]
    pub fn vector(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0_f32; self.dims];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        for token in tokens {
            let hash = fnv1a(token.as_bytes());
            // Truncation is intended: the bucket only needs the low bits.
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let mag: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > f32::EPSILON {
            for x in &mut vector {
                *x /= mag;
            }
        }
        Embedding(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "fnv-feature-hashing"
    }
}

// ---------------------------------------------------------------------------
// Remote model provider
// ---------------------------------------------------------------------------

/// Embeddings from a model behind an [`EmbeddingService`].
///
/// Every returned vector is checked against the configured dimensions, so
/// a model swap cannot silently mix incomparable vectors in one store.
pub struct RemoteEmbeddingProvider {
    service: Arc<dyn EmbeddingService>,
    dims: usize,
}

impl RemoteEmbeddingProvider {
    /// Wrap `service`, expecting vectors of `dimensions` floats.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::Config`] if `dimensions` is zero.
    pub fn new(service: Arc<dyn EmbeddingService>, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(HearthError::Config(
                "embedding dimensions must be at least 1".into(),
            ));
        }
        Ok(Self {
            service,
            dims: dimensions,
        })
    }

    fn check(&self, vector: Vec<f32>) -> Result<Embedding> {
        if vector.len() != self.dims {
            return Err(HearthError::Embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.service.model(),
                vector.len(),
                self.dims
            )));
        }
        Ok(Embedding(vector))
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut batch = self.embed_batch(&[text]).await?;
        batch
            .pop()
            .ok_or_else(|| HearthError::Embedding("empty embedding batch".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let vectors = self
            .service
            .embed(texts)
            .await
            .map_err(|e| HearthError::Embedding(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(HearthError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        debug!(model = self.service.model(), texts = texts.len(), "remote embeddings");
        vectors.into_iter().map(|v| self.check(v)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        self.service.model()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
