//! Embedding Client — text vectors from Ollama or an OpenAI-compatible API.
//!
//! ```text
//! Ollama:            POST {base_url}/api/embed      { model, input: [..] } -> { embeddings: [[..], ..] }
//! OpenAI-compatible: POST {base_url}/v1/embeddings  { model, input: [..] } -> { data: [{ index, embedding }, ..] }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{LlmProvider, post_json};
use crate::error::LlmError;

/// Default per-request timeout for embedding calls.
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 10_000;

/// Text embedding: a batch of texts in, one vector per text out.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed `texts`, returning vectors in the same order.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the backend is unavailable, the request
    /// fails, or the reply does not hold one vector per input.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Name of the embedding model.
    fn model(&self) -> &str;
}

/// HTTP embedding client for the same backends as [`LlmClient`](crate::LlmClient).
pub struct EmbeddingClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    timeout_ms: u64,
    max_retries: u32,
}

impl EmbeddingClient {
    /// Create a new embedding client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            timeout_ms: DEFAULT_EMBED_TIMEOUT_MS,
            max_retries,
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

fn embed_body(model: &str, texts: &[&str]) -> Value {
    // Newlines are flattened; some embedding models degrade on them.
    let input: Vec<String> = texts.iter().map(|t| t.replace('\n', " ")).collect();
    json!({ "model": model, "input": input })
}

fn parse_vector(value: &Value) -> Result<Vec<f32>, LlmError> {
    let items = value
        .as_array()
        .ok_or_else(|| LlmError::ParseError("embedding is not an array".into()))?;
    items
        .iter()
        .map(|x| {
            // Embeddings are consumed at f32 precision.
            #[allow(clippy::cast_possible_truncation)]
            let component = x.as_f64().map(|f| f as f32);
            component
                .ok_or_else(|| LlmError::ParseError(format!("non-numeric embedding component: {x}")))
        })
        .collect()
}

fn extract_ollama_embeddings(json: &Value) -> Result<Vec<Vec<f32>>, LlmError> {
    json["embeddings"]
        .as_array()
        .ok_or_else(|| LlmError::ParseError("reply has no 'embeddings' array".into()))?
        .iter()
        .map(parse_vector)
        .collect()
}

fn extract_openai_embeddings(json: &Value) -> Result<Vec<Vec<f32>>, LlmError> {
    let mut data: Vec<&Value> = json["data"]
        .as_array()
        .ok_or_else(|| LlmError::ParseError("reply has no 'data' array".into()))?
        .iter()
        .collect();
    data.sort_by_key(|item| item["index"].as_u64().unwrap_or(u64::MAX));
    data.into_iter()
        .map(|item| parse_vector(&item["embedding"]))
        .collect()
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = embed_body(&self.model, texts);
        let vectors = match &self.provider {
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No embedding provider configured".into()));
            }
            LlmProvider::Ollama { base_url } => {
                let url = format!("{}/api/embed", base_url.trim_end_matches('/'));
                let (json, latency_ms) =
                    post_json(&self.http, &url, None, &body, self.timeout_ms, self.max_retries)
                        .await?;
                debug!(model = %self.model, texts = texts.len(), latency_ms, "embedded");
                extract_ollama_embeddings(&json)?
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{}/v1/embeddings", base_url.trim_end_matches('/'));
                let (json, latency_ms) = post_json(
                    &self.http,
                    &url,
                    Some(api_key),
                    &body,
                    self.timeout_ms,
                    self.max_retries,
                )
                .await?;
                debug!(model = %self.model, texts = texts.len(), latency_ms, "embedded");
                extract_openai_embeddings(&json)?
            }
        };

        if vectors.len() != texts.len() {
            return Err(LlmError::ParseError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = EmbeddingClient::new(LlmProvider::None, "nomic-embed-text", 0);
        assert!(!client.is_available());
        let err = client.embed(&["wolf"]).await.expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_batch_needs_no_backend() {
        let client = EmbeddingClient::new(LlmProvider::None, "m", 0);
        assert!(client.embed(&[]).await.expect("empty").is_empty());
    }

    #[test]
    fn body_flattens_newlines() {
        let body = embed_body("m", &["line one\nline two"]);
        assert_eq!(body["model"], "m");
        assert_eq!(body["input"][0], "line one line two");
    }

    #[test]
    fn extracts_ollama_vectors() {
        let reply = json!({ "embeddings": [[0.5, -0.25], [1.0, 0.0]] });
        assert_eq!(
            extract_ollama_embeddings(&reply).expect("parse"),
            vec![vec![0.5, -0.25], vec![1.0, 0.0]]
        );
    }

    #[test]
    fn openai_vectors_follow_index_order() {
        let reply = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        assert_eq!(
            extract_openai_embeddings(&reply).expect("parse"),
            vec![vec![1.0, 0.0], vec![0.0, 1.0]]
        );
    }

    #[test]
    fn malformed_replies_are_parse_errors() {
        assert!(matches!(
            extract_ollama_embeddings(&json!({ "embedding": [0.1] })),
            Err(LlmError::ParseError(_))
        ));
        assert!(matches!(
            extract_openai_embeddings(&json!({ "data": [{ "embedding": ["x"] }] })),
            Err(LlmError::ParseError(_))
        ));
    }
}
