//! LLM Client — Ollama and OpenAI-compatible backends behind [`CompletionService`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::service::CompletionService;
use crate::types::{LlmRequest, LlmResponse, LlmTier};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama { base_url: String },
    /// OpenAI-compatible API (Azure deployments, Together, vLLM, ...).
    OpenAiCompatible { base_url: String, api_key: String },
    /// No LLM available — every call fails with [`LlmError::Unavailable`].
    None,
}

/// HTTP completion client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    tier1_model: String,
    tier2_model: String,
    max_retries: u32,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(
        provider: LlmProvider,
        tier1_model: impl Into<String>,
        tier2_model: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            tier1_model: tier1_model.into(),
            tier2_model: tier2_model.into(),
            max_retries,
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), String::new(), 0)
    }

    /// Check if the client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    fn model_for(&self, tier: LlmTier) -> &str {
        match tier {
            LlmTier::SmallLocal => &self.tier1_model,
            LlmTier::LargeModel => &self.tier2_model,
        }
    }

    /// POST `body` to `url` and pull `(text, tokens)` out of the JSON reply
    /// with `extract`.
    async fn post_with_retry(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
        request: &LlmRequest,
        extract: fn(&Value) -> (String, u32),
    ) -> Result<LlmResponse, LlmError> {
        let (json, latency_ms) =
            post_json(&self.http, url, api_key, body, request.timeout_ms, self.max_retries).await?;
        let (text, tokens_generated) = extract(&json);
        Ok(LlmResponse {
            text,
            tokens_generated,
            latency_ms,
            model: self.model_for(request.tier).to_string(),
        })
    }
}

/// POST `body` as JSON, retrying up to `max_retries` times on transport
/// errors and non-success statuses.
///
/// Returns the decoded reply and the latency of the successful attempt.
pub(crate) async fn post_json(
    http: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    timeout_ms: u64,
    max_retries: u32,
) -> Result<(Value, u64), LlmError> {
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            debug!("Retrying LLM call (attempt {}/{})", attempt + 1, max_retries + 1);
        }

        let start = Instant::now();
        let mut builder = http
            .post(url)
            .json(body)
            .timeout(Duration::from_millis(timeout_ms));
        if let Some(key) = api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let result = builder.send().await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(resp) if resp.status().is_success() => {
                let json: Value = resp
                    .json()
                    .await
                    .map_err(|e| LlmError::ParseError(e.to_string()))?;
                return Ok((json, latency_ms));
            }
            Ok(resp) => {
                let status = resp.status();
                last_error = format!("HTTP {}: {}", status, resp.text().await.unwrap_or_default());
                warn!(url, "LLM backend returned error: {}", last_error);
            }
            Err(e) => {
                last_error = e.to_string();
                if e.is_timeout() {
                    warn!(url, "LLM request timed out after {}ms", timeout_ms);
                } else {
                    warn!(url, "LLM request failed: {}", last_error);
                }
            }
        }
    }

    Err(LlmError::RetriesExhausted {
        attempts: max_retries + 1,
        last_error,
    })
}

fn ollama_body(model: &str, request: &LlmRequest) -> Value {
    json!({
        "model": model,
        "prompt": request.prompt,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        }
    })
}

fn openai_body(model: &str, request: &LlmRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "user", "content": request.prompt },
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    })
}

fn extract_ollama(json: &Value) -> (String, u32) {
    let text = json["response"].as_str().unwrap_or("").to_string();
    let tokens = json["eval_count"].as_u64().unwrap_or(0);
    (text, u32::try_from(tokens).unwrap_or(u32::MAX))
}

fn extract_openai(json: &Value) -> (String, u32) {
    let text = json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();
    let tokens = json["usage"]["completion_tokens"].as_u64().unwrap_or(0);
    (text, u32::try_from(tokens).unwrap_or(u32::MAX))
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = self.model_for(request.tier);
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
                let body = ollama_body(model, request);
                self.post_with_retry(&url, None, &body, request, extract_ollama)
                    .await
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
                let body = openai_body(model, request);
                self.post_with_retry(&url, Some(api_key), &body, request, extract_openai)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client
            .complete(&LlmRequest::tier1("Rating: "))
            .await
            .expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn routes_models_by_tier() {
        let client = LlmClient::new(
            LlmProvider::Ollama { base_url: "http://localhost:11434".into() },
            "small",
            "large",
            1,
        );
        assert_eq!(client.model_for(LlmTier::SmallLocal), "small");
        assert_eq!(client.model_for(LlmTier::LargeModel), "large");
    }

    #[test]
    fn extracts_ollama_reply() {
        let reply = json!({ "response": "7", "eval_count": 2 });
        assert_eq!(extract_ollama(&reply), ("7".to_string(), 2));
    }

    #[test]
    fn extracts_openai_reply() {
        let reply = json!({
            "choices": [{ "message": { "content": "1. Who is the werewolf?" } }],
            "usage": { "completion_tokens": 9 }
        });
        assert_eq!(
            extract_openai(&reply),
            ("1. Who is the werewolf?".to_string(), 9)
        );
    }

    #[test]
    fn missing_fields_extract_as_empty() {
        assert_eq!(extract_openai(&json!({})), (String::new(), 0));
    }

    #[test]
    fn request_bodies_carry_prompt() {
        let request = LlmRequest::tier2("Question: why?");
        let body = openai_body("m", &request);
        assert_eq!(body["messages"][0]["content"], "Question: why?");
        let body = ollama_body("m", &request);
        assert_eq!(body["prompt"], "Question: why?");
        assert_eq!(body["stream"], false);
    }
}
