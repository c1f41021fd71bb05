//! Core types for LLM requests and responses.

use serde::{Deserialize, Serialize};

/// Model tier a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmTier {
    /// Small model. Cheap, short answers (importance ratings).
    SmallLocal,
    /// Large model. Reflection questions and insights.
    LargeModel,
}

/// A fully rendered request to the completion service.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// The rendered prompt text.
    pub prompt: String,
    /// Which tier is this request?
    pub tier: LlmTier,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Create a new Tier 1 request.
    #[must_use]
    pub fn tier1(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tier: LlmTier::SmallLocal,
            max_tokens: 16,
            temperature: 0.2,
            timeout_ms: 5000,
        }
    }

    /// Create a new Tier 2 request.
    #[must_use]
    pub fn tier2(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tier: LlmTier::LargeModel,
            max_tokens: 400,
            temperature: 0.7,
            timeout_ms: 30_000,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

impl LlmResponse {
    /// A response carrying only generated text (used by scripted services).
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}
