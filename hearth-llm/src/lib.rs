//! # hearth-llm — Completion Service Layer for hearth
//!
//! Everything that talks to a language model goes through this crate:
//!   - **Prompt catalog** — the closed set of memory prompts
//!     ([`PromptOp`]) with built-in templates and TOML overrides
//!   - **Completion service** — the async seam ([`CompletionService`]) the
//!     memory subsystem calls, plus a token-metering decorator
//!   - **HTTP client** — Ollama and OpenAI-compatible backends with retry
//!   - **Embedding client** — text vectors from the same backends
//!
//! # Tiers
//!
//! ```text
//! Tier 1: Small model — importance scoring (one short integer per memory)
//! Tier 2: Large model — reflection topics and insights
//! ```

pub mod client;
pub mod embedding;
pub mod error;
pub mod prompt;
pub mod service;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use embedding::{EmbeddingClient, EmbeddingService};
pub use error::LlmError;
pub use prompt::{PromptCatalog, PromptOp};
pub use service::{CompletionService, MeteredCompletion, UsageSnapshot};
pub use types::{LlmRequest, LlmResponse, LlmTier};
