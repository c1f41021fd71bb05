//! The completion-service seam.
//!
//! The memory subsystem never talks HTTP directly; it holds an
//! `Arc<dyn CompletionService>` and awaits [`CompletionService::complete`].
//! Implementations are expected to be slow and possibly rate-limited, and
//! must be shareable across the reflection worker pool.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse, LlmTier};

/// Text completion: rendered prompt in, generated text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate a completion for an already rendered request.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the backend is unavailable or the request
    /// fails after whatever retry policy the implementation applies.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Point-in-time view of the usage recorded by a [`MeteredCompletion`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Successful calls routed to the small model.
    pub tier1_calls: u64,
    /// Successful calls routed to the large model.
    pub tier2_calls: u64,
    /// Calls that returned an error.
    pub failed_calls: u64,
    /// Total tokens generated across successful calls.
    pub tokens_generated: u64,
}

/// Decorator that counts calls and generated tokens of an inner service.
///
/// Counters are lock-free so the wrapper can sit under the concurrent
/// insight workers without serialising them.
pub struct MeteredCompletion<C> {
    inner: C,
    tier1_calls: AtomicU64,
    tier2_calls: AtomicU64,
    failed_calls: AtomicU64,
    tokens_generated: AtomicU64,
}

impl<C> MeteredCompletion<C> {
    /// Wrap a completion service.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            tier1_calls: AtomicU64::new(0),
            tier2_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            tokens_generated: AtomicU64::new(0),
        }
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn usage(&self) -> UsageSnapshot {
        UsageSnapshot {
            tier1_calls: self.tier1_calls.load(Ordering::Relaxed),
            tier2_calls: self.tier2_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            tokens_generated: self.tokens_generated.load(Ordering::Relaxed),
        }
    }

    /// The wrapped service.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CompletionService> CompletionService for MeteredCompletion<C> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match self.inner.complete(request).await {
            Ok(response) => {
                let counter = match request.tier {
                    LlmTier::SmallLocal => &self.tier1_calls,
                    LlmTier::LargeModel => &self.tier2_calls,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                self.tokens_generated
                    .fetch_add(u64::from(response.tokens_generated), Ordering::Relaxed);
                debug!(
                    tier = ?request.tier,
                    tokens = response.tokens_generated,
                    latency_ms = response.latency_ms,
                    "completion metered"
                );
                Ok(response)
            }
            Err(err) => {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }
}
