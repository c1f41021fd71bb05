//! Scoring functions for time-weighted retrieval.
//!
//! Score = Recency + Importance + Relevance
//!
//! Where:
//!   Recency(m)    = (1 - decay_rate) ^ hours_since_last_access
//!   Importance(m) = salience fixed at insertion, in `[0, importance_weight]`
//!   Relevance(m)  = max(0, cosine(query, m)), or the configured default
//!                   salience for recent memories outside the neighbour set

use chrono::{DateTime, Utc};

use crate::memory::MemoryDocument;
use crate::types::{Embedding, RetrievalScore};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Hours elapsed from `last_accessed` to `now`; never negative.
#[must_use]
pub fn hours_passed(now: DateTime<Utc>, last_accessed: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(last_accessed);
    #[allow(clippy::cast_precision_loss)]
    let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
    (seconds / SECONDS_PER_HOUR).max(0.0)
}

/// Exponential recency decay: 1.0 for a memory touched just now.
#[must_use]
pub fn recency_score(decay_rate: f64, hours: f64) -> f64 {
    (1.0 - decay_rate).powf(hours)
}

/// Relevance of `memory` to the query: clamped cosine similarity.
///
/// `None` when the memory has no embedding.
#[must_use]
pub fn relevance_score(memory: &MemoryDocument, query: &Embedding) -> Option<f64> {
    memory
        .embedding
        .as_ref()
        .map(|emb| f64::from(query.cosine_similarity(emb).max(0.0)))
}

/// Combined time-weighted score for one candidate.
#[must_use]
pub fn combined_score(
    memory: &MemoryDocument,
    relevance: Option<f64>,
    now: DateTime<Utc>,
    decay_rate: f64,
) -> RetrievalScore {
    let recency = recency_score(decay_rate, hours_passed(now, memory.last_accessed_at));
    RetrievalScore::new(recency + memory.importance + relevance.unwrap_or(0.0))
}
