//! Memory documents — the unit the memory stream stores and ranks.
//!
//! A document's text and importance are fixed at insertion. Only
//! `last_accessed_at` moves, each time retrieval returns the document.

pub mod format;

pub use format::{format_memories_detail, format_memories_simple, format_memory_detail};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Embedding, MemoryId};

/// A single natural-language observation held in an agent's memory stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Unique identifier for this memory.
    pub id: MemoryId,
    /// Position in the agent's memory stream (insertion order).
    pub buffer_idx: usize,
    /// The observation or insight text.
    pub text: String,
    /// Salience in `[0, importance_weight]`, scored once at insertion.
    pub importance: f64,
    /// When the memory was formed.
    pub created_at: DateTime<Utc>,
    /// When retrieval last returned this memory.
    pub last_accessed_at: DateTime<Utc>,
    /// Vector embedding of `text` for relevance scoring.
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

impl MemoryDocument {
    /// Create a document formed (and last accessed) at `at`.
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        importance: f64,
        at: DateTime<Utc>,
        buffer_idx: usize,
    ) -> Self {
        Self {
            id: MemoryId::new(),
            buffer_idx,
            text: text.into(),
            importance,
            created_at: at,
            last_accessed_at: at,
            embedding: None,
        }
    }

    /// Attach a precomputed embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Record a retrieval at `now`.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }
}
