//! Memory Retrieval — time-weighted relevance index over one agent's stream.
//!
//! The store compares vectors but never computes them: callers embed text
//! with an [`EmbeddingProvider`](crate::embedding::EmbeddingProvider) first,
//! so no model call happens while the store is locked.
//!
//! Candidates for a query are the `search_k` most similar memories plus the
//! latest `k` memories of the stream. Each candidate is rescored with
//! recency decay, importance and relevance (see [`scoring`]), and the top
//! `k` are returned. Returning a memory refreshes its `last_accessed_at`.

pub mod scoring;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::memory::MemoryDocument;
use crate::types::{Embedding, MemoryId, RetrievalScore};

/// A ranked candidate, before the top-`k` cut.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    idx: usize,
    score: RetrievalScore,
}

/// Time-weighted memory stream for a single agent.
pub struct MemoryStore {
    config: RetrievalConfig,
    stream: Vec<MemoryDocument>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("memories", &self.stream.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            stream: Vec::new(),
        }
    }

    /// Append a memory formed at `at_time` (wall-clock now when `None`),
    /// indexed under `embedding`.
    pub fn insert(
        &mut self,
        text: &str,
        importance: f64,
        at_time: Option<DateTime<Utc>>,
        embedding: Embedding,
    ) -> MemoryId {
        let at = at_time.unwrap_or_else(Utc::now);
        let doc = MemoryDocument::new(text, importance, at, self.stream.len())
            .with_embedding(embedding);
        let id = doc.id;
        self.stream.push(doc);
        id
    }

    /// Return the `k` best memories for `query`, embedded as
    /// `query_embedding` (configured `k` when `None`).
    ///
    /// Ranking uses `at_time` (or now) as the present; ties go to the most
    /// recently created memory. Every returned memory has its
    /// `last_accessed_at` set to that present.
    pub fn retrieve(
        &mut self,
        query: &str,
        query_embedding: &Embedding,
        at_time: Option<DateTime<Utc>>,
        k: Option<usize>,
    ) -> Vec<MemoryDocument> {
        let now = at_time.unwrap_or_else(Utc::now);
        let k = k.unwrap_or(self.config.k);
        if k == 0 || self.stream.is_empty() {
            return Vec::new();
        }

        // Recent memories enter with the default salience; neighbours
        // overwrite that with their actual similarity.
        let mut relevance: HashMap<usize, Option<f64>> = HashMap::new();
        let recent_start = self.stream.len().saturating_sub(k);
        for idx in recent_start..self.stream.len() {
            relevance.insert(idx, self.config.default_salience);
        }
        for (idx, sim) in self.nearest(query_embedding) {
            relevance.insert(idx, Some(sim));
        }

        let mut ranked: Vec<Candidate> = relevance
            .into_iter()
            .map(|(idx, rel)| Candidate {
                idx,
                score: scoring::combined_score(&self.stream[idx], rel, now, self.config.decay_rate),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| self.stream[b.idx].created_at.cmp(&self.stream[a.idx].created_at))
                .then_with(|| b.idx.cmp(&a.idx))
        });
        let candidates = ranked.len();
        ranked.truncate(k);

        let results = ranked
            .iter()
            .map(|c| {
                let doc = &mut self.stream[c.idx];
                doc.record_access(now);
                doc.clone()
            })
            .collect::<Vec<_>>();

        debug!(
            query,
            candidates,
            returned = results.len(),
            "retrieved memories"
        );
        results
    }

    /// The `search_k` memories most similar to `query`, with clamped similarity.
    fn nearest(&self, query: &Embedding) -> Vec<(usize, f64)> {
        let mut sims: Vec<(usize, f64)> = self
            .stream
            .iter()
            .enumerate()
            .filter_map(|(idx, doc)| scoring::relevance_score(doc, query).map(|s| (idx, s)))
            .collect();
        sims.sort_by_key(|&(idx, s)| (std::cmp::Reverse(OrderedFloat(s)), std::cmp::Reverse(idx)));
        sims.truncate(self.config.search_k);
        sims
    }

    /// The last `last_k` memories in insertion order (all of them if fewer).
    #[must_use]
    pub fn recent(&self, last_k: usize) -> Vec<MemoryDocument> {
        let start = self.stream.len().saturating_sub(last_k);
        self.stream[start..].to_vec()
    }

    /// Look up a memory by id.
    #[must_use]
    pub fn get(&self, id: MemoryId) -> Option<&MemoryDocument> {
        self.stream.iter().find(|m| m.id == id)
    }

    /// The whole stream, oldest first.
    #[must_use]
    pub fn documents(&self) -> &[MemoryDocument] {
        &self.stream
    }

    /// Number of memories held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// Whether the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Retrieval settings in force.
    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }
}
