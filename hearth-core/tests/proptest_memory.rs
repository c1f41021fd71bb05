//! Property-Based Tests for Hearth Core
//!
//! Uses `proptest` to check the memory invariants under random inputs:
//! importance accounting, list parsing, rating parsing and the
//! non-destructive nature of retrieval.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use hearth_core::config::{HearthConfig, RetrievalConfig};
use hearth_core::embedding::HashingEmbeddingProvider;
use hearth_core::importance::{parse_rating, scale_rating};
use hearth_core::persistence::SqliteLog;
use hearth_core::reflection::parse_list;
use hearth_core::{AgentMemory, MemoryStore};
use hearth_llm::{CompletionService, LlmError, LlmRequest, LlmResponse};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_memory_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..8).prop_map(|words| words.join(" "))
}

/// List items as a model would write them: non-empty, single line, trimmed,
/// not starting with a digit.
fn arb_item() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z ,?']{0,30}".prop_map(|s| s.trim().to_string())
}

/// Replays a fixed sequence of ratings, one per importance prompt.
struct RatingTape {
    ratings: Vec<String>,
    next: AtomicUsize,
}

#[async_trait]
impl CompletionService for RatingTape {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse::from_text(self.ratings[i % self.ratings.len()].clone()))
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

// ---------------------------------------------------------------------------
// Importance accounting
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Without reflection, the aggregate is the sum of the individual scores.
    #[test]
    fn aggregate_is_sum_of_scores(
        ratings in prop::collection::vec(0u64..15, 1..20),
        weight in 0.01f64..=1.0,
    ) {
        let answers: Vec<String> = ratings.iter().map(|r| format!("Rating: {r}")).collect();
        let service = Arc::new(RatingTape { ratings: answers, next: AtomicUsize::new(0) });
        let mut config = HearthConfig::default();
        config.memory.importance_weight = weight;
        let mut memory = AgentMemory::builder("Villager 7")
            .config(config)
            .log(Arc::new(SqliteLog::open_in_memory().expect("log")))
            .build(service)
            .expect("build");

        let rt = runtime();
        let mut expected = 0.0;
        for (i, r) in ratings.iter().enumerate() {
            rt.block_on(memory.add_memory(&format!("memory {i}"), None)).expect("add");
            expected += scale_rating((*r).min(10), weight);
        }

        prop_assert!((memory.state().aggregate_importance - expected).abs() < 1e-9);
        let stats = memory.stats();
        prop_assert_eq!(stats.total_memories, ratings.len());
        let store = memory.store().lock();
        for doc in store.documents() {
            prop_assert!(doc.importance >= 0.0 && doc.importance <= weight + 1e-12);
        }
    }

    /// Any answer with a digit run rates within 0–10; scaled, within the weight.
    #[test]
    fn ratings_stay_in_range(prefix in "[^0-9]{0,12}", n in any::<u64>(), suffix in "[^0-9]{0,12}") {
        let answer = format!("{prefix}{n}{suffix}");
        let rating = parse_rating(&answer);
        prop_assert_eq!(rating, Some(n.min(10)));
        let scaled = scale_rating(n.min(10), 0.15);
        prop_assert!((0.0..=0.15 + 1e-12).contains(&scaled));
    }

    /// Answers without digits never rate.
    #[test]
    fn digitless_answers_do_not_rate(answer in "[^0-9]{0,40}") {
        prop_assert_eq!(parse_rating(&answer), None);
    }
}

// ---------------------------------------------------------------------------
// List parsing
// ---------------------------------------------------------------------------

proptest! {
    /// Numbered items separated by optional blank lines parse back to the items.
    #[test]
    fn numbered_lists_round_trip(
        items in prop::collection::vec(arb_item().prop_filter("non-empty", |s| !s.is_empty()), 0..8),
        blank_every in 1usize..4,
        spaced in any::<bool>(),
    ) {
        let mut text = String::new();
        for (i, item) in items.iter().enumerate() {
            let sep = if spaced { " " } else { "" };
            text.push_str(&format!("{}.{sep}{item}\n", i + 1));
            if i % blank_every == 0 {
                text.push_str("   \n");
            }
        }
        prop_assert_eq!(parse_list(&text), items);
    }

    /// At most one item per non-blank line, each trimmed and non-empty.
    #[test]
    fn items_are_trimmed_and_non_empty(lines in prop::collection::vec(".{0,20}", 0..10)) {
        let text = lines.join("\n");
        let parsed = parse_list(&text);
        let non_blank = text.lines().filter(|l| !l.trim().is_empty()).count();
        prop_assert!(parsed.len() <= non_blank);
        for item in &parsed {
            prop_assert!(!item.is_empty());
            prop_assert_eq!(item.trim(), item.as_str());
        }
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Retrieval never adds, drops or reorders memories and returns at most
    /// `k` distinct ones, each touched at the query time.
    #[test]
    fn retrieval_keeps_the_stream(
        texts in prop::collection::vec(arb_memory_text(), 1..30),
        queries in prop::collection::vec(arb_memory_text(), 1..5),
        k in 1usize..6,
        hours in 0i64..500,
    ) {
        let config = RetrievalConfig { k, search_k: 10, ..RetrievalConfig::default() };
        let embedder = HashingEmbeddingProvider::new(64).expect("provider");
        let mut store = MemoryStore::new(config);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 3, 6, 0, 0).single().expect("valid");
        for (i, text) in texts.iter().enumerate() {
            store.insert(text, 0.01 * (i % 10) as f64, Some(t0), embedder.vector(text));
        }
        let before: Vec<_> = store.documents().iter().map(|m| (m.id, m.text.clone())).collect();

        let now = t0 + Duration::hours(hours);
        for query in &queries {
            let hits = store.retrieve(query, &embedder.vector(query), Some(now), None);
            prop_assert!(hits.len() <= k);
            prop_assert_eq!(hits.len(), k.min(texts.len()));
            let distinct: HashSet<_> = hits.iter().map(|m| m.id).collect();
            prop_assert_eq!(distinct.len(), hits.len());
            for hit in &hits {
                prop_assert_eq!(store.get(hit.id).expect("hit").last_accessed_at, now);
            }
        }

        let after: Vec<_> = store.documents().iter().map(|m| (m.id, m.text.clone())).collect();
        prop_assert_eq!(before, after);
    }
}
