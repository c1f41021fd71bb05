//! Agent memory — the per-villager entry point.
//!
//! [`AgentMemory`] owns one agent's memory stream, its reflection state and
//! a handle to its external log. Adding a memory:
//!
//! 1. appends `{memory, timestamp}` to the agent's log,
//! 2. scores importance and adds it to the running aggregate,
//! 3. inserts the memory into the time-weighted store,
//! 4. runs a reflection cycle if the aggregate has passed the threshold.
//!
//! Insights from a cycle go through steps 1–3 with the cycle's `now`. The
//! `reflecting` flag stays up for the whole cycle so those insights cannot
//! start a nested one.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use hearth_llm::{CompletionService, PromptCatalog};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::HearthConfig;
use crate::embedding::{open_embedder, EmbeddingProvider};
use crate::error::{HearthError, Result};
use crate::importance::ImportanceScorer;
use crate::memory::{format_memories_detail, format_memories_simple, MemoryDocument};
use crate::persistence::{open_log, MemoryLog, MemoryRecord};
use crate::reflection::ReflectionEngine;
use crate::retrieval::MemoryStore;
use crate::types::{MemoryId, MemoryStats};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Reflection bookkeeping for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMemoryState {
    /// Importance accumulated since the last completed reflection.
    pub aggregate_importance: f64,
    /// Reflect once the aggregate exceeds this; `None` never reflects.
    pub reflection_threshold: Option<f64>,
    /// True for the whole duration of a reflection cycle.
    pub reflecting: bool,
    /// Scale applied to importance ratings.
    pub importance_weight: f64,
}

impl AgentMemoryState {
    /// Fresh state: nothing accumulated, not reflecting.
    #[must_use]
    pub fn new(importance_weight: f64, reflection_threshold: Option<f64>) -> Self {
        Self {
            aggregate_importance: 0.0,
            reflection_threshold,
            reflecting: false,
            importance_weight,
        }
    }

    /// Whether the threshold is set, exceeded, and no cycle is running.
    #[must_use]
    pub fn should_reflect(&self) -> bool {
        !self.reflecting
            && self
                .reflection_threshold
                .is_some_and(|t| self.aggregate_importance > t)
    }
}

#[derive(Debug, Default)]
struct Counters {
    reflections_completed: u64,
    insights_added: u64,
    score_parse_failures: u64,
    topic_failures: u64,
    last_retrieval_us: u64,
}

/// Prompt-ready memory context for an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryVariables {
    /// Memories relevant to the queries, one detailed line each.
    pub relevant_memories: String,
    /// The same memories, texts only, `"; "`-joined.
    pub relevant_memories_simple: String,
    /// Newest memories that fit the token budget, newest first.
    pub most_recent_memories: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`AgentMemory`] from its collaborators.
///
/// Anything not supplied comes from the config: the built-in prompt
/// catalog, the configured embedder, and the configured log backend.
pub struct AgentMemoryBuilder {
    agent_id: String,
    config: HearthConfig,
    catalog: Option<Arc<PromptCatalog>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    log: Option<Arc<dyn MemoryLog>>,
}

impl AgentMemoryBuilder {
    /// Start a builder for `agent_id` with default configuration.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            config: HearthConfig::default(),
            catalog: None,
            embedder: None,
            log: None,
        }
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: HearthConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `catalog` instead of the built-in prompts.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<PromptCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use `embedder` for retrieval.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use `log` instead of opening the configured backend.
    #[must_use]
    pub fn log(mut self, log: Arc<dyn MemoryLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Build the agent, creating its log if it does not exist yet.
    ///
    /// # Errors
    /// Returns `HearthError::Config` for invalid settings, or
    /// `HearthError::Persistence` if the log cannot be initialised.
    pub fn build(self, service: Arc<dyn CompletionService>) -> Result<AgentMemory> {
        let config = self.config;
        config.validate()?;

        let catalog = match self.catalog {
            Some(c) => c,
            None => Arc::new(match &config.llm.prompt_dir {
                Some(dir) => PromptCatalog::from_directory(dir)
                    .map_err(|e| HearthError::Config(e.to_string()))?,
                None => PromptCatalog::builtin(),
            }),
        };
        let embedder = match self.embedder {
            Some(e) => e,
            None => open_embedder(&config)?,
        };
        let log = match self.log {
            Some(l) => l,
            None => open_log(&config.persistence)?,
        };
        log.initialize(&self.agent_id)?;

        let scorer = ImportanceScorer::new(
            Arc::clone(&catalog),
            Arc::clone(&service),
            config.memory.importance_weight,
        );
        let engine = ReflectionEngine::new(
            catalog,
            service,
            Arc::clone(&embedder),
            config.memory.reflection_recent_k,
            config.reflection.max_concurrent_topics,
        );

        info!(
            agent = %self.agent_id,
            log = log.backend(),
            embedder = embedder.model_name(),
            threshold = ?config.memory.reflection_threshold,
            "agent memory ready"
        );

        Ok(AgentMemory {
            state: AgentMemoryState::new(
                config.memory.importance_weight,
                config.memory.reflection_threshold,
            ),
            store: Arc::new(Mutex::new(MemoryStore::new(config.retrieval))),
            agent_id: self.agent_id,
            embedder,
            scorer,
            engine,
            log,
            counters: Counters::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// One agent's memory: store, importance accounting, reflection and log.
pub struct AgentMemory {
    agent_id: String,
    state: AgentMemoryState,
    store: Arc<Mutex<MemoryStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: ImportanceScorer,
    engine: ReflectionEngine,
    log: Arc<dyn MemoryLog>,
    counters: Counters,
}

impl std::fmt::Debug for AgentMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMemory")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state)
            .field("memories", &self.store.lock().len())
            .finish_non_exhaustive()
    }
}

impl AgentMemory {
    /// Start a builder for `agent_id`.
    #[must_use]
    pub fn builder(agent_id: impl Into<String>) -> AgentMemoryBuilder {
        AgentMemoryBuilder::new(agent_id)
    }

    /// Build an agent wired entirely from `config`, including the HTTP
    /// completion client.
    ///
    /// # Errors
    /// Returns any configuration, prompt or log error.
    pub fn from_config(agent_id: impl Into<String>, config: HearthConfig) -> Result<Self> {
        let client = config.llm.build_client()?;
        AgentMemoryBuilder::new(agent_id)
            .config(config)
            .build(Arc::new(client))
    }

    /// The agent's name, which also keys its log.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Current reflection bookkeeping.
    #[must_use]
    pub fn state(&self) -> &AgentMemoryState {
        &self.state
    }

    /// Shared handle to the memory store.
    #[must_use]
    pub fn store(&self) -> &Arc<Mutex<MemoryStore>> {
        &self.store
    }

    /// Record an observation and reflect if the threshold is crossed.
    ///
    /// `now` stands in for the wall clock when set. Returns the id of the
    /// inserted memory; insights from a triggered reflection are stored
    /// too but not listed.
    ///
    /// # Errors
    /// Returns `HearthError::Persistence` if the log cannot be appended to
    /// (the memory is then not inserted), or `HearthError::Template` on
    /// prompt misuse. Scoring and insight failures are not errors.
    pub async fn add_memory(
        &mut self,
        text: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<MemoryId>> {
        let id = self.record(text, now).await?;
        if self.state.should_reflect() {
            self.reflect(now).await?;
        }
        Ok(vec![id])
    }

    /// Run one reflection cycle now, whatever the aggregate.
    ///
    /// Returns the insights added. Does nothing while a cycle is running.
    ///
    /// # Errors
    /// Same as [`add_memory`](Self::add_memory).
    pub async fn pause_to_reflect(&mut self, now: Option<DateTime<Utc>>) -> Result<Vec<String>> {
        if self.state.reflecting {
            debug!(agent = %self.agent_id, "already reflecting");
            return Ok(Vec::new());
        }
        self.reflect(now).await
    }

    /// Memories relevant to `query`, best first.
    ///
    /// `now` only affects recency scoring and the access time recorded on
    /// the returned memories.
    ///
    /// # Errors
    /// Returns `HearthError::Embedding` if the query cannot be embedded.
    pub async fn fetch_memories(
        &mut self,
        query: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<MemoryDocument>> {
        let start = Instant::now();
        let query_embedding = self.embedder.embed(query).await?;
        let found = self.store.lock().retrieve(query, &query_embedding, now, None);
        self.counters.last_retrieval_us =
            u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        Ok(found)
    }

    /// Prompt context: memories relevant to `queries` and, with a budget,
    /// the newest memories whose whitespace-separated tokens fit in it.
    ///
    /// # Errors
    /// Returns `HearthError::Embedding` if a query cannot be embedded.
    pub async fn load_memory_variables(
        &mut self,
        queries: &[&str],
        now: Option<DateTime<Utc>>,
        recent_token_budget: Option<usize>,
    ) -> Result<MemoryVariables> {
        let mut vars = MemoryVariables::default();

        if !queries.is_empty() {
            let mut relevant = Vec::new();
            for query in queries {
                relevant.extend(self.fetch_memories(query, now).await?);
            }
            vars.relevant_memories = format_memories_detail(&relevant, "");
            vars.relevant_memories_simple = format_memories_simple(&relevant);
        }

        if let Some(budget) = recent_token_budget {
            let store = self.store.lock();
            let mut consumed = 0;
            let mut recent = Vec::new();
            for doc in store.documents().iter().rev() {
                if consumed >= budget {
                    break;
                }
                consumed += doc.text.split_whitespace().count();
                if consumed < budget {
                    recent.push(doc.clone());
                }
            }
            vars.most_recent_memories = format_memories_simple(&recent);
        }

        Ok(vars)
    }

    /// Store the outcome of a conversation turn, if there is one.
    ///
    /// # Errors
    /// Same as [`add_memory`](Self::add_memory).
    pub async fn save_context(
        &mut self,
        add_memory: Option<&str>,
        now: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match add_memory {
            Some(text) if !text.trim().is_empty() => {
                self.add_memory(text, now).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Runtime counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_memories: self.store.lock().len(),
            aggregate_importance: self.state.aggregate_importance,
            reflections_completed: self.counters.reflections_completed,
            insights_added: self.counters.insights_added,
            score_parse_failures: self.counters.score_parse_failures,
            topic_failures: self.counters.topic_failures,
            last_retrieval_us: self.counters.last_retrieval_us,
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Log, score, accumulate and insert one memory. Never reflects.
    async fn record(&mut self, text: &str, now: Option<DateTime<Utc>>) -> Result<MemoryId> {
        let at = now.unwrap_or_else(Utc::now);

        let log = Arc::clone(&self.log);
        let agent = self.agent_id.clone();
        let entry = MemoryRecord::new(text, at);
        tokio::task::spawn_blocking(move || log.append(&agent, &entry))
            .await
            .map_err(|e| HearthError::persistence(&self.agent_id, e))??;

        let scored = self.scorer.score(text).await?;
        if scored.rating.is_none() {
            self.counters.score_parse_failures += 1;
        }
        self.state.aggregate_importance += scored.score;

        let embedding = self.embedder.embed(text).await?;
        let id = self
            .store
            .lock()
            .insert(text, scored.score, Some(at), embedding);
        debug!(
            agent = %self.agent_id,
            %id,
            score = scored.score,
            aggregate = self.state.aggregate_importance,
            "memory added"
        );
        Ok(id)
    }

    /// Guarded reflection: raise the flag, run, reset on completion.
    async fn reflect(&mut self, now: Option<DateTime<Utc>>) -> Result<Vec<String>> {
        self.state.reflecting = true;
        let span = info_span!("reflection", agent = %self.agent_id);
        let outcome = self.reflection_cycle(now).instrument(span).await;
        if outcome.is_ok() {
            self.state.aggregate_importance = 0.0;
        }
        self.state.reflecting = false;
        outcome
    }

    async fn reflection_cycle(&mut self, now: Option<DateTime<Utc>>) -> Result<Vec<String>> {
        let start = Instant::now();
        let topics = self.engine.derive_topics(&self.store).await?;
        info!(
            topics = topics.len(),
            aggregate = self.state.aggregate_importance,
            "reflecting"
        );

        let mut tasks = self
            .engine
            .spawn_insights(topics, Arc::clone(&self.store), now);
        let mut added = Vec::new();
        while let Some(done) = tasks.next().await {
            match done.outcome {
                Ok(insights) => {
                    debug!(topic = %done.topic, insights = insights.len(), "topic done");
                    for insight in &insights {
                        self.record(insight, now).await?;
                        self.counters.insights_added += 1;
                    }
                    added.extend(insights);
                }
                Err(e) => {
                    self.counters.topic_failures += 1;
                    warn!(topic = %done.topic, error = %e, "insight generation failed");
                }
            }
        }

        self.counters.reflections_completed += 1;
        info!(
            insights = added.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "reflection complete"
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteLog;
    use async_trait::async_trait;
    use hearth_llm::{LlmError, LlmRequest, LlmResponse};

    struct Echo(&'static str);

    #[async_trait]
    impl CompletionService for Echo {
        async fn complete(&self, _request: &LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
            Ok(LlmResponse::from_text(self.0))
        }
    }

    fn agent(answer: &'static str) -> AgentMemory {
        AgentMemory::builder("Villager 0")
            .log(Arc::new(SqliteLog::open_in_memory().expect("log")))
            .build(Arc::new(Echo(answer)))
            .expect("build")
    }

    #[test]
    fn state_only_reflects_over_set_threshold() {
        let mut state = AgentMemoryState::new(0.15, None);
        state.aggregate_importance = 100.0;
        assert!(!state.should_reflect());

        state.reflection_threshold = Some(0.5);
        state.aggregate_importance = 0.5;
        assert!(!state.should_reflect());
        state.aggregate_importance = 0.51;
        assert!(state.should_reflect());
        state.reflecting = true;
        assert!(!state.should_reflect());
    }

    #[tokio::test]
    async fn add_memory_returns_its_id() {
        let mut memory = agent("7");
        let ids = memory.add_memory("I fixed the roof", None).await.expect("add");
        assert_eq!(ids.len(), 1);
        let store = memory.store().lock();
        let doc = store.get(ids[0]).expect("stored");
        assert!((doc.importance - 0.105).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unparseable_scores_are_counted() {
        let mut memory = agent("no idea");
        memory.add_memory("hmm", None).await.expect("add");
        let stats = memory.stats();
        assert_eq!(stats.score_parse_failures, 1);
        assert_eq!(stats.aggregate_importance, 0.0);
        assert_eq!(stats.total_memories, 1);
    }

    #[tokio::test]
    async fn recent_budget_takes_newest_first() {
        let mut memory = agent("1");
        let t = Utc::now();
        memory.add_memory("one two", Some(t)).await.expect("add");
        memory.add_memory("three four", Some(t)).await.expect("add");
        memory.add_memory("five six", Some(t)).await.expect("add");

        let vars = memory.load_memory_variables(&[], Some(t), Some(5)).await.expect("vars");
        assert_eq!(vars.most_recent_memories, "five six; three four");
        assert!(vars.relevant_memories.is_empty());
    }

    #[tokio::test]
    async fn save_context_skips_empty_turns() {
        let mut memory = agent("3");
        memory.save_context(None, None).await.expect("none");
        memory.save_context(Some("   "), None).await.expect("blank");
        assert_eq!(memory.stats().total_memories, 0);
        memory.save_context(Some("Villager 4 waved"), None).await.expect("some");
        assert_eq!(memory.stats().total_memories, 1);
    }

    struct Unreachable;

    #[async_trait]
    impl EmbeddingProvider for Unreachable {
        async fn embed(&self, _text: &str) -> Result<crate::types::Embedding> {
            Err(HearthError::Embedding("connection refused".into()))
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn model_name(&self) -> &str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn embedding_failure_stores_nothing() {
        let mut memory = AgentMemory::builder("Villager 0")
            .log(Arc::new(SqliteLog::open_in_memory().expect("log")))
            .embedder(Arc::new(Unreachable))
            .build(Arc::new(Echo("5")))
            .expect("build");
        let added = memory.add_memory("the well ran dry", None).await;
        assert!(matches!(added, Err(HearthError::Embedding(_))));
        assert_eq!(memory.stats().total_memories, 0);
        assert!(matches!(
            memory.fetch_memories("well", None).await,
            Err(HearthError::Embedding(_))
        ));
    }

    #[test]
    fn invalid_config_fails_build() {
        let mut config = HearthConfig::default();
        config.retrieval.k = 0;
        let built = AgentMemory::builder("Villager 0")
            .config(config)
            .log(Arc::new(SqliteLog::open_in_memory().expect("log")))
            .build(Arc::new(Echo("1")));
        assert!(matches!(built, Err(HearthError::Config(_))));
    }
}
