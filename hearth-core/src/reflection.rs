//! Reflection — turning recent memories into higher-level insights.
//!
//! A cycle has two model-driven phases:
//!
//! 1. **Topics**: the latest memories are rendered as an observation block
//!    and the large model proposes salient questions about them.
//! 2. **Insights**: every topic is handed to its own task. Each task pulls
//!    the memories relevant to its topic, asks for insights, and parses the
//!    answer. At most `max_concurrent_topics` tasks talk to the model at once.
//!
//! [`InsightTasks`] yields finished topics in completion order. A failing
//! topic reports its error without disturbing its siblings. Writing the
//! insights back into memory is the caller's job (see
//! [`AgentMemory`](crate::agent::AgentMemory)).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_llm::{CompletionService, PromptCatalog, PromptOp};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{HearthError, Result};
use crate::memory::format_memory_detail;
use crate::retrieval::MemoryStore;

// ---------------------------------------------------------------------------
// List parsing
// ---------------------------------------------------------------------------

/// Split a model answer into items, one per line with content.
///
/// A leading ordinal (`"3."`, `"12. "`) is stripped and each item trimmed.
/// Lines that are blank, or hold nothing but an ordinal, yield no item.
#[must_use]
pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| strip_ordinal(line).trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_ordinal(line: &str) -> &str {
    let rest = line.trim_start();
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && rest[digits..].starts_with('.') {
        &rest[digits + 1..]
    } else {
        line
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Insights produced for one topic.
#[derive(Debug)]
pub struct TopicInsights {
    /// The reflection question.
    pub topic: String,
    /// Parsed insights, or why the topic produced none.
    pub outcome: Result<Vec<String>>,
}

/// Derives topics and fans insight generation out over a bounded pool.
#[derive(Clone)]
pub struct ReflectionEngine {
    catalog: Arc<PromptCatalog>,
    service: Arc<dyn CompletionService>,
    embedder: Arc<dyn EmbeddingProvider>,
    recent_k: usize,
    max_concurrent_topics: usize,
}

impl ReflectionEngine {
    /// Create an engine.
    ///
    /// `embedder` turns topics into retrieval queries; `recent_k` memories
    /// feed topic derivation; `max_concurrent_topics` bounds the insight
    /// worker pool (minimum 1).
    #[must_use]
    pub fn new(
        catalog: Arc<PromptCatalog>,
        service: Arc<dyn CompletionService>,
        embedder: Arc<dyn EmbeddingProvider>,
        recent_k: usize,
        max_concurrent_topics: usize,
    ) -> Self {
        Self {
            catalog,
            service,
            embedder,
            recent_k,
            max_concurrent_topics: max_concurrent_topics.max(1),
        }
    }

    /// Ask for the salient questions raised by the latest memories.
    ///
    /// A failed or empty completion yields no topics.
    ///
    /// # Errors
    /// Returns `HearthError::Template` if the topics prompt cannot be rendered.
    pub async fn derive_topics(&self, store: &Mutex<MemoryStore>) -> Result<Vec<String>> {
        let observations = {
            let store = store.lock();
            store
                .recent(self.recent_k)
                .iter()
                .map(|m| format_memory_detail(m, ""))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let request = self
            .catalog
            .request(PromptOp::TopicsOfReflection, &[("observations", &observations)])?;

        let topics = match self.service.complete(&request).await {
            Ok(resp) => parse_list(&resp.text),
            Err(e) => {
                warn!(error = %e, "topic derivation failed, reflecting on nothing");
                Vec::new()
            }
        };
        if topics.is_empty() {
            debug!("no reflection topics derived");
        }
        Ok(topics)
    }

    /// Start one insight task per topic.
    ///
    /// Relevant memories are retrieved with `now` as the present.
    pub fn spawn_insights(
        &self,
        topics: Vec<String>,
        store: Arc<Mutex<MemoryStore>>,
        now: Option<DateTime<Utc>>,
    ) -> InsightTasks {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_topics));
        let mut set = JoinSet::new();
        let mut topics_by_task = HashMap::with_capacity(topics.len());

        for topic in topics {
            let sem = Arc::clone(&semaphore);
            let catalog = Arc::clone(&self.catalog);
            let service = Arc::clone(&self.service);
            let embedder = Arc::clone(&self.embedder);
            let store = Arc::clone(&store);
            let task_topic = topic.clone();

            let handle = set.spawn(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|_| HearthError::Reflection("insight worker pool closed".into()))?;
                let models = TopicModels {
                    catalog: &catalog,
                    service: service.as_ref(),
                    embedder: embedder.as_ref(),
                };
                insights_on_topic(models, &store, &task_topic, now).await
            });
            topics_by_task.insert(handle.id(), topic);
        }

        InsightTasks {
            set,
            topics_by_task,
        }
    }
}

/// What one insight task talks to.
#[derive(Clone, Copy)]
struct TopicModels<'a> {
    catalog: &'a PromptCatalog,
    service: &'a dyn CompletionService,
    embedder: &'a dyn EmbeddingProvider,
}

async fn insights_on_topic(
    models: TopicModels<'_>,
    store: &Mutex<MemoryStore>,
    topic: &str,
    now: Option<DateTime<Utc>>,
) -> Result<Vec<String>> {
    let query = models.embedder.embed(topic).await?;
    let related = store.lock().retrieve(topic, &query, now, None);
    let statements = related
        .iter()
        .enumerate()
        .map(|(i, m)| format_memory_detail(m, &format!("{}. ", i + 1)))
        .collect::<Vec<_>>()
        .join("\n");

    let request = models.catalog.request(
        PromptOp::InsightsOnTopic,
        &[("topic", topic), ("related_statements", &statements)],
    )?;
    let resp = models.service.complete(&request).await?;
    Ok(parse_list(&resp.text))
}

/// Running insight tasks of one reflection cycle.
pub struct InsightTasks {
    set: JoinSet<Result<Vec<String>>>,
    topics_by_task: HashMap<Id, String>,
}

impl InsightTasks {
    /// Topics still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Whether every topic has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Wait for the next topic to finish; `None` once all are collected.
    ///
    /// A panicked task is reported as that topic's failure.
    pub async fn next(&mut self) -> Option<TopicInsights> {
        let joined = self.set.join_next_with_id().await?;
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => (
                e.id(),
                Err(HearthError::Reflection(format!("insight task aborted: {e}"))),
            ),
        };
        let topic = self.topics_by_task.remove(&id).unwrap_or_default();
        Some(TopicInsights { topic, outcome })
    }

    /// Drain every topic, in completion order.
    pub async fn collect(mut self) -> Vec<TopicInsights> {
        let mut done = Vec::with_capacity(self.len());
        while let Some(t) = self.next().await {
            done.push(t);
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::HashingEmbeddingProvider;
    use async_trait::async_trait;
    use hearth_llm::{LlmError, LlmRequest, LlmResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers by prompt content; fails insight prompts about `fail_on`.
    struct Scripted {
        topics: &'static str,
        fail_on: Option<&'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn new(topics: &'static str, fail_on: Option<&'static str>) -> Self {
            Self {
                topics,
                fail_on,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, request: &LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
            if request.prompt.contains("3 most salient") {
                return Ok(LlmResponse::from_text(self.topics));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(bad) = self.fail_on {
                if request.prompt.contains(&format!("Question: {bad}")) {
                    return Err(LlmError::RequestFailed("model fell over".into()));
                }
            }
            Ok(LlmResponse::from_text("1. one insight\n2. another insight"))
        }
    }

    fn hashing() -> HashingEmbeddingProvider {
        HashingEmbeddingProvider::new(64).expect("provider")
    }

    fn store() -> Arc<Mutex<MemoryStore>> {
        let embedder = hashing();
        let mut store = MemoryStore::new(RetrievalConfig::default());
        for text in ["Villager 2 was not at the watchtower", "I heard howling from the woods"] {
            store.insert(text, 0.1, None, embedder.vector(text));
        }
        Arc::new(Mutex::new(store))
    }

    fn engine(service: Arc<Scripted>, workers: usize) -> ReflectionEngine {
        ReflectionEngine::new(
            Arc::new(PromptCatalog::builtin()),
            service,
            Arc::new(hashing()),
            50,
            workers,
        )
    }

    #[test]
    fn parse_list_strips_ordinals_and_blanks() {
        assert_eq!(
            parse_list("1. First\n2. Second\n\n3.Third"),
            vec!["First", "Second", "Third"]
        );
        assert_eq!(parse_list("  10.   Tenth  \n   \n"), vec!["Tenth"]);
        assert_eq!(parse_list("No ordinal here"), vec!["No ordinal here"]);
        assert_eq!(parse_list("3 wolves. Seen"), vec!["3 wolves. Seen"]);
        assert!(parse_list("").is_empty());
        assert!(parse_list("\n \n").is_empty());
    }

    #[test]
    fn bare_ordinals_are_not_items() {
        assert_eq!(parse_list("1.\n2. real insight"), vec!["real insight"]);
        assert_eq!(parse_list("1. \n 2.  \n3."), Vec::<String>::new());
    }

    #[tokio::test]
    async fn derives_topics_from_recent_memories() {
        let service = Arc::new(Scripted::new("1. Who left?\n2. What howled?\n3. Is it safe?", None));
        let topics = engine(service, 2).derive_topics(&store()).await.expect("topics");
        assert_eq!(topics, vec!["Who left?", "What howled?", "Is it safe?"]);
    }

    #[tokio::test]
    async fn empty_topic_answer_is_zero_topics() {
        let service = Arc::new(Scripted::new("   ", None));
        let topics = engine(service, 2).derive_topics(&store()).await.expect("topics");
        assert!(topics.is_empty());
    }

    #[tokio::test]
    async fn failing_topic_does_not_sink_siblings() {
        let service = Arc::new(Scripted::new("", Some("B")));
        let tasks = engine(service, 3).spawn_insights(
            vec!["A".into(), "B".into(), "C".into()],
            store(),
            None,
        );
        let done = tasks.collect().await;
        assert_eq!(done.len(), 3);
        for t in done {
            match t.topic.as_str() {
                "B" => assert!(t.outcome.is_err()),
                "A" | "C" => assert_eq!(
                    t.outcome.expect("insights"),
                    vec!["one insight", "another insight"]
                ),
                other => panic!("unexpected topic {other}"),
            }
        }
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_topics() {
        let service = Arc::new(Scripted::new("", None));
        let tasks = engine(Arc::clone(&service), 2).spawn_insights(
            (0..6).map(|i| format!("topic {i}")).collect(),
            store(),
            None,
        );
        assert_eq!(tasks.len(), 6);
        let done = tasks.collect().await;
        assert_eq!(done.len(), 6);
        assert!(service.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn no_topics_no_tasks() {
        let service = Arc::new(Scripted::new("", None));
        let mut tasks = engine(service, 2).spawn_insights(Vec::new(), store(), None);
        assert!(tasks.is_empty());
        assert!(tasks.next().await.is_none());
    }
}
