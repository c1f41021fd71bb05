//! Importance scoring — one small-model completion per memory.
//!
//! The model is asked to rate poignancy on a 1–10 scale. The first run of
//! digits in its answer is the rating, clamped to `[0, 10]` and scaled by
//! `importance_weight`. An answer without digits, or a failed completion,
//! scores 0.0 and never blocks insertion.

use std::sync::Arc;

use hearth_llm::{CompletionService, PromptCatalog, PromptOp};
use tracing::{debug, warn};

use crate::error::Result;

/// Highest rating the prompt asks for.
pub const MAX_RATING: u64 = 10;

/// Outcome of scoring one memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredImportance {
    /// Salience in `[0, importance_weight]`.
    pub score: f64,
    /// Parsed rating, `None` when the answer held no digits or the call failed.
    pub rating: Option<u64>,
}

/// Extract the rating from a model answer.
///
/// Leading non-digits are skipped and the first digit run is taken. Runs
/// too long to parse count as the maximum.
#[must_use]
pub fn parse_rating(response: &str) -> Option<u64> {
    let rest = response.trim_start_matches(|c: char| !c.is_ascii_digit());
    let digits: &str = &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];
    if digits.is_empty() {
        return None;
    }
    Some(digits.parse::<u64>().map_or(MAX_RATING, |n| n.min(MAX_RATING)))
}

/// Scale a 0–10 rating into `[0, importance_weight]`.
#[must_use]
pub fn scale_rating(rating: u64, importance_weight: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let r = rating as f64;
    (r / 10.0) * importance_weight
}

/// Rates memory text through the completion service.
#[derive(Clone)]
pub struct ImportanceScorer {
    catalog: Arc<PromptCatalog>,
    service: Arc<dyn CompletionService>,
    importance_weight: f64,
}

impl ImportanceScorer {
    /// Create a scorer.
    #[must_use]
    pub fn new(
        catalog: Arc<PromptCatalog>,
        service: Arc<dyn CompletionService>,
        importance_weight: f64,
    ) -> Self {
        Self {
            catalog,
            service,
            importance_weight,
        }
    }

    /// Scale applied to ratings.
    #[must_use]
    pub fn importance_weight(&self) -> f64 {
        self.importance_weight
    }

    /// Score `memory_text`.
    ///
    /// # Errors
    /// Only template misuse is returned (`HearthError::Template`); a failed
    /// completion or unparseable answer scores 0.0.
    pub async fn score(&self, memory_text: &str) -> Result<ScoredImportance> {
        let request = self
            .catalog
            .request(PromptOp::ScoreMemoryImportance, &[("memory_content", memory_text)])?;

        let answer = match self.service.complete(&request).await {
            Ok(resp) => resp.text,
            Err(e) => {
                warn!(error = %e, "importance completion failed, scoring 0.0");
                return Ok(ScoredImportance {
                    score: 0.0,
                    rating: None,
                });
            }
        };

        let Some(rating) = parse_rating(answer.trim()) else {
            warn!(answer = %answer.trim(), "importance answer held no rating, scoring 0.0");
            return Ok(ScoredImportance {
                score: 0.0,
                rating: None,
            });
        };

        let score = scale_rating(rating, self.importance_weight);
        debug!(rating, score, "scored memory importance");
        Ok(ScoredImportance {
            score,
            rating: Some(rating),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_llm::{LlmError, LlmRequest, LlmResponse};

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl CompletionService for Fixed {
        async fn complete(&self, _request: &LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
            self.0
                .map(LlmResponse::from_text)
                .map_err(|()| LlmError::Unavailable("model offline".into()))
        }
    }

    fn scorer(answer: std::result::Result<&'static str, ()>) -> ImportanceScorer {
        ImportanceScorer::new(Arc::new(PromptCatalog::builtin()), Arc::new(Fixed(answer)), 0.15)
    }

    #[test]
    fn parses_first_digit_run() {
        assert_eq!(parse_rating("Rating: 7"), Some(7));
        assert_eq!(parse_rating("8"), Some(8));
        assert_eq!(parse_rating("3 out of 10"), Some(3));
        assert_eq!(parse_rating("I cannot rate this"), None);
        assert_eq!(parse_rating(""), None);
    }

    #[test]
    fn out_of_range_ratings_clamp() {
        assert_eq!(parse_rating("100"), Some(10));
        assert_eq!(parse_rating("99999999999999999999999"), Some(10));
        assert_eq!(parse_rating("0"), Some(0));
    }

    #[test]
    fn scaling_uses_weight() {
        assert!((scale_rating(7, 0.15) - 0.105).abs() < 1e-12);
        assert!((scale_rating(10, 0.15) - 0.15).abs() < 1e-12);
    }

    #[tokio::test]
    async fn scores_rated_answer() {
        let scored = scorer(Ok("Rating: 8")).score("found wolf tracks").await.expect("score");
        assert_eq!(scored.rating, Some(8));
        assert!((scored.score - 0.12).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unrated_answer_scores_zero() {
        let scored = scorer(Ok("I cannot rate this")).score("x").await.expect("score");
        assert_eq!(scored, ScoredImportance { score: 0.0, rating: None });
    }

    #[tokio::test]
    async fn failed_completion_scores_zero() {
        let scored = scorer(Err(())).score("x").await.expect("score");
        assert_eq!(scored.score, 0.0);
        assert!(scored.rating.is_none());
    }
}
