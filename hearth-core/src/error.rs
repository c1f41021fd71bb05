//! Error types for the hearth core library.

use hearth_llm::LlmError;
use thiserror::Error;

/// Top-level error type for all hearth memory operations.
///
/// Only the fatal categories live here. Unparseable importance ratings,
/// empty reflection topics and failed per-topic insight generation degrade
/// to neutral defaults and are logged instead of returned.
#[derive(Error, Debug)]
pub enum HearthError {
    /// A prompt template was misused (unknown operation or unbound placeholder).
    #[error("Prompt template error: {0}")]
    Template(LlmError),

    /// The completion service failed where no fallback is defined.
    #[error("Completion failed: {0}")]
    Completion(LlmError),

    /// The agent's external memory log is missing, corrupt or unwritable.
    #[error("Memory log for agent '{agent_id}' failed: {reason}")]
    Persistence {
        /// Whose log failed.
        agent_id: String,
        /// What went wrong.
        reason: String,
    },

    /// A reflection worker died before reporting its topic.
    #[error("Reflection task failed: {0}")]
    Reflection(String),

    /// SQLite memory-log error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Embedding provider failure.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LlmError> for HearthError {
    fn from(err: LlmError) -> Self {
        if err.is_template_error() {
            Self::Template(err)
        } else {
            Self::Completion(err)
        }
    }
}

impl HearthError {
    /// Build a [`HearthError::Persistence`] for `agent_id`.
    pub fn persistence(agent_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Persistence {
            agent_id: agent_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, HearthError>;
