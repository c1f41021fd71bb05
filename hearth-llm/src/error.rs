//! LLM error types.

use thiserror::Error;

/// Errors that can occur during prompt rendering and LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No prompt template is registered under this operation name.
    #[error("unknown prompt operation: '{0}'")]
    UnknownOperation(String),

    /// A template references a placeholder that was not bound.
    #[error("prompt '{operation}' is missing variable '{variable}'")]
    MissingVariable {
        /// Operation whose template was being rendered.
        operation: String,
        /// The unbound placeholder name.
        variable: String,
    },

    /// HTTP request failed.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// LLM response body could not be decoded.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// LLM provider is unavailable.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All LLM retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error text of the final attempt.
        last_error: String,
    },

    /// Configuration error (bad template file, unsupported tier, ...).
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether this error is a template-contract violation rather than a
    /// transport failure.
    #[must_use]
    pub fn is_template_error(&self) -> bool {
        matches!(self, Self::UnknownOperation(_) | Self::MissingVariable { .. })
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LlmError>;
