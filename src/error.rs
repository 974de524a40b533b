//! Error type shared by every retrieval stage.

use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Unsupported model/dimension pair, missing credentials or bad identifiers.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding provider could not be reached or returned garbage.
    #[error("embedding provider {provider} failed: {message}")]
    EmbeddingProvider {
        /// Provider name.
        provider: String,
        /// Failure detail.
        message: String,
    },

    /// The provider response cannot be paired positionally with the request.
    #[error("embedding response out of order: {0}")]
    EmbeddingOrder(String),

    /// A returned vector is not as wide as the requested dimension.
    #[error("embedding for {text:?} has {actual} values, expected {expected}")]
    EmbeddingDimension {
        /// Input the vector belongs to.
        text: String,
        /// Requested width.
        expected: usize,
        /// Returned width.
        actual: usize,
    },

    /// Database access failed.
    #[error("store error: {0}")]
    Store(String),

    /// The LLM judge failed. The relevance filter absorbs this.
    #[error("relevance judge failed: {0}")]
    Judge(String),

    /// Direct course lookup found nothing.
    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    /// The caller went away before the request finished.
    #[error("request cancelled")]
    Cancelled,
}

impl RetrievalError {
    /// Builds an embedding-provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole request rather than one skill.
    pub fn is_request_fatal(&self) -> bool {
        !matches!(self, Self::Judge(_) | Self::CourseNotFound(_))
    }
}

impl From<tokio_postgres::Error> for RetrievalError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;
