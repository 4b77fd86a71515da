//! Error types for Memoria

use thiserror::Error;

use crate::types::Modality;

/// Result type alias for Memoria operations
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Main error type for Memoria
#[derive(Error, Debug)]
pub enum MemoriaError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "openai"))]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoriaError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoriaError::Http(_)
                | MemoriaError::Cache(_)
                | MemoriaError::Provider(ProviderError::Timeout { .. })
        )
    }

    /// Stable numeric code, used by the CLI's JSON error output
    pub fn code(&self) -> i64 {
        match self {
            MemoriaError::NotFound(_) => -32001,
            MemoriaError::InvalidInput(_) | MemoriaError::Validation(_) => -32602,
            MemoriaError::Provider(_) => -32010,
            MemoriaError::Config(_) => -32011,
            _ => -32000,
        }
    }
}

/// A malformed retrieval request.
///
/// This is the only failure that `MemoryRetriever::retrieve` reports as an
/// `Err`; every other condition is encoded in the response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner_id must not be empty")]
    EmptyOwner,

    #[error("query_text must not be empty")]
    EmptyQuery,

    #[error("result_limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { got: usize, max: usize },

    #[error("min_relevance must be within [0.0, 1.0], got {0}")]
    RelevanceOutOfRange(String),

    #[error("type_filter must name at least one memory type")]
    EmptyTypeFilter,
}

/// Failure of one search backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{modality} search timed out after {elapsed_ms}ms")]
    Timeout { modality: Modality, elapsed_ms: u64 },

    #[error("{modality} search failed: {message}")]
    Failure { modality: Modality, message: String },
}

impl ProviderError {
    pub fn failure(modality: Modality, message: impl Into<String>) -> Self {
        ProviderError::Failure {
            modality,
            message: message.into(),
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            ProviderError::Timeout { modality, .. } | ProviderError::Failure { modality, .. } => {
                *modality
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_code() {
        let err: MemoriaError = ValidationError::EmptyOwner.into();
        assert_eq!(err.code(), -32602);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_provider_timeout_is_retryable() {
        let err: MemoriaError = ProviderError::Timeout {
            modality: Modality::Keyword,
            elapsed_ms: 200,
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "keyword search timed out after 200ms");
    }
}
