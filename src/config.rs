//! Retrieval engine configuration
//!
//! All tunables live in [`RetrievalConfig`], which is passed to
//! [`MemoryRetriever`](crate::retrieval::MemoryRetriever) at construction.
//! Nothing on the retrieval path reads the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MemoriaError, Result};

/// Tunables for the retrieval orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Token budget for the combined content of returned items
    pub token_budget: usize,
    /// Result limit when the request does not set one
    pub default_limit: usize,
    /// Upper bound accepted for `result_limit`
    pub max_limit: usize,
    /// Relevance floor when the request does not set one
    pub default_min_relevance: f64,
    /// Longer queries are truncated to this many characters
    pub max_query_chars: usize,
    /// Requests allowed per owner per window
    pub rate_limit_per_window: u64,
    /// Rate-limit window length
    pub rate_limit_window_secs: u64,
    /// Deadline for embedding and search. Hydration must finish within
    /// `grace_ms` after it and the audit write gets at most `grace_ms` more,
    /// so the worst-case latency of a call is `deadline_ms + 2 * grace_ms`.
    pub deadline_ms: u64,
    /// Extra time allowed after `deadline_ms` for hydration, and again for the audit write
    pub grace_ms: u64,
    /// Deadline for the embedding client (capped by the overall deadline)
    pub embedding_timeout_ms: u64,
    /// TTL for cached query embeddings
    pub embedding_cache_ttl_secs: u64,
    /// Each provider is asked for `result_limit * candidate_multiplier` hits
    pub candidate_multiplier: usize,
    /// Cosine similarity floor for the semantic provider
    pub semantic_min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            token_budget: 1000,
            default_limit: 10,
            max_limit: 50,
            default_min_relevance: 0.3,
            max_query_chars: 8192,
            rate_limit_per_window: 10,
            rate_limit_window_secs: 60,
            deadline_ms: 200,
            grace_ms: 50,
            embedding_timeout_ms: 150,
            embedding_cache_ttl_secs: 24 * 60 * 60,
            candidate_multiplier: 3,
            semantic_min_similarity: 0.0,
        }
    }
}

impl RetrievalConfig {
    /// Reject configurations the orchestrator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(MemoriaError::Config(format!(
                "default_limit must be within 1..={}, got {}",
                self.max_limit, self.default_limit
            )));
        }
        if !(0.0..=1.0).contains(&self.default_min_relevance) {
            return Err(MemoriaError::Config(format!(
                "default_min_relevance must be within [0, 1], got {}",
                self.default_min_relevance
            )));
        }
        if self.max_query_chars == 0 {
            return Err(MemoriaError::Config(
                "max_query_chars must be positive".to_string(),
            ));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(MemoriaError::Config(
                "rate_limit_window_secs must be positive".to_string(),
            ));
        }
        if self.deadline_ms == 0 {
            return Err(MemoriaError::Config("deadline_ms must be positive".to_string()));
        }
        if self.candidate_multiplier == 0 {
            return Err(MemoriaError::Config(
                "candidate_multiplier must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Longest a single retrieval call can take
    pub fn worst_case_latency(&self) -> Duration {
        self.deadline() + self.grace() * 2
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn embedding_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_cache_ttl_secs)
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "tfidf" or "openai"
    pub model: String,
    /// API key for remote backends
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL for OpenAI-compatible APIs
    pub base_url: Option<String>,
    /// Remote model name (e.g. "text-embedding-3-small")
    pub embedding_model: Option<String>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "tfidf".to_string(),
            api_key: None,
            base_url: None,
            embedding_model: None,
            dimensions: 384,
        }
    }
}
