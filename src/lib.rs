//! Memoria - memory retrieval for personal assistants
//!
//! Given a user's question, returns the small set of stored memory items
//! most worth putting in front of the language model. Keyword (BM25) and
//! semantic (embedding) rankings are merged with Reciprocal Rank Fusion,
//! filtered, and cut to a token budget. Every call is scoped to a single
//! owner and degrades to an empty response rather than failing.
//!
//! ```no_run
//! use memoria::{MemoryRetriever, RetrievalConfig, RetrievalRequest, Storage};
//!
//! # async fn run() -> memoria::Result<()> {
//! let storage = Storage::open_in_memory()?;
//! let retriever = MemoryRetriever::sqlite(storage, RetrievalConfig::default()).build()?;
//! let response = retriever
//!     .retrieve(RetrievalRequest::new("alice", "which tool should I use?"))
//!     .await?;
//! for item in &response.items {
//!     println!("{:.3} {}", item.relevance, item.item.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod search;
pub mod storage;
pub mod types;

pub use budget::{Budgeted, TokenEncoding, Tokenizer};
pub use cache::{CacheLayer, InMemoryCache, RateLimiter};
pub use config::{EmbeddingConfig, RetrievalConfig};
pub use embedding::{create_embedder, Embedder, TfIdfEmbedder};
pub use error::{MemoriaError, ProviderError, Result, ValidationError};
pub use retrieval::{MemoryRetriever, MemoryRetrieverBuilder};
pub use search::{KeywordSearchProvider, MemoryRepository, SemanticSearchProvider, RRF_K};
pub use storage::{AuditRecord, AuditSink, Storage};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
