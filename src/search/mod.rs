//! Search providers and rank fusion
//!
//! Implements:
//! - BM25 keyword search over the FTS5 index
//! - Vector similarity search over stored embeddings
//! - Reciprocal Rank Fusion of the two ranked lists
//!
//! Providers and the repository only ever see an [`OwnerScope`], so every
//! query they issue carries an owner predicate. A type restriction is
//! applied inside the provider query, before the candidate limit, so items
//! of the wanted types are never crowded out by better-ranked items of
//! other types.

mod bm25;
mod fusion;
mod vector;

pub use bm25::*;
pub use fusion::*;
pub use vector::*;

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::types::{MemoryId, MemoryItem, MemoryType, OwnerScope, RankedHit};

/// Lexical search backend
#[async_trait]
pub trait KeywordSearchProvider: Send + Sync {
    /// Up to `limit` hits for `query`, best first, restricted to `types` when given
    async fn search(
        &self,
        owner: &OwnerScope,
        query: &str,
        types: Option<&[MemoryType]>,
        limit: usize,
    ) -> std::result::Result<Vec<RankedHit>, ProviderError>;
}

/// Vector similarity backend
#[async_trait]
pub trait SemanticSearchProvider: Send + Sync {
    /// Up to `limit` hits nearest to `embedding`, best first, restricted to `types` when given
    async fn search(
        &self,
        owner: &OwnerScope,
        embedding: &[f32],
        types: Option<&[MemoryType]>,
        limit: usize,
    ) -> std::result::Result<Vec<RankedHit>, ProviderError>;
}

/// Loads full items for fused ids
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Retrievable items of `owner` among `ids`; unknown ids are skipped
    async fn get_items(&self, owner: &OwnerScope, ids: &[MemoryId]) -> Result<Vec<MemoryItem>>;
}
