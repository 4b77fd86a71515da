//! Vector similarity search over stored embeddings
//!
//! Cosine similarity is computed in-process over the owner's embeddings.
//! Only items strictly above the similarity floor are returned.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;

use super::SemanticSearchProvider;
use crate::embedding::cosine_similarity;
use crate::error::ProviderError;
use crate::storage::queries::load_embeddings;
use crate::storage::Storage;
use crate::types::{MemoryId, MemoryType, Modality, OwnerScope, RankedHit};

/// Rank candidates by similarity to `query`, best first, ties by id
pub fn rank_by_similarity(
    query: &[f32],
    candidates: &[(MemoryId, Vec<f32>)],
    min_similarity: f32,
    limit: usize,
) -> Vec<RankedHit> {
    let mut scored: Vec<(MemoryId, f32)> = candidates
        .iter()
        .map(|(id, embedding)| (*id, cosine_similarity(query, embedding)))
        .filter(|(_, similarity)| *similarity > min_similarity)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(limit);

    RankedHit::from_ordered(scored.into_iter().map(|(id, _)| id))
}

/// Semantic provider backed by embeddings in the SQLite store
#[derive(Clone)]
pub struct SqliteSemanticProvider {
    storage: Storage,
    min_similarity: f32,
}

impl SqliteSemanticProvider {
    pub fn new(storage: Storage, min_similarity: f32) -> Self {
        Self {
            storage,
            min_similarity,
        }
    }
}

#[async_trait]
impl SemanticSearchProvider for SqliteSemanticProvider {
    async fn search(
        &self,
        owner: &OwnerScope,
        embedding: &[f32],
        types: Option<&[MemoryType]>,
        limit: usize,
    ) -> std::result::Result<Vec<RankedHit>, ProviderError> {
        if limit == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        let owner = owner.clone();
        let query = embedding.to_vec();
        let types = types.map(<[MemoryType]>::to_vec);
        let min_similarity = self.min_similarity;
        self.storage
            .run_blocking(move |conn| {
                let candidates = load_embeddings(conn, &owner, types.as_deref(), Utc::now())?;
                Ok(rank_by_similarity(&query, &candidates, min_similarity, limit))
            })
            .await
            .map_err(|e| ProviderError::failure(Modality::Semantic, e.to_string()))
    }
}
