//! Embedding cache glue over the shared [`CacheLayer`]
//!
//! Entries are keyed by model and SHA-256 of the input text, so a vector is
//! written once per distinct text and overwriting it is harmless. Vectors are
//! stored as little-endian f32 bytes, the same layout the SQLite store uses.
//! A cache that errors is treated as a miss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{content_hash, Embedder};
use crate::cache::CacheLayer;
use crate::error::Result;

/// Serialize a vector as little-endian f32 bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian f32 bytes; `None` if the length is not a multiple of 4
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// An [`Embedder`] that consults the cache before calling the backend
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<dyn CacheLayer>,
    ttl: Duration,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<dyn CacheLayer>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Cache key for `text` under this embedder's model
    pub fn cache_key(&self, text: &str) -> String {
        format!("emb:{}:{}", self.inner.model_name(), content_hash(text))
    }

    /// Look up a cached vector, ignoring cache faults and stale dimensions
    pub async fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.cache_key(text);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match decode_embedding(&bytes) {
                Some(v) if v.len() == self.inner.dimensions() => Some(v),
                _ => {
                    tracing::debug!(key = %key, "discarding malformed cached embedding");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "embedding cache read failed");
                None
            }
        }
    }

    async fn store(&self, text: &str, embedding: &[f32]) {
        let key = self.cache_key(text);
        if let Err(e) = self
            .cache
            .set(&key, encode_embedding(embedding), self.ttl)
            .await
        {
            tracing::warn!(error = %e, "embedding cache write failed");
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.lookup(text).await {
            tracing::trace!("embedding cache hit");
            return Ok(cached);
        }

        let embedding = self.inner.embed(text).await?;
        self.store(text, &embedding).await;
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
