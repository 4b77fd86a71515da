//! Core types for Memoria

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Unique identifier for a memory item
pub type MemoryId = i64;

/// An atomic, typed unit of durable knowledge about one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier
    pub id: MemoryId,
    /// The user this item belongs to (immutable after creation)
    pub owner_id: String,
    /// Human-readable content, never empty
    pub content: String,
    /// Item classification
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Embedding vector, loaded only by the semantic search path
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    /// Importance score (0.0 - 1.0), used only as a tie-breaker
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item stops being eligible for retrieval
    pub expires_at: Option<DateTime<Utc>>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Whether the item may appear in a retrieval result at `now`
    pub fn is_retrievable(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

fn default_importance() -> f32 {
    0.5
}

/// Memory type classification
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Preference,
    Decision,
    #[default]
    Note,
    /// Something that happened at a point in time
    Episode,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Decision => "decision",
            MemoryType::Note => "note",
            MemoryType::Episode => "episode",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::Fact,
            MemoryType::Preference,
            MemoryType::Decision,
            MemoryType::Note,
            MemoryType::Episode,
        ]
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "decision" => Ok(MemoryType::Decision),
            "note" => Ok(MemoryType::Note),
            "episode" => Ok(MemoryType::Episode),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// Owner partition every storage query is restricted to.
///
/// Providers and repositories take an `OwnerScope` instead of a bare string,
/// so a query without an owner predicate cannot be expressed. The only
/// constructor rejects empty owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerScope(String);

impl OwnerScope {
    pub fn new(owner_id: impl Into<String>) -> Result<Self, ValidationError> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(ValidationError::EmptyOwner);
        }
        Ok(Self(owner_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `item` belongs to this scope
    pub fn owns(&self, item: &MemoryItem) -> bool {
        item.owner_id == self.0
    }
}

impl std::fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two independent ranking signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Keyword,
    Semantic,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Keyword => "keyword",
            Modality::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a provider's ranked list. Rank 1 is the best match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedHit {
    pub id: MemoryId,
    pub rank: usize,
}

impl RankedHit {
    /// Build hits from ids already in rank order
    pub fn from_ordered(ids: impl IntoIterator<Item = MemoryId>) -> Vec<RankedHit> {
        ids.into_iter()
            .enumerate()
            .map(|(idx, id)| RankedHit { id, rank: idx + 1 })
            .collect()
    }
}

/// An item's position in each ranked list; absence in one list is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: MemoryId,
    pub keyword_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// A hydrated item with its reciprocal-rank-fusion score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub item: MemoryItem,
    pub fused_score: f64,
    pub keyword_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// A memory item as returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub item: MemoryItem,
    /// Raw RRF score
    pub score: f64,
    /// RRF score normalised to [0, 1] against the best achievable score
    pub relevance: f64,
    pub keyword_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// A retrieval request from the agent/tool layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub owner_id: String,
    pub query_text: String,
    /// Defaults to `RetrievalConfig::default_limit`
    pub result_limit: Option<usize>,
    /// Restrict results to these types
    #[serde(alias = "types")]
    pub type_filter: Option<Vec<MemoryType>>,
    /// Defaults to `RetrievalConfig::default_min_relevance`
    pub min_relevance: Option<f64>,
}

impl RetrievalRequest {
    pub fn new(owner_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            query_text: query_text.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.result_limit = Some(limit);
        self
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MemoryType>) -> Self {
        self.type_filter = Some(types.into_iter().collect());
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = Some(min_relevance);
        self
    }
}

/// Latency breakdown in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalTimings {
    pub embedding_ms: u64,
    pub keyword_ms: u64,
    /// Zero when semantic search did not run
    pub semantic_ms: u64,
    pub total_ms: u64,
}

/// A non-fatal condition encountered while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Over the per-owner request cap; no search was run
    RateLimited,
    /// No query embedding; served keyword-only
    EmbeddingUnavailable { reason: String },
    /// One backend missed the deadline
    ProviderTimeout { modality: Modality },
    /// One backend returned a hard error
    ProviderFailure { modality: Modality, message: String },
    /// Nothing usable came back from any backend
    TotalFailure,
}

/// Result of a retrieval call
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub correlation_id: Uuid,
    pub items: Vec<ScoredMemory>,
    /// True if the token budget cut the list short
    pub truncated: bool,
    /// Number of items after filtering and limiting, before budget enforcement
    pub total_before_truncation: usize,
    pub timings: RetrievalTimings,
    pub rate_limited: bool,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl RetrievalResponse {
    pub fn empty(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            items: Vec::new(),
            truncated: false,
            total_before_truncation: 0,
            timings: RetrievalTimings::default(),
            rate_limited: false,
            error: false,
            degradations: Vec::new(),
        }
    }

    pub fn rate_limited(correlation_id: Uuid) -> Self {
        Self {
            rate_limited: true,
            degradations: vec![Degradation::RateLimited],
            ..Self::empty(correlation_id)
        }
    }

    /// Whether the response was served with less than full capability
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Input for storing a memory item (write path, outside the retrieval engine)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub owner_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub memory_type: MemoryType,
    pub importance: Option<f32>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Defaults to now
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(
        owner_id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            content: content.into(),
            memory_type,
            importance: None,
            embedding: None,
            created_at: None,
            expires_at: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file, or ":memory:"
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Storage mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// WAL journal, best for a local disk
    #[default]
    Local,
    /// DELETE journal, safe for directories synced by Dropbox/iCloud
    CloudSafe,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item() -> MemoryItem {
        MemoryItem {
            id: 1,
            owner_id: "alice".to_string(),
            content: "likes tea".to_string(),
            memory_type: MemoryType::Preference,
            embedding: None,
            importance: 0.5,
            created_at: Utc::now(),
            expires_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_memory_type_roundtrip() {
        for t in MemoryType::all() {
            let parsed: MemoryType = t.as_str().parse().unwrap();
            assert_eq!(*t, parsed);
        }
        assert!("todo".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_owner_scope_rejects_empty() {
        assert_eq!(OwnerScope::new(""), Err(ValidationError::EmptyOwner));
        assert_eq!(OwnerScope::new("   "), Err(ValidationError::EmptyOwner));
        let scope = OwnerScope::new("alice").unwrap();
        assert!(scope.owns(&item()));
    }

    #[test]
    fn test_retrievable_excludes_deleted_and_expired() {
        let now = Utc::now();
        let mut m = item();
        assert!(m.is_retrievable(now));

        m.expires_at = Some(now - Duration::seconds(1));
        assert!(!m.is_retrievable(now));

        m.expires_at = Some(now + Duration::hours(1));
        m.deleted_at = Some(now);
        assert!(!m.is_retrievable(now));
    }

    #[test]
    fn test_ranked_hits_from_ordered() {
        let hits = RankedHit::from_ordered([7, 3, 9]);
        assert_eq!(hits[0], RankedHit { id: 7, rank: 1 });
        assert_eq!(hits[2], RankedHit { id: 9, rank: 3 });
    }

    #[test]
    fn test_embedding_not_serialized() {
        let mut m = item();
        m.embedding = Some(vec![0.1, 0.2]);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["type"], "preference");
    }
}
