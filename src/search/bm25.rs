//! BM25 keyword search using SQLite FTS5
//!
//! All owners share one `memory_items_fts` index. Matching is owner-scoped,
//! but the `bm25()` statistics (document frequencies, average length) are
//! computed over every owner's rows, so one owner's corpus can shift the
//! relative order of another owner's hits. It never changes which items
//! are returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};

use super::{KeywordSearchProvider, MemoryRepository};
use crate::error::{ProviderError, Result};
use crate::storage::queries::{format_timestamp, get_items, type_predicate};
use crate::storage::Storage;
use crate::types::{MemoryId, MemoryItem, MemoryType, Modality, OwnerScope, RankedHit};

/// Upper bound on OR-ed terms in a single MATCH expression
const MAX_QUERY_TERMS: usize = 64;

/// Split free text into lowercase alphanumeric terms, deduplicated in order
pub fn query_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for term in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }
    terms
}

/// Quote a single FTS5 term so it is matched literally
pub fn escape_fts5_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('"');
    for c in term.chars() {
        if c == '"' {
            escaped.push_str("\"\"");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('"');
    escaped
}

/// Build an FTS5 MATCH expression that matches any of the query's terms.
///
/// Returns `None` when the query has no searchable terms.
pub fn build_match_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| escape_fts5_term(t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Rank `owner`'s retrievable items against `query` by BM25, optionally
/// restricted to `types`
pub fn bm25_search(
    conn: &Connection,
    owner: &OwnerScope,
    query: &str,
    types: Option<&[MemoryType]>,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<RankedHit>> {
    let Some(match_query) = build_match_query(query) else {
        return Ok(Vec::new());
    };

    let (type_clause, type_values) = type_predicate(types);
    // bm25() is negative; smaller is better. Ties fall back to id.
    let sql = format!(
        "SELECT m.id
         FROM memory_items_fts
         JOIN memory_items m ON memory_items_fts.rowid = m.id
         WHERE memory_items_fts MATCH ?
           AND m.owner_id = ?
           AND m.deleted_at IS NULL
           AND (m.expires_at IS NULL OR m.expires_at > ?){}
         ORDER BY bm25(memory_items_fts), m.id
         LIMIT ?",
        type_clause
    );

    let owner_id = owner.as_str();
    let now = format_timestamp(now);
    let limit = limit as i64;
    let mut params: Vec<&dyn ToSql> = vec![&match_query, &owner_id, &now];
    for value in &type_values {
        params.push(value);
    }
    params.push(&limit);

    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map(params.as_slice(), |row| row.get::<_, MemoryId>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(RankedHit::from_ordered(ids))
}

/// Keyword provider and item repository backed by the local SQLite store
#[derive(Clone)]
pub struct SqliteKeywordProvider {
    storage: Storage,
}

impl SqliteKeywordProvider {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl KeywordSearchProvider for SqliteKeywordProvider {
    async fn search(
        &self,
        owner: &OwnerScope,
        query: &str,
        types: Option<&[MemoryType]>,
        limit: usize,
    ) -> std::result::Result<Vec<RankedHit>, ProviderError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let owner = owner.clone();
        let query = query.to_string();
        let types = types.map(<[MemoryType]>::to_vec);
        self.storage
            .run_blocking(move |conn| {
                bm25_search(conn, &owner, &query, types.as_deref(), limit, Utc::now())
            })
            .await
            .map_err(|e| ProviderError::failure(Modality::Keyword, e.to_string()))
    }
}

/// Item hydration from the SQLite store
#[derive(Clone)]
pub struct SqliteMemoryRepository {
    storage: Storage,
}

impl SqliteMemoryRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn get_items(&self, owner: &OwnerScope, ids: &[MemoryId]) -> Result<Vec<MemoryItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let owner = owner.clone();
        let ids = ids.to_vec();
        self.storage
            .run_blocking(move |conn| get_items(conn, &owner, &ids, Utc::now()))
            .await
    }
}
