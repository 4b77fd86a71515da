//! Database queries for memory items
//!
//! Every read takes an [`OwnerScope`] and binds it into the SQL `WHERE`
//! clause. The write helpers here serve tests, the CLI and benches; the
//! retrieval engine itself only reads.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row, ToSql};

use crate::embedding::{decode_embedding, encode_embedding};
use crate::error::{MemoriaError, Result};
use crate::types::{MemoryId, MemoryItem, MemoryType, NewMemory, OwnerScope};

/// Column list shared by every item query
pub const ITEM_COLUMNS: &str = "m.id, m.owner_id, m.content, m.memory_type, m.importance, \
     m.created_at, m.expires_at, m.deleted_at";

/// Fixed-width RFC 3339 so that string comparison in SQL orders by time
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// `AND m.memory_type IN (...)` clause for an optional type restriction,
/// with the values to bind in placeholder order
pub fn type_predicate(types: Option<&[MemoryType]>) -> (String, Vec<&'static str>) {
    match types {
        Some(types) if !types.is_empty() => {
            let placeholders = vec!["?"; types.len()].join(", ");
            (
                format!(" AND m.memory_type IN ({})", placeholders),
                types.iter().map(|t| t.as_str()).collect(),
            )
        }
        _ => (String::new(), Vec::new()),
    }
}

/// Parse a memory item from a database row (embedding not loaded)
pub fn memory_from_row(row: &Row) -> rusqlite::Result<MemoryItem> {
    let memory_type_str: String = row.get("memory_type")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;

    Ok(MemoryItem {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        content: row.get("content")?,
        memory_type: memory_type_str.parse().unwrap_or(MemoryType::Note),
        embedding: None,
        importance: row.get("importance")?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        expires_at: expires_at.as_deref().and_then(parse_timestamp),
        deleted_at: deleted_at.as_deref().and_then(parse_timestamp),
    })
}

/// Store a new memory item
pub fn insert_memory(conn: &Connection, input: &NewMemory) -> Result<MemoryItem> {
    let owner = OwnerScope::new(input.owner_id.clone())?;
    if input.content.trim().is_empty() {
        return Err(MemoriaError::InvalidInput(
            "content must not be empty".to_string(),
        ));
    }
    let importance = input.importance.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&importance) {
        return Err(MemoriaError::InvalidInput(format!(
            "importance must be within [0, 1], got {}",
            importance
        )));
    }

    let created_at = input.created_at.unwrap_or_else(Utc::now);
    let embedding_bytes = input.embedding.as_deref().map(encode_embedding);
    let embedding_dims = input.embedding.as_ref().map(|e| e.len() as i64);

    conn.execute(
        "INSERT INTO memory_items
            (owner_id, content, memory_type, importance, embedding, embedding_dims, created_at, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            owner.as_str(),
            input.content,
            input.memory_type.as_str(),
            importance,
            embedding_bytes,
            embedding_dims,
            format_timestamp(created_at),
            input.expires_at.map(format_timestamp),
        ],
    )?;

    let id = conn.last_insert_rowid();
    tracing::debug!(id, owner = %owner, memory_type = %input.memory_type, "stored memory item");
    get_memory(conn, &owner, id)
}

/// Fetch one item owned by `owner`, including soft-deleted ones
pub fn get_memory(conn: &Connection, owner: &OwnerScope, id: MemoryId) -> Result<MemoryItem> {
    let sql = format!(
        "SELECT {} FROM memory_items m WHERE m.id = ? AND m.owner_id = ?",
        ITEM_COLUMNS
    );
    conn.query_row(&sql, params![id, owner.as_str()], memory_from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MemoriaError::NotFound(id),
            other => other.into(),
        })
}

/// Soft-delete an item; returns false if it was missing or already deleted
pub fn soft_delete_memory(conn: &Connection, owner: &OwnerScope, id: MemoryId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE memory_items SET deleted_at = ?
         WHERE id = ? AND owner_id = ? AND deleted_at IS NULL",
        params![format_timestamp(Utc::now()), id, owner.as_str()],
    )?;
    Ok(changed > 0)
}

/// Attach or replace an item's embedding
pub fn set_embedding(
    conn: &Connection,
    owner: &OwnerScope,
    id: MemoryId,
    embedding: &[f32],
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE memory_items SET embedding = ?, embedding_dims = ?
         WHERE id = ? AND owner_id = ?",
        params![
            encode_embedding(embedding),
            embedding.len() as i64,
            id,
            owner.as_str()
        ],
    )?;
    if changed == 0 {
        return Err(MemoriaError::NotFound(id));
    }
    Ok(())
}

/// Live items of `owner` that have no embedding yet
pub fn items_missing_embedding(
    conn: &Connection,
    owner: &OwnerScope,
    limit: usize,
) -> Result<Vec<MemoryItem>> {
    let sql = format!(
        "SELECT {} FROM memory_items m
         WHERE m.owner_id = ? AND m.embedding IS NULL AND m.deleted_at IS NULL
         ORDER BY m.id LIMIT ?",
        ITEM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![owner.as_str(), limit as i64], memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Retrievable items of `owner` with the given ids.
///
/// Ids that belong to another owner, are soft-deleted or have expired are
/// silently absent from the result.
pub fn get_items(
    conn: &Connection,
    owner: &OwnerScope,
    ids: &[MemoryId],
    now: DateTime<Utc>,
) -> Result<Vec<MemoryItem>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM memory_items m
         WHERE m.owner_id = ? AND m.deleted_at IS NULL
           AND (m.expires_at IS NULL OR m.expires_at > ?)
           AND m.id IN ({})",
        ITEM_COLUMNS, placeholders
    );

    let owner_id = owner.as_str();
    let now = format_timestamp(now);
    let mut params: Vec<&dyn ToSql> = vec![&owner_id, &now];
    // Ids are bound individually; never interpolated
    for id in ids {
        params.push(id);
    }

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Retrievable embeddings of `owner`, optionally restricted to `types`
pub fn load_embeddings(
    conn: &Connection,
    owner: &OwnerScope,
    types: Option<&[MemoryType]>,
    now: DateTime<Utc>,
) -> Result<Vec<(MemoryId, Vec<f32>)>> {
    let (type_clause, type_values) = type_predicate(types);
    let sql = format!(
        "SELECT m.id, m.embedding, m.embedding_dims FROM memory_items m
         WHERE m.owner_id = ? AND m.deleted_at IS NULL
           AND (m.expires_at IS NULL OR m.expires_at > ?)
           AND m.embedding IS NOT NULL{}",
        type_clause
    );

    let owner_id = owner.as_str();
    let now = format_timestamp(now);
    let mut params: Vec<&dyn ToSql> = vec![&owner_id, &now];
    for value in &type_values {
        params.push(value);
    }

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        let id: MemoryId = row.get(0)?;
        let bytes: Vec<u8> = row.get(1)?;
        let dims: Option<i64> = row.get(2)?;
        Ok((id, bytes, dims))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, bytes, dims) = row?;
        match decode_embedding(&bytes) {
            Some(v) if dims.map_or(true, |d| d as usize == v.len()) => out.push((id, v)),
            _ => tracing::warn!(id, "skipping memory item with malformed embedding"),
        }
    }
    Ok(out)
}

/// Soft-delete every expired item; returns how many were marked
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let now = format_timestamp(now);
    let changed = conn.execute(
        "UPDATE memory_items SET deleted_at = ?
         WHERE deleted_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?",
        params![now, now],
    )?;
    Ok(changed)
}

/// Number of live items for `owner`
pub fn count_items(conn: &Connection, owner: &OwnerScope) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM memory_items WHERE owner_id = ? AND deleted_at IS NULL",
        params![owner.as_str()],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::Duration;

    fn alice() -> OwnerScope {
        OwnerScope::new("alice").unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let item = insert_memory(
                    conn,
                    &NewMemory::new("alice", "prefers tea", MemoryType::Preference)
                        .with_importance(0.8),
                )?;
                assert_eq!(item.owner_id, "alice");
                assert_eq!(item.memory_type, MemoryType::Preference);
                assert!((item.importance - 0.8).abs() < f32::EPSILON);

                let fetched = get_memory(conn, &alice(), item.id)?;
                assert_eq!(fetched.content, "prefers tea");

                // Another owner cannot see it
                let bob = OwnerScope::new("bob").unwrap();
                assert!(matches!(
                    get_memory(conn, &bob, item.id),
                    Err(MemoriaError::NotFound(_))
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_insert_validation() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                assert!(insert_memory(conn, &NewMemory::new("", "x", MemoryType::Fact)).is_err());
                assert!(insert_memory(conn, &NewMemory::new("a", "  ", MemoryType::Fact)).is_err());
                assert!(insert_memory(
                    conn,
                    &NewMemory::new("a", "x", MemoryType::Fact).with_importance(1.5)
                )
                .is_err());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_get_items_is_owner_scoped() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = insert_memory(conn, &NewMemory::new("alice", "a1", MemoryType::Fact))?;
                let b = insert_memory(conn, &NewMemory::new("bob", "b1", MemoryType::Fact))?;

                let items = get_items(conn, &alice(), &[a.id, b.id], Utc::now())?;
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, a.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_deleted_and_expired_are_not_retrievable() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let now = Utc::now();
                let live = insert_memory(conn, &NewMemory::new("alice", "live", MemoryType::Note))?;
                let gone = insert_memory(conn, &NewMemory::new("alice", "gone", MemoryType::Note))?;
                let old = insert_memory(
                    conn,
                    &NewMemory::new("alice", "old", MemoryType::Note)
                        .with_expires_at(now - Duration::minutes(1)),
                )?;

                assert!(soft_delete_memory(conn, &alice(), gone.id)?);
                assert!(!soft_delete_memory(conn, &alice(), gone.id)?);

                let ids = [live.id, gone.id, old.id];
                let items = get_items(conn, &alice(), &ids, now)?;
                assert_eq!(items.iter().map(|m| m.id).collect::<Vec<_>>(), vec![live.id]);

                assert_eq!(purge_expired(conn, now)?, 1);
                assert_eq!(count_items(conn, &alice())?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_type_predicate() {
        assert_eq!(type_predicate(None), (String::new(), vec![]));
        assert_eq!(type_predicate(Some(&[])), (String::new(), vec![]));
        let (clause, values) = type_predicate(Some(&[MemoryType::Fact, MemoryType::Episode]));
        assert_eq!(clause, " AND m.memory_type IN (?, ?)");
        assert_eq!(values, vec!["fact", "episode"]);
    }

    #[test]
    fn test_embeddings_roundtrip_through_store() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let item = insert_memory(conn, &NewMemory::new("alice", "x", MemoryType::Fact))?;
                assert_eq!(items_missing_embedding(conn, &alice(), 10)?.len(), 1);

                set_embedding(conn, &alice(), item.id, &[0.5, -0.5])?;
                assert!(items_missing_embedding(conn, &alice(), 10)?.is_empty());

                let loaded = load_embeddings(conn, &alice(), None, Utc::now())?;
                assert_eq!(loaded, vec![(item.id, vec![0.5, -0.5])]);

                let facts = load_embeddings(conn, &alice(), Some(&[MemoryType::Fact]), Utc::now())?;
                assert_eq!(facts.len(), 1);
                let notes = load_embeddings(conn, &alice(), Some(&[MemoryType::Note]), Utc::now())?;
                assert!(notes.is_empty());

                let bob = OwnerScope::new("bob").unwrap();
                assert!(load_embeddings(conn, &bob, None, Utc::now())?.is_empty());
                assert!(set_embedding(conn, &bob, item.id, &[1.0]).is_err());
                Ok(())
            })
            .unwrap();
    }
}
