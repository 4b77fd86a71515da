//! Database migrations for Memoria

use rusqlite::{params, Connection};

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Memory items and their full-text index (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memory_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL CHECK (length(owner_id) > 0),
            content TEXT NOT NULL CHECK (length(content) > 0),
            memory_type TEXT NOT NULL DEFAULT 'note'
                CHECK (memory_type IN ('fact', 'preference', 'decision', 'note', 'episode')),
            importance REAL NOT NULL DEFAULT 0.5
                CHECK (importance >= 0.0 AND importance <= 1.0),
            embedding BLOB,
            embedding_dims INTEGER,
            created_at TEXT NOT NULL,
            expires_at TEXT,
            deleted_at TEXT
        );

        -- Ownership never changes after creation
        CREATE TRIGGER IF NOT EXISTS memory_items_owner_immutable
        BEFORE UPDATE OF owner_id ON memory_items
        WHEN NEW.owner_id <> OLD.owner_id
        BEGIN
            SELECT RAISE(ABORT, 'owner_id is immutable');
        END;

        CREATE VIRTUAL TABLE IF NOT EXISTS memory_items_fts USING fts5(
            content,
            content='memory_items',
            content_rowid='id',
            tokenize='porter unicode61'
        );

        -- Triggers to keep FTS in sync
        CREATE TRIGGER IF NOT EXISTS memory_items_ai AFTER INSERT ON memory_items BEGIN
            INSERT INTO memory_items_fts(rowid, content) VALUES (NEW.id, NEW.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memory_items_ad AFTER DELETE ON memory_items BEGIN
            INSERT INTO memory_items_fts(memory_items_fts, rowid, content)
            VALUES ('delete', OLD.id, OLD.content);
        END;

        CREATE TRIGGER IF NOT EXISTS memory_items_au AFTER UPDATE OF content ON memory_items BEGIN
            INSERT INTO memory_items_fts(memory_items_fts, rowid, content)
            VALUES ('delete', OLD.id, OLD.content);
            INSERT INTO memory_items_fts(rowid, content) VALUES (NEW.id, NEW.content);
        END;

        -- Every retrieval query filters on owner first
        CREATE INDEX IF NOT EXISTS idx_memory_items_owner
            ON memory_items(owner_id, deleted_at, expires_at);
        CREATE INDEX IF NOT EXISTS idx_memory_items_owner_type
            ON memory_items(owner_id, memory_type);
        "#,
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (?)", params![1])?;

    Ok(())
}

/// Retrieval audit log (v2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS retrieval_audit (
            correlation_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            query_hash TEXT NOT NULL,
            result_count INTEGER NOT NULL,
            truncated INTEGER NOT NULL,
            latency_keyword_ms INTEGER NOT NULL,
            latency_semantic_ms INTEGER NOT NULL,
            latency_total_ms INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_retrieval_audit_owner
            ON retrieval_audit(owner_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_retrieval_audit_timestamp
            ON retrieval_audit(timestamp DESC);
        "#,
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (?)", params![2])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_owner_is_immutable() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO memory_items (owner_id, content, memory_type, created_at)
             VALUES ('alice', 'likes tea', 'preference', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let result = conn.execute("UPDATE memory_items SET owner_id = 'bob' WHERE id = 1", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO memory_items (owner_id, content, memory_type, created_at)
             VALUES ('alice', 'x', 'todo', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
