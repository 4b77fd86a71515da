//! Retrieval audit log
//!
//! One record per retrieval call. The raw query text is never written; only
//! its SHA-256 hash is.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queries::format_timestamp;
use super::Storage;
use crate::error::Result;

/// Audit record written for every retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub correlation_id: Uuid,
    pub owner_id: String,
    /// Hex SHA-256 of the query text
    pub query_hash: String,
    pub result_count: usize,
    pub truncated: bool,
    pub latency_keyword_ms: u64,
    pub latency_semantic_ms: u64,
    pub latency_total_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Persist an audit record
pub fn log_retrieval(conn: &Connection, record: &AuditRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO retrieval_audit
            (correlation_id, owner_id, query_hash, result_count, truncated,
             latency_keyword_ms, latency_semantic_ms, latency_total_ms, timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.correlation_id.to_string(),
            record.owner_id,
            record.query_hash,
            record.result_count as i64,
            record.truncated,
            record.latency_keyword_ms as i64,
            record.latency_semantic_ms as i64,
            record.latency_total_ms as i64,
            format_timestamp(record.timestamp),
        ],
    )?;
    Ok(())
}

/// Filter for querying the audit log
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub owner_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Query audit records, newest first
pub fn query_audit_log(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
    let mut sql = String::from(
        "SELECT correlation_id, owner_id, query_hash, result_count, truncated,
                latency_keyword_ms, latency_semantic_ms, latency_total_ms, timestamp
         FROM retrieval_audit WHERE 1=1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref owner_id) = filter.owner_id {
        sql.push_str(" AND owner_id = ?");
        params_vec.push(Box::new(owner_id.clone()));
    }

    if let Some(since) = filter.since {
        sql.push_str(" AND timestamp >= ?");
        params_vec.push(Box::new(format_timestamp(since)));
    }

    sql.push_str(" ORDER BY timestamp DESC");

    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params_vec.push(Box::new(limit));
    }

    let params_ref: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;

    let records = stmt
        .query_map(params_ref.as_slice(), |row| {
            let correlation_id: String = row.get("correlation_id")?;
            let timestamp: String = row.get("timestamp")?;
            Ok(AuditRecord {
                correlation_id: Uuid::parse_str(&correlation_id).unwrap_or_else(|_| Uuid::nil()),
                owner_id: row.get("owner_id")?,
                query_hash: row.get("query_hash")?,
                result_count: row.get::<_, i64>("result_count")? as usize,
                truncated: row.get("truncated")?,
                latency_keyword_ms: row.get::<_, i64>("latency_keyword_ms")? as u64,
                latency_semantic_ms: row.get::<_, i64>("latency_semantic_ms")? as u64,
                latency_total_ms: row.get::<_, i64>("latency_total_ms")? as u64,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

/// Destination for retrieval audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Emits audit records as structured events on the `memoria::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        tracing::info!(
            target: "memoria::audit",
            correlation_id = %record.correlation_id,
            owner_id = %record.owner_id,
            query_hash = %record.query_hash,
            result_count = record.result_count,
            truncated = record.truncated,
            latency_keyword_ms = record.latency_keyword_ms,
            latency_semantic_ms = record.latency_semantic_ms,
            latency_total_ms = record.latency_total_ms,
            timestamp = %record.timestamp,
            "retrieval"
        );
        Ok(())
    }
}

/// Writes audit records to the `retrieval_audit` table
#[derive(Clone)]
pub struct SqliteAuditSink {
    storage: Storage,
}

impl SqliteAuditSink {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let record = record.clone();
        self.storage
            .run_blocking(move |conn| log_retrieval(conn, &record))
            .await
    }
}

/// Forwards each record to several sinks; a failing sink does not stop the rest
#[derive(Clone, Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for CompositeAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.record(record))).await;
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }
}

/// Keeps records in memory; handy for tests and embedding hosts
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
