//! `SQLite` memory index.
//!
//! Candidate rows are narrowed in SQL (tenant, expiry, quality and filter
//! columns) and ranked by cosine similarity in process.

// SQLite stores REAL as f64 and INTEGER as i64; quality and counts fit.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::embedding::cosine_similarity;
use crate::models::{
    AgentId, MemoryFilter, MemoryHit, MemoryId, MemoryKind, MemoryRecord, Sensitivity, TenantId,
    TraceId,
};
use crate::storage::sqlite::{
    acquire_lock, decode_embedding, encode_embedding, open_connection, open_in_memory,
    parse_enum_column, timed, ts_from_sql, ts_to_sql,
};
use crate::storage::traits::{MemoryIndexBackend, MemoryQuery};
use crate::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

use super::rank_hits;

const BACKEND: &str = "sqlite_index";

const MEMORY_COLUMNS: &str = "id, tenant_id, agent_id, trace_id, kind, content, embedding,
    quality, sensitivity, created_at, expires_at";

/// `SQLite`-based memory index.
///
/// # Schema
///
/// - `memories`: one row per record. `sensitivity_rank` mirrors
///   `sensitivity` as an integer so clearance filters compare numerically.
pub struct SqliteMemoryIndex {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteMemoryIndex {
    /// Opens (or creates) a memory database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path, "open_index_sqlite")?;
        let index = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        index.initialize()?;
        Ok(index)
    }

    /// Creates an in-memory index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory("open_index_sqlite_memory")?;
        let index = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        index.initialize()?;
        Ok(index)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                trace_id TEXT,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                quality REAL NOT NULL,
                sensitivity TEXT NOT NULL,
                sensitivity_rank INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_memories_tenant_created
                ON memories(tenant_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_expires
                ON memories(expires_at) WHERE expires_at IS NOT NULL;",
        )
        .map_err(|e| Error::operation("create_memories_table", e))
    }

    fn parse_memory_row(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
        let id: String = row.get("id")?;
        let tenant: String = row.get("tenant_id")?;
        let agent: String = row.get("agent_id")?;
        let trace_id: Option<String> = row.get("trace_id")?;
        let kind: String = row.get("kind")?;
        let embedding: Vec<u8> = row.get("embedding")?;
        let quality: f64 = row.get("quality")?;
        let sensitivity: String = row.get("sensitivity")?;
        let created_at: i64 = row.get("created_at")?;
        let expires_at: Option<i64> = row.get("expires_at")?;

        Ok(MemoryRecord {
            id: MemoryId::new(id),
            tenant: TenantId::new(tenant),
            agent: AgentId::new(agent),
            trace_id: trace_id.map(TraceId::new),
            kind: parse_enum_column(4, &kind, MemoryKind::parse)?,
            content: row.get("content")?,
            embedding: decode_embedding(&embedding),
            quality: quality as f32,
            sensitivity: parse_enum_column(8, &sensitivity, Sensitivity::parse)?,
            created_at: ts_from_sql(created_at),
            expires_at: expires_at.map(ts_from_sql),
        })
    }

    /// Builds the narrowing WHERE clause. Parameters `?1..?3` are reserved for
    /// tenant, `now` and minimum quality.
    fn build_filter_clause(filter: &MemoryFilter) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        let mut param_idx = 4;

        if !filter.kinds.is_empty() {
            let placeholders: Vec<String> = filter
                .kinds
                .iter()
                .map(|kind| {
                    values.push(Value::Text(kind.as_str().to_string()));
                    let p = format!("?{param_idx}");
                    param_idx += 1;
                    p
                })
                .collect();
            conditions.push(format!("kind IN ({})", placeholders.join(",")));
        }

        if let Some(agent) = &filter.agent {
            conditions.push(format!("agent_id = ?{param_idx}"));
            values.push(Value::Text(agent.as_str().to_string()));
            param_idx += 1;
        }

        if let Some(trace) = &filter.trace_id {
            conditions.push(format!("trace_id = ?{param_idx}"));
            values.push(Value::Text(trace.as_str().to_string()));
            param_idx += 1;
        }

        if let Some(max) = filter.max_sensitivity {
            conditions.push(format!("sensitivity_rank <= ?{param_idx}"));
            values.push(Value::Integer(i64::from(max.rank())));
        }

        let clause = conditions
            .iter()
            .map(|c| format!(" AND {c}"))
            .collect::<String>();
        (clause, values)
    }
}

impl MemoryIndexBackend for SqliteMemoryIndex {
    #[instrument(skip(self, record), fields(tenant = %record.tenant, memory_id = %record.id))]
    fn store(&self, record: &MemoryRecord) -> Result<()> {
        timed(BACKEND, "store", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO memories (
                    id, tenant_id, agent_id, trace_id, kind, content, embedding,
                    quality, sensitivity, sensitivity_rank, created_at, expires_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.as_str(),
                    record.tenant.as_str(),
                    record.agent.as_str(),
                    record.trace_id.as_ref().map(TraceId::as_str),
                    record.kind.as_str(),
                    record.content,
                    encode_embedding(&record.embedding),
                    f64::from(record.quality),
                    record.sensitivity.as_str(),
                    i64::from(record.sensitivity.rank()),
                    ts_to_sql(record.created_at),
                    record.expires_at.map(ts_to_sql),
                ],
            )
            .map_err(|e| Error::operation("store_memory", e))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, memory_id = %id))]
    fn get(&self, tenant: &TenantId, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        timed(BACKEND, "get", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE tenant_id = ?1 AND id = ?2"),
                params![tenant.as_str(), id.as_str()],
                Self::parse_memory_row,
            )
            .optional()
            .map_err(|e| Error::operation("get_memory", e))
        })
    }

    #[instrument(skip(self, query), fields(tenant = %tenant, limit = query.limit))]
    fn search(&self, tenant: &TenantId, query: &MemoryQuery<'_>) -> Result<Vec<MemoryHit>> {
        timed(BACKEND, "search", || {
            let (clause, filter_values) = Self::build_filter_clause(query.filter);
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE tenant_id = ?1
                   AND (expires_at IS NULL OR expires_at > ?2)
                   AND quality >= ?3{clause}"
            );
            let values = [
                Value::Text(tenant.as_str().to_string()),
                Value::Integer(ts_to_sql(query.now)),
                Value::Real(f64::from(query.min_quality)),
            ]
            .into_iter()
            .chain(filter_values);

            let candidates = {
                let conn = acquire_lock(&self.conn);
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| Error::operation("search_memories", e))?;
                let rows = stmt
                    .query_map(params_from_iter(values), Self::parse_memory_row)
                    .map_err(|e| Error::operation("search_memories", e))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| Error::operation("search_memories", e))?
            };

            let hits = candidates
                .into_iter()
                .map(|record| {
                    let relevance = cosine_similarity(query.embedding, &record.embedding);
                    MemoryHit { record, relevance }
                })
                .collect();
            Ok(rank_hits(hits, query.limit))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, memory_id = %id))]
    fn rescore_quality(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<bool> {
        timed(BACKEND, "rescore_quality", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE memories SET quality = ?3 WHERE tenant_id = ?1 AND id = ?2",
                    params![tenant.as_str(), id.as_str(), f64::from(quality.clamp(0.0, 1.0))],
                )
                .map_err(|e| Error::operation("rescore_quality", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self))]
    fn purge_expired(&self, now: u64, limit: usize) -> Result<usize> {
        timed(BACKEND, "purge_expired", || {
            let conn = acquire_lock(&self.conn);
            let purged = conn
                .execute(
                    "DELETE FROM memories WHERE rowid IN (
                        SELECT rowid FROM memories
                        WHERE expires_at IS NOT NULL AND expires_at <= ?1
                        LIMIT ?2
                     )",
                    params![ts_to_sql(now), limit as i64],
                )
                .map_err(|e| Error::operation("purge_expired_memories", e))?;
            metrics::counter!("memories_purged_total", "backend" => BACKEND)
                .increment(purged as u64);
            Ok(purged)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn count(&self, tenant: &TenantId) -> Result<usize> {
        timed(BACKEND, "count", || {
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memories WHERE tenant_id = ?1",
                    params![tenant.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| Error::operation("count_memories", e))?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenant: &str, content: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(
            TenantId::new(tenant),
            AgentId::new("writer"),
            MemoryKind::Insight,
            content,
            embedding,
        )
        .with_created_at(100)
    }

    fn query<'a>(embedding: &'a [f32], filter: &'a MemoryFilter) -> MemoryQuery<'a> {
        MemoryQuery {
            embedding,
            limit: 10,
            min_quality: 0.0,
            filter,
            now: 1_000,
        }
    }

    #[test]
    fn test_store_and_get() {
        let index = SqliteMemoryIndex::in_memory().unwrap();
        let rec = record("t1", "cache warmup", vec![1.0, 0.0])
            .with_trace_id(TraceId::new("trc_1"))
            .with_expires_at(5_000);
        index.store(&rec).unwrap();

        let fetched = index.get(&TenantId::new("t1"), &rec.id).unwrap().unwrap();
        assert_eq!(fetched, rec);
        assert!(index.get(&TenantId::new("t2"), &rec.id).unwrap().is_none());
        assert!(index.store(&rec).is_err());
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let index = SqliteMemoryIndex::in_memory().unwrap();
        let near = record("t1", "near", vec![1.0, 0.1]);
        let far = record("t1", "far", vec![0.0, 1.0]);
        let other = record("t2", "other tenant", vec![1.0, 0.1]);
        for r in [&near, &far, &other] {
            index.store(r).unwrap();
        }

        let filter = MemoryFilter::new();
        let hits = index
            .search(&TenantId::new("t1"), &query(&[1.0, 0.0], &filter))
            .unwrap();
        let contents: Vec<_> = hits.iter().map(|h| h.record.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "far"]);
        assert!(hits[0].relevance > hits[1].relevance);
    }

    #[test]
    fn test_search_applies_filters() {
        let index = SqliteMemoryIndex::in_memory().unwrap();
        let low = record("t1", "low quality", vec![1.0, 0.0]).with_quality(0.1);
        let expired = record("t1", "expired", vec![1.0, 0.0]).with_expires_at(500);
        let secret = record("t1", "secret", vec![1.0, 0.0]).with_sensitivity(Sensitivity::Secret);
        let plan = MemoryRecord::new(
            TenantId::new("t1"),
            AgentId::new("planner"),
            MemoryKind::Plan,
            "plan",
            vec![1.0, 0.0],
        );
        for r in [&low, &expired, &secret, &plan] {
            index.store(r).unwrap();
        }

        let filter = MemoryFilter::new().with_max_sensitivity(Sensitivity::Confidential);
        let mut q = query(&[1.0, 0.0], &filter);
        q.min_quality = 0.3;
        let hits = index.search(&TenantId::new("t1"), &q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "plan");

        let filter = MemoryFilter::new()
            .with_kind(MemoryKind::Insight)
            .with_agent(AgentId::new("writer"));
        let hits = index
            .search(&TenantId::new("t1"), &query(&[1.0, 0.0], &filter))
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_rescore_and_purge() {
        let index = SqliteMemoryIndex::in_memory().unwrap();
        let tenant = TenantId::new("t1");
        let rec = record("t1", "short lived", vec![1.0]).with_expires_at(200);
        index.store(&rec).unwrap();
        index.store(&record("t1", "durable", vec![1.0])).unwrap();

        assert!(index.rescore_quality(&tenant, &rec.id, 0.9).unwrap());
        assert!(!index.rescore_quality(&tenant, &MemoryId::new("mem_missing"), 0.9).unwrap());
        let stored = index.get(&tenant, &rec.id).unwrap().unwrap();
        assert!((stored.quality - 0.9).abs() < 1e-6);

        assert_eq!(index.purge_expired(150, 10).unwrap(), 0);
        assert_eq!(index.purge_expired(200, 10).unwrap(), 1);
        assert_eq!(index.count(&tenant).unwrap(), 1);
    }
}
