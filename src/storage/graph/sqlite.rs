//! `SQLite` graph backend for the weighted agent adjacency.
//!
//! One row per edge, keyed by `(tenant_id, source_id, destination_id)`.

// SQLite stores REAL as f64 and INTEGER as i64; edge weights are f32 and counts
// are inherently non-negative.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{AgentId, DecayPass, Edge, EdgeInit, EdgeKey, EdgeStats, TenantId};
use crate::storage::sqlite::{
    acquire_lock, open_connection, open_in_memory, timed, ts_from_sql, ts_to_sql,
};
use crate::storage::traits::GraphBackend;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite_graph";

const EDGE_COLUMNS: &str = "tenant_id, source_id, destination_id, weight, base_similarity,
    similarity_refreshed_at, success_total, decay_total, last_interaction, last_decayed_at,
    version, created_at";

/// `SQLite`-based graph backend.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. Weight updates are
/// optimistic (`version` column), so callers never hold the lock across a
/// read-modify-write.
///
/// # Schema
///
/// - `edges`: one row per directed edge, primary key `(tenant_id, source_id, destination_id)`
pub struct SqliteGraphBackend {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteGraphBackend {
    /// Opens (or creates) a graph database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path, "open_graph_sqlite")?;
        let backend = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        backend.initialize()?;
        Ok(backend)
    }

    /// Creates an in-memory graph backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory("open_graph_sqlite_memory")?;
        let backend = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        backend.initialize()?;
        Ok(backend)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS edges (
                tenant_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                destination_id TEXT NOT NULL,
                weight REAL NOT NULL,
                base_similarity REAL NOT NULL DEFAULT 0,
                similarity_refreshed_at INTEGER NOT NULL,
                success_total REAL NOT NULL DEFAULT 0,
                decay_total REAL NOT NULL DEFAULT 0,
                last_interaction INTEGER NOT NULL,
                last_decayed_at INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, source_id, destination_id)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_outgoing
                ON edges(tenant_id, source_id, weight DESC);
            CREATE INDEX IF NOT EXISTS idx_edges_decay
                ON edges(tenant_id, last_interaction);
            CREATE INDEX IF NOT EXISTS idx_edges_similarity
                ON edges(tenant_id, similarity_refreshed_at);",
        )
        .map_err(|e| Error::operation("create_edges_table", e))
    }

    fn parse_edge_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
        let tenant: String = row.get("tenant_id")?;
        let source: String = row.get("source_id")?;
        let destination: String = row.get("destination_id")?;
        let weight: f64 = row.get("weight")?;
        let base_similarity: f64 = row.get("base_similarity")?;
        let similarity_refreshed_at: i64 = row.get("similarity_refreshed_at")?;
        let success_total: f64 = row.get("success_total")?;
        let decay_total: f64 = row.get("decay_total")?;
        let last_interaction: i64 = row.get("last_interaction")?;
        let last_decayed_at: i64 = row.get("last_decayed_at")?;
        let version: i64 = row.get("version")?;
        let created_at: i64 = row.get("created_at")?;

        Ok(Edge {
            key: EdgeKey::new(
                TenantId::new(tenant),
                AgentId::new(source),
                AgentId::new(destination),
            ),
            weight: weight as f32,
            base_similarity: base_similarity as f32,
            similarity_refreshed_at: ts_from_sql(similarity_refreshed_at),
            success_total: success_total as f32,
            decay_total: decay_total as f32,
            last_interaction: ts_from_sql(last_interaction),
            last_decayed_at: ts_from_sql(last_decayed_at),
            version: version as u64,
            created_at: ts_from_sql(created_at),
        })
    }
}

impl GraphBackend for SqliteGraphBackend {
    #[instrument(skip(self), fields(edge = %key))]
    fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        timed(BACKEND, "get_edge", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!(
                    "SELECT {EDGE_COLUMNS} FROM edges
                     WHERE tenant_id = ?1 AND source_id = ?2 AND destination_id = ?3"
                ),
                params![
                    key.tenant.as_str(),
                    key.source.as_str(),
                    key.destination.as_str()
                ],
                Self::parse_edge_row,
            )
            .optional()
            .map_err(|e| Error::operation("get_edge", e))
        })
    }

    #[instrument(skip(self, init), fields(edge = %key))]
    fn upsert_edge(&self, key: &EdgeKey, init: EdgeInit, now: u64) -> Result<Edge> {
        timed(BACKEND, "upsert_edge", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!(
                    "INSERT INTO edges (
                        tenant_id, source_id, destination_id, weight, base_similarity,
                        similarity_refreshed_at, last_interaction, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
                    ON CONFLICT(tenant_id, source_id, destination_id) DO UPDATE SET
                        last_interaction = MAX(edges.last_interaction, excluded.last_interaction)
                    RETURNING {EDGE_COLUMNS}"
                ),
                params![
                    key.tenant.as_str(),
                    key.source.as_str(),
                    key.destination.as_str(),
                    f64::from(init.weight),
                    f64::from(init.base_similarity),
                    ts_to_sql(now),
                ],
                Self::parse_edge_row,
            )
            .map_err(|e| Error::operation("upsert_edge", e))
        })
    }

    #[instrument(skip(self, edge), fields(edge = %edge.key, expected_version))]
    fn compare_and_swap(&self, edge: &Edge, expected_version: u64) -> Result<bool> {
        timed(BACKEND, "compare_and_swap", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE edges SET
                        weight = ?4,
                        success_total = ?5,
                        last_interaction = MAX(last_interaction, ?6),
                        version = version + 1
                     WHERE tenant_id = ?1 AND source_id = ?2 AND destination_id = ?3
                       AND version = ?7",
                    params![
                        edge.key.tenant.as_str(),
                        edge.key.source.as_str(),
                        edge.key.destination.as_str(),
                        f64::from(edge.weight),
                        f64::from(edge.success_total),
                        ts_to_sql(edge.last_interaction),
                        expected_version as i64,
                    ],
                )
                .map_err(|e| Error::operation("compare_and_swap", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, source = %source))]
    fn list_outgoing(
        &self,
        tenant: &TenantId,
        source: &AgentId,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        timed(BACKEND, "list_outgoing", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {EDGE_COLUMNS} FROM edges
                     WHERE tenant_id = ?1 AND source_id = ?2
                     ORDER BY weight DESC, last_interaction DESC, destination_id ASC
                     LIMIT ?3"
                ))
                .map_err(|e| Error::operation("list_outgoing", e))?;
            let rows = stmt
                .query_map(
                    params![tenant.as_str(), source.as_str(), limit as i64],
                    Self::parse_edge_row,
                )
                .map_err(|e| Error::operation("list_outgoing", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("list_outgoing", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, source = %source))]
    fn count_outgoing(&self, tenant: &TenantId, source: &AgentId) -> Result<usize> {
        timed(BACKEND, "count_outgoing", || {
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM edges WHERE tenant_id = ?1 AND source_id = ?2",
                    params![tenant.as_str(), source.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| Error::operation("count_outgoing", e))?;
            Ok(count as usize)
        })
    }

    #[instrument(skip(self, pass), fields(tenant = %tenant, sweep_at = pass.sweep_at))]
    fn batch_decay(&self, tenant: &TenantId, pass: &DecayPass) -> Result<usize> {
        timed(BACKEND, "batch_decay", || {
            let conn = acquire_lock(&self.conn);
            let decayed = conn
                .execute(
                    "UPDATE edges SET
                        decay_total = decay_total
                            + (weight - MIN(weight, MAX(?3, weight * ?4))),
                        weight = MIN(weight, MAX(?3, weight * ?4)),
                        last_decayed_at = ?5,
                        version = version + 1
                     WHERE rowid IN (
                        SELECT rowid FROM edges
                        WHERE tenant_id = ?1
                          AND last_interaction < ?2
                          AND last_decayed_at < ?5
                        LIMIT ?6
                     )",
                    params![
                        tenant.as_str(),
                        ts_to_sql(pass.cutoff),
                        f64::from(pass.min_weight),
                        f64::from(pass.factor),
                        ts_to_sql(pass.sweep_at),
                        pass.limit as i64,
                    ],
                )
                .map_err(|e| Error::operation("batch_decay", e))?;
            metrics::counter!("edges_decayed_total", "backend" => BACKEND)
                .increment(decayed as u64);
            Ok(decayed)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn list_stale_similarity(
        &self,
        tenant: &TenantId,
        refreshed_before: u64,
        limit: usize,
    ) -> Result<Vec<EdgeKey>> {
        timed(BACKEND, "list_stale_similarity", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(
                    "SELECT source_id, destination_id FROM edges
                     WHERE tenant_id = ?1 AND similarity_refreshed_at < ?2
                     ORDER BY similarity_refreshed_at ASC
                     LIMIT ?3",
                )
                .map_err(|e| Error::operation("list_stale_similarity", e))?;
            let rows = stmt
                .query_map(
                    params![tenant.as_str(), ts_to_sql(refreshed_before), limit as i64],
                    |row| {
                        let source: String = row.get(0)?;
                        let destination: String = row.get(1)?;
                        Ok(EdgeKey::new(
                            tenant.clone(),
                            AgentId::new(source),
                            AgentId::new(destination),
                        ))
                    },
                )
                .map_err(|e| Error::operation("list_stale_similarity", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("list_stale_similarity", e))
        })
    }

    #[instrument(skip(self), fields(edge = %key))]
    fn update_base_similarity(&self, key: &EdgeKey, similarity: f32, now: u64) -> Result<bool> {
        timed(BACKEND, "update_base_similarity", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE edges SET base_similarity = ?4, similarity_refreshed_at = ?5
                     WHERE tenant_id = ?1 AND source_id = ?2 AND destination_id = ?3",
                    params![
                        key.tenant.as_str(),
                        key.source.as_str(),
                        key.destination.as_str(),
                        f64::from(similarity.clamp(0.0, 1.0)),
                        ts_to_sql(now),
                    ],
                )
                .map_err(|e| Error::operation("update_base_similarity", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self))]
    fn tenant_ids(&self) -> Result<Vec<TenantId>> {
        timed(BACKEND, "tenant_ids", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached("SELECT DISTINCT tenant_id FROM edges ORDER BY tenant_id")
                .map_err(|e| Error::operation("tenant_ids", e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0).map(TenantId::new))
                .map_err(|e| Error::operation("tenant_ids", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("tenant_ids", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn stats(&self, tenant: &TenantId) -> Result<EdgeStats> {
        timed(BACKEND, "stats", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT source_id), AVG(weight), MIN(weight), MAX(weight)
                 FROM edges WHERE tenant_id = ?1",
                params![tenant.as_str()],
                |row| {
                    let edge_count: i64 = row.get(0)?;
                    let source_count: i64 = row.get(1)?;
                    let avg: Option<f64> = row.get(2)?;
                    let min: Option<f64> = row.get(3)?;
                    let max: Option<f64> = row.get(4)?;
                    Ok(EdgeStats {
                        edge_count: edge_count as u64,
                        source_count: source_count as u64,
                        avg_weight: avg.unwrap_or(0.0) as f32,
                        min_weight: min.unwrap_or(0.0) as f32,
                        max_weight: max.unwrap_or(0.0) as f32,
                    })
                },
            )
            .map_err(|e| Error::operation("edge_stats", e))
        })
    }
}
