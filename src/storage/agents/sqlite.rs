//! `SQLite` agent registry.

// SQLite INTEGER is i64 and REAL is f64; counters and scores fit.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{Agent, AgentId, AgentMetrics, AgentStatus, Sensitivity, TenantId};
use crate::storage::sqlite::{
    acquire_lock, decode_embedding, encode_embedding, from_json_column, open_connection,
    open_in_memory, parse_enum_column, timed, to_json, ts_from_sql, ts_to_sql,
};
use crate::storage::traits::AgentBackend;
use crate::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite_agents";

const AGENT_COLUMNS: &str = "a.tenant_id, a.agent_id, a.capabilities, a.tools,
    a.profile_embedding, a.clearance, a.status, a.success_count, a.outcome_count,
    a.avg_outcome, a.last_active, a.created_at";

/// `SQLite`-based agent registry.
///
/// # Schema
///
/// - `agents`: profile and metrics, primary key `(tenant_id, agent_id)`
/// - `agent_capabilities`: one row per declared capability, for lookup
pub struct SqliteAgentRegistry {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteAgentRegistry {
    /// Opens (or creates) an agent database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path, "open_agents_sqlite")?;
        let registry = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        registry.initialize()?;
        Ok(registry)
    }

    /// Creates an in-memory registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory("open_agents_sqlite_memory")?;
        let registry = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        registry.initialize()?;
        Ok(registry)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                tenant_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '[]',
                tools TEXT NOT NULL DEFAULT '[]',
                profile_embedding BLOB NOT NULL,
                clearance TEXT NOT NULL,
                status TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                outcome_count INTEGER NOT NULL DEFAULT 0,
                avg_outcome REAL NOT NULL DEFAULT 0,
                last_active INTEGER,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, agent_id)
            );
            CREATE TABLE IF NOT EXISTS agent_capabilities (
                tenant_id TEXT NOT NULL,
                capability TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                PRIMARY KEY (tenant_id, capability, agent_id)
            );",
        )
        .map_err(|e| Error::operation("create_agents_tables", e))
    }

    fn parse_agent_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
        let capabilities: String = row.get(2)?;
        let tools: String = row.get(3)?;
        let embedding: Vec<u8> = row.get(4)?;
        let clearance: String = row.get(5)?;
        let status: String = row.get(6)?;
        let success_count: i64 = row.get(7)?;
        let outcome_count: i64 = row.get(8)?;
        let avg_outcome: f64 = row.get(9)?;
        let last_active: Option<i64> = row.get(10)?;
        let created_at: i64 = row.get(11)?;

        Ok(Agent {
            tenant: TenantId::new(row.get::<_, String>(0)?),
            id: AgentId::new(row.get::<_, String>(1)?),
            capabilities: from_json_column(2, &capabilities)?,
            tools: from_json_column(3, &tools)?,
            profile_embedding: decode_embedding(&embedding),
            clearance: parse_enum_column(5, &clearance, Sensitivity::parse)?,
            status: parse_enum_column(6, &status, AgentStatus::parse)?,
            metrics: AgentMetrics {
                success_count: success_count as u64,
                outcome_count: outcome_count as u64,
                avg_outcome: avg_outcome as f32,
                last_active: last_active.map(ts_from_sql),
            },
            created_at: ts_from_sql(created_at),
        })
    }

    fn placeholders(start: usize, count: usize) -> String {
        (start..start + count)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn query_agents(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<Vec<Agent>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::operation("query_agents", e))?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::parse_agent_row)
            .map_err(|e| Error::operation("query_agents", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::operation("query_agents", e))
    }
}

impl AgentBackend for SqliteAgentRegistry {
    #[instrument(skip(self, agent), fields(tenant = %agent.tenant, agent = %agent.id))]
    fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        timed(BACKEND, "upsert_agent", || {
            let capabilities = to_json(&agent.capabilities)?;
            let tools = to_json(&agent.tools)?;
            let mut conn = acquire_lock(&self.conn);
            let tx = conn
                .transaction()
                .map_err(|e| Error::operation("upsert_agent_begin", e))?;

            tx.execute(
                "INSERT INTO agents (
                    tenant_id, agent_id, capabilities, tools, profile_embedding,
                    clearance, status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(tenant_id, agent_id) DO UPDATE SET
                    capabilities = excluded.capabilities,
                    tools = excluded.tools,
                    profile_embedding = excluded.profile_embedding,
                    clearance = excluded.clearance,
                    status = excluded.status",
                params![
                    agent.tenant.as_str(),
                    agent.id.as_str(),
                    capabilities,
                    tools,
                    encode_embedding(&agent.profile_embedding),
                    agent.clearance.as_str(),
                    agent.status.as_str(),
                    ts_to_sql(agent.created_at),
                ],
            )
            .map_err(|e| Error::operation("upsert_agent", e))?;

            tx.execute(
                "DELETE FROM agent_capabilities WHERE tenant_id = ?1 AND agent_id = ?2",
                params![agent.tenant.as_str(), agent.id.as_str()],
            )
            .map_err(|e| Error::operation("upsert_agent_capabilities", e))?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO agent_capabilities (tenant_id, capability, agent_id)
                         VALUES (?1, ?2, ?3)",
                    )
                    .map_err(|e| Error::operation("upsert_agent_capabilities", e))?;
                for capability in &agent.capabilities {
                    stmt.execute(params![agent.tenant.as_str(), capability, agent.id.as_str()])
                        .map_err(|e| Error::operation("upsert_agent_capabilities", e))?;
                }
            }

            tx.commit()
                .map_err(|e| Error::operation("upsert_agent_commit", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, agent = %id))]
    fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> Result<Option<Agent>> {
        timed(BACKEND, "get_agent", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!(
                    "SELECT {AGENT_COLUMNS} FROM agents a
                     WHERE a.tenant_id = ?1 AND a.agent_id = ?2"
                ),
                params![tenant.as_str(), id.as_str()],
                Self::parse_agent_row,
            )
            .optional()
            .map_err(|e| Error::operation("get_agent", e))
        })
    }

    #[instrument(skip(self, ids), fields(tenant = %tenant, count = ids.len()))]
    fn get_agents(&self, tenant: &TenantId, ids: &[AgentId]) -> Result<Vec<Agent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        timed(BACKEND, "get_agents", || {
            let sql = format!(
                "SELECT {AGENT_COLUMNS} FROM agents a
                 WHERE a.tenant_id = ?1 AND a.agent_id IN ({})
                 ORDER BY a.agent_id",
                Self::placeholders(2, ids.len())
            );
            let values = std::iter::once(Value::Text(tenant.as_str().to_string()))
                .chain(ids.iter().map(|id| Value::Text(id.as_str().to_string())))
                .collect();
            let conn = acquire_lock(&self.conn);
            Self::query_agents(&conn, &sql, values)
        })
    }

    #[instrument(skip(self, capabilities), fields(tenant = %tenant, limit))]
    fn find_by_capabilities(
        &self,
        tenant: &TenantId,
        capabilities: &[String],
        limit: usize,
    ) -> Result<Vec<Agent>> {
        if capabilities.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        timed(BACKEND, "find_by_capabilities", || {
            let sql = format!(
                "SELECT {AGENT_COLUMNS} FROM agents a
                 WHERE a.tenant_id = ?1 AND a.status != 'suspended'
                   AND a.agent_id IN (
                       SELECT agent_id FROM agent_capabilities
                       WHERE tenant_id = ?1 AND capability IN ({})
                   )
                 ORDER BY a.agent_id
                 LIMIT ?2",
                Self::placeholders(3, capabilities.len())
            );
            let values = [
                Value::Text(tenant.as_str().to_string()),
                Value::Integer(limit as i64),
            ]
            .into_iter()
            .chain(capabilities.iter().map(|c| Value::Text(c.clone())))
            .collect();
            let conn = acquire_lock(&self.conn);
            Self::query_agents(&conn, &sql, values)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, agent = %id, status = %status))]
    fn set_status(&self, tenant: &TenantId, id: &AgentId, status: AgentStatus) -> Result<bool> {
        timed(BACKEND, "set_status", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE agents SET status = ?3 WHERE tenant_id = ?1 AND agent_id = ?2",
                    params![tenant.as_str(), id.as_str(), status.as_str()],
                )
                .map_err(|e| Error::operation("set_agent_status", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, agent = %id))]
    fn record_outcome(
        &self,
        tenant: &TenantId,
        id: &AgentId,
        score: f32,
        success_threshold: f32,
        now: u64,
    ) -> Result<bool> {
        timed(BACKEND, "record_outcome", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE agents SET
                        outcome_count = outcome_count + 1,
                        avg_outcome = avg_outcome + (?3 - avg_outcome) / (outcome_count + 1),
                        success_count = success_count + (CASE WHEN ?3 >= ?4 THEN 1 ELSE 0 END),
                        last_active = ?5
                     WHERE tenant_id = ?1 AND agent_id = ?2",
                    params![
                        tenant.as_str(),
                        id.as_str(),
                        f64::from(score),
                        f64::from(success_threshold),
                        ts_to_sql(now),
                    ],
                )
                .map_err(|e| Error::operation("record_agent_outcome", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn count(&self, tenant: &TenantId) -> Result<usize> {
        timed(BACKEND, "count", || {
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM agents WHERE tenant_id = ?1",
                    params![tenant.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| Error::operation("count_agents", e))?;
            Ok(count as usize)
        })
    }
}
