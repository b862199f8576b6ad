//! `SQLite` nutrient and route store.

// SQLite INTEGER is i64 and REAL is f64; hops, costs and scores fit.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{
    AgentId, Nutrient, NutrientId, NutrientState, Route, RouteId, Sensitivity, TenantId, TraceId,
};
use crate::storage::sqlite::{
    acquire_lock, decode_embedding, encode_embedding, from_json_column, open_connection,
    open_in_memory, parse_enum_column, timed, to_json, ts_from_sql, ts_to_sql,
};
use crate::storage::traits::{HopCommit, HopCommitResult, NutrientBackend};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite_lifecycle";

const NUTRIENT_COLUMNS: &str = "id, tenant_id, trace_id, origin_id, summary, embedding, snippets,
    tool_hints, required_capabilities, sensitivity, current_hop, max_hops, ttl_secs, quota_cost,
    created_at, expires_at, state";

const ROUTE_COLUMNS: &str = "id, tenant_id, nutrient_id, trace_id, source_id, destination_id, hop,
    score, explored, created_at, outcome_score";

/// `SQLite`-based nutrient store.
///
/// # Schema
///
/// - `nutrients`: one row per nutrient; `current_hop` and `state` are the
///   only mutable columns
/// - `routes`: append-only, unique on `(nutrient_id, hop, destination_id)`
pub struct SqliteNutrientStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteNutrientStore {
    /// Opens (or creates) a lifecycle database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path, "open_lifecycle_sqlite")?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory("open_lifecycle_sqlite_memory")?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nutrients (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                origin_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                embedding BLOB NOT NULL,
                snippets TEXT NOT NULL DEFAULT '[]',
                tool_hints TEXT NOT NULL DEFAULT '[]',
                required_capabilities TEXT NOT NULL DEFAULT '[]',
                sensitivity TEXT NOT NULL,
                current_hop INTEGER NOT NULL DEFAULT 0,
                max_hops INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL,
                quota_cost INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                state TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_nutrients_due ON nutrients(state, expires_at);
            CREATE INDEX IF NOT EXISTS idx_nutrients_trace ON nutrients(tenant_id, trace_id);

            CREATE TABLE IF NOT EXISTS routes (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                nutrient_id TEXT NOT NULL REFERENCES nutrients(id),
                trace_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                destination_id TEXT NOT NULL,
                hop INTEGER NOT NULL,
                score REAL NOT NULL,
                explored INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                outcome_score REAL,
                UNIQUE (nutrient_id, hop, destination_id)
            );
            CREATE INDEX IF NOT EXISTS idx_routes_trace ON routes(tenant_id, trace_id);",
        )
        .map_err(|e| Error::operation("create_lifecycle_tables", e))
    }

    fn parse_nutrient_row(row: &Row<'_>) -> rusqlite::Result<Nutrient> {
        let embedding: Vec<u8> = row.get(5)?;
        let snippets: String = row.get(6)?;
        let tool_hints: String = row.get(7)?;
        let required: String = row.get(8)?;
        let sensitivity: String = row.get(9)?;
        let current_hop: i64 = row.get(10)?;
        let max_hops: i64 = row.get(11)?;
        let ttl_secs: i64 = row.get(12)?;
        let quota_cost: i64 = row.get(13)?;
        let created_at: i64 = row.get(14)?;
        let expires_at: i64 = row.get(15)?;
        let state: String = row.get(16)?;

        Ok(Nutrient {
            id: NutrientId::new(row.get::<_, String>(0)?),
            tenant: TenantId::new(row.get::<_, String>(1)?),
            trace_id: TraceId::new(row.get::<_, String>(2)?),
            origin: AgentId::new(row.get::<_, String>(3)?),
            summary: row.get(4)?,
            embedding: decode_embedding(&embedding),
            snippets: from_json_column(6, &snippets)?,
            tool_hints: from_json_column(7, &tool_hints)?,
            required_capabilities: from_json_column(8, &required)?,
            sensitivity: parse_enum_column(9, &sensitivity, Sensitivity::parse)?,
            current_hop: current_hop as u32,
            max_hops: max_hops as u32,
            ttl_secs: ts_from_sql(ttl_secs),
            quota_cost: quota_cost.max(0) as u64,
            created_at: ts_from_sql(created_at),
            expires_at: ts_from_sql(expires_at),
            state: parse_enum_column(16, &state, NutrientState::parse)?,
        })
    }

    fn parse_route_row(row: &Row<'_>) -> rusqlite::Result<Route> {
        let hop: i64 = row.get(6)?;
        let score: f64 = row.get(7)?;
        let explored: i64 = row.get(8)?;
        let created_at: i64 = row.get(9)?;
        let outcome_score: Option<f64> = row.get(10)?;

        Ok(Route {
            id: RouteId::new(row.get::<_, String>(0)?),
            tenant: TenantId::new(row.get::<_, String>(1)?),
            nutrient_id: NutrientId::new(row.get::<_, String>(2)?),
            trace_id: TraceId::new(row.get::<_, String>(3)?),
            source: AgentId::new(row.get::<_, String>(4)?),
            destination: AgentId::new(row.get::<_, String>(5)?),
            hop: hop as u32,
            score: score as f32,
            explored: explored != 0,
            created_at: ts_from_sql(created_at),
            outcome_score: outcome_score.map(|s| s as f32),
        })
    }

    fn query_routes_for_hop(
        conn: &Connection,
        tenant: &TenantId,
        id: &NutrientId,
        hop: u32,
    ) -> Result<Vec<Route>> {
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {ROUTE_COLUMNS} FROM routes
                 WHERE tenant_id = ?1 AND nutrient_id = ?2 AND hop = ?3
                 ORDER BY score DESC, destination_id ASC"
            ))
            .map_err(|e| Error::operation("routes_for_hop", e))?;
        let rows = stmt
            .query_map(
                params![tenant.as_str(), id.as_str(), i64::from(hop)],
                Self::parse_route_row,
            )
            .map_err(|e| Error::operation("routes_for_hop", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::operation("routes_for_hop", e))
    }
}

impl NutrientBackend for SqliteNutrientStore {
    #[instrument(
        skip(self, nutrient),
        fields(tenant = %nutrient.tenant, nutrient_id = %nutrient.id)
    )]
    fn insert_nutrient(&self, nutrient: &Nutrient) -> Result<()> {
        timed(BACKEND, "insert_nutrient", || {
            let snippets = to_json(&nutrient.snippets)?;
            let tool_hints = to_json(&nutrient.tool_hints)?;
            let required = to_json(&nutrient.required_capabilities)?;
            let conn = acquire_lock(&self.conn);
            conn.execute(
                &format!(
                    "INSERT INTO nutrients ({NUTRIENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17)"
                ),
                params![
                    nutrient.id.as_str(),
                    nutrient.tenant.as_str(),
                    nutrient.trace_id.as_str(),
                    nutrient.origin.as_str(),
                    nutrient.summary,
                    encode_embedding(&nutrient.embedding),
                    snippets,
                    tool_hints,
                    required,
                    nutrient.sensitivity.as_str(),
                    i64::from(nutrient.current_hop),
                    i64::from(nutrient.max_hops),
                    ts_to_sql(nutrient.ttl_secs),
                    nutrient.quota_cost as i64,
                    ts_to_sql(nutrient.created_at),
                    ts_to_sql(nutrient.expires_at),
                    nutrient.state.as_str(),
                ],
            )
            .map_err(|e| Error::operation("insert_nutrient", e))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, nutrient_id = %id))]
    fn get_nutrient(&self, tenant: &TenantId, id: &NutrientId) -> Result<Option<Nutrient>> {
        timed(BACKEND, "get_nutrient", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                &format!(
                    "SELECT {NUTRIENT_COLUMNS} FROM nutrients WHERE tenant_id = ?1 AND id = ?2"
                ),
                params![tenant.as_str(), id.as_str()],
                Self::parse_nutrient_row,
            )
            .optional()
            .map_err(|e| Error::operation("get_nutrient", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, nutrient_id = %id, hop))]
    fn routes_for_hop(&self, tenant: &TenantId, id: &NutrientId, hop: u32) -> Result<Vec<Route>> {
        timed(BACKEND, "routes_for_hop", || {
            let conn = acquire_lock(&self.conn);
            Self::query_routes_for_hop(&conn, tenant, id, hop)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, nutrient_id = %id))]
    fn visited_agents(&self, tenant: &TenantId, id: &NutrientId) -> Result<Vec<AgentId>> {
        timed(BACKEND, "visited_agents", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(
                    "SELECT DISTINCT destination_id FROM routes
                     WHERE tenant_id = ?1 AND nutrient_id = ?2
                     ORDER BY destination_id",
                )
                .map_err(|e| Error::operation("visited_agents", e))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), id.as_str()], |row| {
                    row.get::<_, String>(0).map(AgentId::new)
                })
                .map_err(|e| Error::operation("visited_agents", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("visited_agents", e))
        })
    }

    #[instrument(
        skip(self, commit),
        fields(tenant = %commit.tenant, nutrient_id = %commit.nutrient_id, hop = commit.hop)
    )]
    fn commit_hop(&self, commit: &HopCommit<'_>) -> Result<HopCommitResult> {
        timed(BACKEND, "commit_hop", || {
            let mut conn = acquire_lock(&self.conn);
            let tx = conn
                .transaction()
                .map_err(|e| Error::operation("commit_hop_begin", e))?;

            let advanced = tx
                .execute(
                    "UPDATE nutrients SET current_hop = ?3, state = ?4
                     WHERE tenant_id = ?1 AND id = ?2 AND current_hop = ?3 - 1
                       AND state IN ('created', 'propagating')",
                    params![
                        commit.tenant.as_str(),
                        commit.nutrient_id.as_str(),
                        i64::from(commit.hop),
                        commit.next_state.as_str(),
                    ],
                )
                .map_err(|e| Error::operation("commit_hop_advance", e))?;

            if advanced == 0 {
                let exists: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM nutrients WHERE tenant_id = ?1 AND id = ?2)",
                        params![commit.tenant.as_str(), commit.nutrient_id.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(|e| Error::operation("commit_hop_lookup", e))?;
                if !exists {
                    return Err(Error::NotFound {
                        kind: "nutrient",
                        id: commit.nutrient_id.to_string(),
                    });
                }
                let winner =
                    Self::query_routes_for_hop(&tx, commit.tenant, commit.nutrient_id, commit.hop)?;
                return Ok(HopCommitResult::Superseded(winner));
            }

            {
                let mut stmt = tx
                    .prepare_cached(&format!(
                        "INSERT INTO routes ({ROUTE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ))
                    .map_err(|e| Error::operation("commit_hop_routes", e))?;
                for route in commit.routes {
                    stmt.execute(params![
                        route.id.as_str(),
                        route.tenant.as_str(),
                        route.nutrient_id.as_str(),
                        route.trace_id.as_str(),
                        route.source.as_str(),
                        route.destination.as_str(),
                        i64::from(route.hop),
                        f64::from(route.score),
                        i64::from(route.explored),
                        ts_to_sql(route.created_at),
                        route.outcome_score.map(f64::from),
                    ])
                    .map_err(|e| Error::operation("commit_hop_routes", e))?;
                }
            }

            tx.commit()
                .map_err(|e| Error::operation("commit_hop_commit", e))?;
            metrics::counter!("routes_committed_total").increment(commit.routes.len() as u64);
            Ok(HopCommitResult::Committed)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, nutrient_id = %id, from = %from, to = %to))]
    fn transition_state(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        from: NutrientState,
        to: NutrientState,
    ) -> Result<bool> {
        timed(BACKEND, "transition_state", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE nutrients SET state = ?4
                     WHERE tenant_id = ?1 AND id = ?2 AND state = ?3",
                    params![tenant.as_str(), id.as_str(), from.as_str(), to.as_str()],
                )
                .map_err(|e| Error::operation("transition_state", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, trace_id = %trace))]
    fn routes_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Result<Vec<Route>> {
        timed(BACKEND, "routes_for_trace", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {ROUTE_COLUMNS} FROM routes
                     WHERE tenant_id = ?1 AND trace_id = ?2
                     ORDER BY hop ASC, score DESC, destination_id ASC"
                ))
                .map_err(|e| Error::operation("routes_for_trace", e))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), trace.as_str()], Self::parse_route_row)
                .map_err(|e| Error::operation("routes_for_trace", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("routes_for_trace", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, route_id = %route))]
    fn attach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool> {
        timed(BACKEND, "attach_outcome", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE routes SET outcome_score = ?3
                     WHERE tenant_id = ?1 AND id = ?2 AND outcome_score IS NULL",
                    params![tenant.as_str(), route.as_str(), f64::from(score)],
                )
                .map_err(|e| Error::operation("attach_outcome", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, route_id = %route))]
    fn detach_outcome(&self, tenant: &TenantId, route: &RouteId, score: f32) -> Result<bool> {
        timed(BACKEND, "detach_outcome", || {
            let conn = acquire_lock(&self.conn);
            let changed = conn
                .execute(
                    "UPDATE routes SET outcome_score = NULL
                     WHERE tenant_id = ?1 AND id = ?2 AND outcome_score = ?3",
                    params![tenant.as_str(), route.as_str(), f64::from(score)],
                )
                .map_err(|e| Error::operation("detach_outcome", e))?;
            Ok(changed == 1)
        })
    }

    #[instrument(skip(self))]
    fn list_due(&self, now: u64, limit: usize) -> Result<Vec<Nutrient>> {
        timed(BACKEND, "list_due", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {NUTRIENT_COLUMNS} FROM nutrients
                     WHERE state IN ('created', 'propagating') AND expires_at <= ?1
                     ORDER BY expires_at ASC
                     LIMIT ?2"
                ))
                .map_err(|e| Error::operation("list_due_nutrients", e))?;
            let rows = stmt
                .query_map(params![ts_to_sql(now), limit as i64], Self::parse_nutrient_row)
                .map_err(|e| Error::operation("list_due_nutrients", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("list_due_nutrients", e))
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn count_by_state(&self, tenant: &TenantId) -> Result<Vec<(NutrientState, u64)>> {
        timed(BACKEND, "count_by_state", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(
                    "SELECT state, COUNT(*) FROM nutrients
                     WHERE tenant_id = ?1 GROUP BY state ORDER BY state",
                )
                .map_err(|e| Error::operation("count_by_state", e))?;
            let rows = stmt
                .query_map(params![tenant.as_str()], |row| {
                    let state: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((
                        parse_enum_column(0, &state, NutrientState::parse)?,
                        count as u64,
                    ))
                })
                .map_err(|e| Error::operation("count_by_state", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::operation("count_by_state", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nutrient(id: &str) -> Nutrient {
        Nutrient {
            id: NutrientId::new(id),
            tenant: TenantId::new("t1"),
            trace_id: TraceId::new("trc_1"),
            origin: AgentId::new("origin"),
            summary: "retry storms under load".to_string(),
            embedding: vec![0.5, 0.5],
            snippets: vec!["backoff with jitter".to_string()],
            tool_hints: vec!["tokio::time".to_string()],
            required_capabilities: vec!["rust".to_string()],
            sensitivity: Sensitivity::Internal,
            current_hop: 0,
            max_hops: 2,
            ttl_secs: 60,
            quota_cost: 1,
            created_at: 100,
            expires_at: 160,
            state: NutrientState::Created,
        }
    }

    fn route(n: &Nutrient, hop: u32, src: &str, dst: &str, score: f32) -> Route {
        Route {
            id: RouteId::generate(),
            tenant: n.tenant.clone(),
            nutrient_id: n.id.clone(),
            trace_id: n.trace_id.clone(),
            source: AgentId::new(src),
            destination: AgentId::new(dst),
            hop,
            score,
            explored: false,
            created_at: 110,
            outcome_score: None,
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let n = nutrient("nut_1");
        store.insert_nutrient(&n).unwrap();
        assert_eq!(store.get_nutrient(&n.tenant, &n.id).unwrap(), Some(n.clone()));
        assert!(store.get_nutrient(&TenantId::new("t2"), &n.id).unwrap().is_none());
        assert!(store.insert_nutrient(&n).is_err());
    }

    #[test]
    fn test_commit_hop_advances_once() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let n = nutrient("nut_1");
        store.insert_nutrient(&n).unwrap();

        let first = vec![route(&n, 1, "origin", "b", 0.9), route(&n, 1, "origin", "c", 0.4)];
        let commit = HopCommit {
            tenant: &n.tenant,
            nutrient_id: &n.id,
            hop: 1,
            routes: &first,
            next_state: NutrientState::Propagating,
        };
        assert_eq!(store.commit_hop(&commit).unwrap(), HopCommitResult::Committed);

        let loser = vec![route(&n, 1, "origin", "d", 0.99)];
        let retry = HopCommit {
            routes: &loser,
            ..commit
        };
        assert_eq!(
            store.commit_hop(&retry).unwrap(),
            HopCommitResult::Superseded(first.clone())
        );

        let stored = store.get_nutrient(&n.tenant, &n.id).unwrap().unwrap();
        assert_eq!(stored.current_hop, 1);
        assert_eq!(stored.state, NutrientState::Propagating);
        assert_eq!(
            store.visited_agents(&n.tenant, &n.id).unwrap(),
            vec![AgentId::new("b"), AgentId::new("c")]
        );
    }

    #[test]
    fn test_commit_hop_rejects_terminal_and_missing() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let n = nutrient("nut_1");
        store.insert_nutrient(&n).unwrap();
        assert!(store
            .transition_state(&n.tenant, &n.id, NutrientState::Created, NutrientState::Expired)
            .unwrap());
        assert!(!store
            .transition_state(&n.tenant, &n.id, NutrientState::Created, NutrientState::Expired)
            .unwrap());

        let routes = vec![route(&n, 1, "origin", "b", 0.5)];
        let commit = HopCommit {
            tenant: &n.tenant,
            nutrient_id: &n.id,
            hop: 1,
            routes: &routes,
            next_state: NutrientState::Propagating,
        };
        assert_eq!(
            store.commit_hop(&commit).unwrap(),
            HopCommitResult::Superseded(Vec::new())
        );

        let missing = NutrientId::new("nut_missing");
        let commit = HopCommit {
            nutrient_id: &missing,
            ..commit
        };
        assert!(matches!(
            store.commit_hop(&commit),
            Err(Error::NotFound { kind: "nutrient", .. })
        ));
    }

    #[test]
    fn test_outcome_attaches_once() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let n = nutrient("nut_1");
        store.insert_nutrient(&n).unwrap();
        let routes = vec![route(&n, 1, "origin", "b", 0.5)];
        store
            .commit_hop(&HopCommit {
                tenant: &n.tenant,
                nutrient_id: &n.id,
                hop: 1,
                routes: &routes,
                next_state: NutrientState::Propagating,
            })
            .unwrap();

        assert!(store.attach_outcome(&n.tenant, &routes[0].id, 0.8).unwrap());
        assert!(!store.attach_outcome(&n.tenant, &routes[0].id, 0.1).unwrap());
        let traced = store.routes_for_trace(&n.tenant, &n.trace_id).unwrap();
        assert_eq!(traced.len(), 1);
        assert_eq!(traced[0].outcome_score, Some(0.8));
    }

    #[test]
    fn test_detached_outcome_can_be_attached_again() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let n = nutrient("nut_1");
        store.insert_nutrient(&n).unwrap();
        let routes = vec![route(&n, 1, "origin", "b", 0.5)];
        store
            .commit_hop(&HopCommit {
                tenant: &n.tenant,
                nutrient_id: &n.id,
                hop: 1,
                routes: &routes,
                next_state: NutrientState::Propagating,
            })
            .unwrap();
        let id = &routes[0].id;

        assert!(!store.detach_outcome(&n.tenant, id, 0.8).unwrap());
        assert!(store.attach_outcome(&n.tenant, id, 0.8).unwrap());
        // Only the outcome this caller wrote is cleared.
        assert!(!store.detach_outcome(&n.tenant, id, 0.3).unwrap());
        assert!(!store.detach_outcome(&TenantId::new("other"), id, 0.8).unwrap());
        assert!(store.detach_outcome(&n.tenant, id, 0.8).unwrap());
        assert!(store.attach_outcome(&n.tenant, id, 0.3).unwrap());
        let traced = store.routes_for_trace(&n.tenant, &n.trace_id).unwrap();
        assert_eq!(traced[0].outcome_score, Some(0.3));
    }

    #[test]
    fn test_list_due_and_counts() {
        let store = SqliteNutrientStore::in_memory().unwrap();
        let a = nutrient("nut_a");
        let mut b = nutrient("nut_b");
        b.expires_at = 500;
        let mut c = nutrient("nut_c");
        c.state = NutrientState::Exhausted;
        for n in [&a, &b, &c] {
            store.insert_nutrient(n).unwrap();
        }

        let due = store.list_due(200, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, a.id);

        let counts = store.count_by_state(&a.tenant).unwrap();
        assert_eq!(
            counts,
            vec![(NutrientState::Created, 2), (NutrientState::Exhausted, 1)]
        );
    }
}
