//! `SQLite` quota ledger.

// SQLite INTEGER is i64; stored counters are non-negative and purge limits are small.
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use crate::models::{MetricType, QuotaDecision, QuotaWindow, TenantId};
use crate::storage::sqlite::{acquire_lock, open_connection, open_in_memory, timed, ts_to_sql};
use crate::storage::traits::QuotaBackend;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite_quota";

/// `SQLite`-based quota ledger.
///
/// # Atomicity
///
/// The check and the increment are one conditional upsert: the row is
/// inserted only if `cost <= limit`, and an existing row is only bumped if the
/// sum stays within the limit. A statement that changes no row is a denial.
///
/// # Schema
///
/// - `quota_counters`: primary key `(tenant_id, metric, window_start)`
pub struct SqliteQuotaLedger {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteQuotaLedger {
    /// Opens (or creates) a quota database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path, "open_quota_sqlite")?;
        let ledger = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Creates an in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory("open_quota_sqlite_memory")?;
        let ledger = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quota_counters (
                tenant_id TEXT NOT NULL,
                metric TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, metric, window_start)
            );
            CREATE INDEX IF NOT EXISTS idx_quota_window_end
                ON quota_counters(window_end);",
        )
        .map_err(|e| Error::operation("create_quota_table", e))
    }

    fn read_used(
        conn: &Connection,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
    ) -> Result<u64> {
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM quota_counters
                 WHERE tenant_id = ?1 AND metric = ?2 AND window_start = ?3",
                params![tenant.as_str(), metric.as_str(), ts_to_sql(window.start)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::operation("read_quota_counter", e))?;
        Ok(value.map_or(0, |v| v.max(0) as u64))
    }
}

impl QuotaBackend for SqliteQuotaLedger {
    #[instrument(skip(self), fields(tenant = %tenant, metric = %metric))]
    fn try_consume(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
        limit: u64,
    ) -> Result<QuotaDecision> {
        timed(BACKEND, "try_consume", || {
            let conn = acquire_lock(&self.conn);
            let denied = |used| QuotaDecision::Denied {
                used,
                limit,
                retry_at: window.end,
            };
            // A cost that cannot fit the limit, or an INTEGER column, is never charged.
            let Some(sql_cost) = i64::try_from(cost).ok().filter(|_| cost <= limit) else {
                return Ok(denied(Self::read_used(&conn, tenant, metric, window)?));
            };
            let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let changed = conn
                .execute(
                    "INSERT INTO quota_counters (tenant_id, metric, window_start, window_end, value)
                     SELECT ?1, ?2, ?3, ?4, ?5 WHERE ?5 <= ?6
                     ON CONFLICT(tenant_id, metric, window_start) DO UPDATE SET
                        value = quota_counters.value + excluded.value
                     WHERE quota_counters.value + excluded.value <= ?6",
                    params![
                        tenant.as_str(),
                        metric.as_str(),
                        ts_to_sql(window.start),
                        ts_to_sql(window.end),
                        sql_cost,
                        sql_limit,
                    ],
                )
                .map_err(|e| Error::operation("try_consume_quota", e))?;
            let used = Self::read_used(&conn, tenant, metric, window)?;

            if changed == 1 {
                Ok(QuotaDecision::Allowed {
                    used,
                    limit,
                    window_end: window.end,
                })
            } else {
                Ok(denied(used))
            }
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, metric = %metric))]
    fn refund(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
    ) -> Result<u64> {
        timed(BACKEND, "refund", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "UPDATE quota_counters SET value = MAX(0, value - ?4)
                 WHERE tenant_id = ?1 AND metric = ?2 AND window_start = ?3",
                params![
                    tenant.as_str(),
                    metric.as_str(),
                    ts_to_sql(window.start),
                    i64::try_from(cost).unwrap_or(i64::MAX),
                ],
            )
            .map_err(|e| Error::operation("refund_quota", e))?;
            Self::read_used(&conn, tenant, metric, window)
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant, metric = %metric))]
    fn used(&self, tenant: &TenantId, metric: MetricType, window: QuotaWindow) -> Result<u64> {
        timed(BACKEND, "used", || {
            let conn = acquire_lock(&self.conn);
            Self::read_used(&conn, tenant, metric, window)
        })
    }

    #[instrument(skip(self))]
    fn purge_before(&self, before: u64, limit: usize) -> Result<usize> {
        timed(BACKEND, "purge_before", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "DELETE FROM quota_counters WHERE rowid IN (
                    SELECT rowid FROM quota_counters WHERE window_end < ?1 LIMIT ?2
                 )",
                params![ts_to_sql(before), limit as i64],
            )
            .map_err(|e| Error::operation("purge_quota_counters", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_consume_until_limit() {
        let ledger = SqliteQuotaLedger::in_memory().unwrap();
        let tenant = TenantId::new("t1");
        let window = QuotaWindow::containing(125, 60);

        for expected in 1..=3 {
            let decision = ledger
                .try_consume(&tenant, MetricType::Routes, window, 1, 3)
                .unwrap();
            assert_eq!(
                decision,
                QuotaDecision::Allowed {
                    used: expected,
                    limit: 3,
                    window_end: 180
                }
            );
        }
        let denied = ledger
            .try_consume(&tenant, MetricType::Routes, window, 1, 3)
            .unwrap();
        assert_eq!(
            denied,
            QuotaDecision::Denied {
                used: 3,
                limit: 3,
                retry_at: 180
            }
        );
        assert_eq!(ledger.used(&tenant, MetricType::Routes, window).unwrap(), 3);
    }

    #[test]
    fn test_oversized_cost_leaves_counter_untouched() {
        let ledger = SqliteQuotaLedger::in_memory().unwrap();
        let tenant = TenantId::new("t1");
        let window = QuotaWindow::containing(0, 60);

        let first = ledger
            .try_consume(&tenant, MetricType::Searches, window, 5, 4)
            .unwrap();
        assert!(!first.is_allowed());
        assert_eq!(ledger.used(&tenant, MetricType::Searches, window).unwrap(), 0);

        ledger
            .try_consume(&tenant, MetricType::Searches, window, 3, 4)
            .unwrap();
        let second = ledger
            .try_consume(&tenant, MetricType::Searches, window, 2, 4)
            .unwrap();
        assert!(!second.is_allowed());
        assert_eq!(ledger.used(&tenant, MetricType::Searches, window).unwrap(), 3);
    }

    #[test]
    fn test_cost_beyond_i64_is_denied_without_refund() {
        let ledger = SqliteQuotaLedger::in_memory().unwrap();
        let tenant = TenantId::new("t1");
        let window = QuotaWindow::containing(0, 60);

        ledger
            .try_consume(&tenant, MetricType::Searches, window, 5, 10_000)
            .unwrap();
        for cost in [u64::MAX, i64::MAX as u64 + 1] {
            let decision = ledger
                .try_consume(&tenant, MetricType::Searches, window, cost, 10_000)
                .unwrap();
            assert_eq!(
                decision,
                QuotaDecision::Denied {
                    used: 5,
                    limit: 10_000,
                    retry_at: 60
                }
            );
        }
        // Unbounded limits still refuse costs SQLite cannot store.
        let huge = ledger
            .try_consume(&tenant, MetricType::Routes, window, u64::MAX, u64::MAX)
            .unwrap();
        assert!(!huge.is_allowed());
        assert_eq!(ledger.used(&tenant, MetricType::Searches, window).unwrap(), 5);
        assert_eq!(ledger.used(&tenant, MetricType::Routes, window).unwrap(), 0);
    }

    #[test]
    fn test_refund_returns_units_to_the_window() {
        let ledger = SqliteQuotaLedger::in_memory().unwrap();
        let tenant = TenantId::new("t1");
        let window = QuotaWindow::containing(0, 60);

        ledger
            .try_consume(&tenant, MetricType::Routes, window, 4, 4)
            .unwrap();
        assert_eq!(ledger.refund(&tenant, MetricType::Routes, window, 3).unwrap(), 1);
        assert!(
            ledger
                .try_consume(&tenant, MetricType::Routes, window, 3, 4)
                .unwrap()
                .is_allowed()
        );
        assert_eq!(ledger.refund(&tenant, MetricType::Routes, window, u64::MAX).unwrap(), 0);
        assert_eq!(ledger.refund(&tenant, MetricType::Searches, window, 1).unwrap(), 0);
    }

    #[test]
    fn test_windows_metrics_and_tenants_are_independent() {
        let ledger = SqliteQuotaLedger::in_memory().unwrap();
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");
        let w1 = QuotaWindow::containing(10, 60);
        let w2 = QuotaWindow::containing(70, 60);

        assert!(ledger.try_consume(&t1, MetricType::Routes, w1, 1, 1).unwrap().is_allowed());
        assert!(!ledger.try_consume(&t1, MetricType::Routes, w1, 1, 1).unwrap().is_allowed());
        assert!(ledger.try_consume(&t1, MetricType::Routes, w2, 1, 1).unwrap().is_allowed());
        assert!(ledger.try_consume(&t1, MetricType::Outcomes, w1, 1, 1).unwrap().is_allowed());
        assert!(ledger.try_consume(&t2, MetricType::Routes, w1, 1, 1).unwrap().is_allowed());

        assert_eq!(ledger.purge_before(61, 100).unwrap(), 3);
        assert_eq!(ledger.used(&t1, MetricType::Routes, w2).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_consumers_never_exceed_limit() {
        let ledger = Arc::new(SqliteQuotaLedger::in_memory().unwrap());
        let window = QuotaWindow::containing(0, 60);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| {
                            ledger
                                .try_consume(&TenantId::new("t"), MetricType::Routes, window, 1, 25)
                                .unwrap()
                                .is_allowed()
                        })
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 25);
    }
}
