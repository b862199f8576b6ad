//! In-memory quota ledger for testing.

use crate::models::{MetricType, QuotaDecision, QuotaWindow, TenantId};
use crate::storage::traits::QuotaBackend;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

type CounterKey = (TenantId, MetricType, u64);

/// In-memory quota ledger. A single mutex makes check-and-increment atomic.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    counters: Mutex<HashMap<CounterKey, (u64, u64)>>,
}

impl InMemoryQuotaLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuotaBackend for InMemoryQuotaLedger {
    fn try_consume(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
        limit: u64,
    ) -> Result<QuotaDecision> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| Error::operation("try_consume_quota", "lock poisoned"))?;
        let key = (tenant.clone(), metric, window.start);
        let used = counters.get(&key).map_or(0, |(value, _)| *value);
        let next = used.saturating_add(cost);
        if next > limit {
            return Ok(QuotaDecision::Denied {
                used,
                limit,
                retry_at: window.end,
            });
        }
        counters.insert(key, (next, window.end));
        Ok(QuotaDecision::Allowed {
            used: next,
            limit,
            window_end: window.end,
        })
    }

    fn refund(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        window: QuotaWindow,
        cost: u64,
    ) -> Result<u64> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| Error::operation("refund_quota", "lock poisoned"))?;
        let Some((value, _)) = counters.get_mut(&(tenant.clone(), metric, window.start)) else {
            return Ok(0);
        };
        *value = value.saturating_sub(cost);
        Ok(*value)
    }

    fn used(&self, tenant: &TenantId, metric: MetricType, window: QuotaWindow) -> Result<u64> {
        let counters = self
            .counters
            .lock()
            .map_err(|_| Error::operation("read_quota_counter", "lock poisoned"))?;
        Ok(counters
            .get(&(tenant.clone(), metric, window.start))
            .map_or(0, |(value, _)| *value))
    }

    fn purge_before(&self, before: u64, limit: usize) -> Result<usize> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| Error::operation("purge_quota_counters", "lock poisoned"))?;
        let stale: Vec<CounterKey> = counters
            .iter()
            .filter(|(_, (_, end))| *end < before)
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect();
        for key in &stale {
            counters.remove(key);
        }
        Ok(stale.len())
    }
}
