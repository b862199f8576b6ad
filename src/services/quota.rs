//! Per-tenant quota enforcement.
//!
//! Limits come from the tenant's [`TenantPolicy`](crate::TenantPolicy); windows
//! are fixed and aligned to the policy's `window_secs`. A request is charged
//! to the window containing its arrival time. Denials change nothing and are
//! audited.

use crate::config::HyphanetConfig;
use crate::models::{
    EventMeta, MetricType, NetworkEvent, QuotaDecision, QuotaUsage, QuotaWindow, TenantId, TraceId,
};
use crate::security::AuditLogger;
use crate::storage::QuotaBackend;
use crate::{Error, Result, current_timestamp};
use std::sync::Arc;
use tracing::instrument;

/// Service for checking and charging quotas.
pub struct QuotaService {
    backend: Arc<dyn QuotaBackend>,
    audit: Arc<AuditLogger>,
    config: Arc<HyphanetConfig>,
}

impl QuotaService {
    /// Creates a new quota service.
    #[must_use]
    pub fn new(
        backend: Arc<dyn QuotaBackend>,
        audit: Arc<AuditLogger>,
        config: Arc<HyphanetConfig>,
    ) -> Self {
        Self {
            backend,
            audit,
            config,
        }
    }

    /// Checks and charges `cost` units of `metric` now.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    pub fn check_and_consume(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
    ) -> Result<QuotaDecision> {
        self.check_and_consume_at(tenant, metric, cost, None, current_timestamp())
    }

    /// Checks and charges `cost` units of `metric` at `now`.
    ///
    /// The check and the charge are one atomic ledger operation; a denied
    /// request leaves the counter unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    #[instrument(skip(self, trace), fields(tenant = %tenant, metric = %metric, cost))]
    pub fn check_and_consume_at(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
        trace: Option<&TraceId>,
        now: u64,
    ) -> Result<QuotaDecision> {
        require_tenant(tenant)?;
        let policy = self.config.policy_for(tenant);
        let window = QuotaWindow::containing(now, policy.window_secs);
        let limit = policy.quotas.limit_for(metric);

        let decision = self
            .backend
            .try_consume(tenant, metric, window, cost, limit)?;

        if let QuotaDecision::Denied { used, limit, .. } = decision {
            metrics::counter!("quota_denied_total", "metric" => metric.as_str()).increment(1);
            tracing::warn!(tenant = %tenant, metric = %metric, used, limit, cost, "Quota denied");
            self.audit.record(&NetworkEvent::QuotaDenied {
                meta: EventMeta::with_timestamp("quota", tenant.clone(), trace.cloned(), now),
                metric,
                cost,
                used,
                limit,
            });
        }
        Ok(decision)
    }

    /// Charges `cost` units, turning a denial into [`Error::QuotaExceeded`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] on denial, or a ledger error.
    pub fn require_at(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
        trace: Option<&TraceId>,
        now: u64,
    ) -> Result<()> {
        match self.check_and_consume_at(tenant, metric, cost, trace, now)? {
            QuotaDecision::Allowed { .. } => Ok(()),
            QuotaDecision::Denied {
                used,
                limit,
                retry_at,
            } => Err(Error::QuotaExceeded {
                tenant: tenant.to_string(),
                metric: metric.to_string(),
                used,
                limit,
                retry_at,
            }),
        }
    }

    /// Returns usage of `metric` in the window containing `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    pub fn usage_at(&self, tenant: &TenantId, metric: MetricType, now: u64) -> Result<QuotaUsage> {
        require_tenant(tenant)?;
        let policy = self.config.policy_for(tenant);
        let window = QuotaWindow::containing(now, policy.window_secs);
        Ok(QuotaUsage {
            metric,
            used: self.backend.used(tenant, metric, window)?,
            limit: policy.quotas.limit_for(metric),
            window_start: window.start,
            window_end: window.end,
        })
    }

    /// Returns `cost` units charged at `now` for work that did not happen.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger fails.
    #[instrument(skip(self), fields(tenant = %tenant, metric = %metric, cost))]
    pub fn refund_at(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
        now: u64,
    ) -> Result<()> {
        let policy = self.config.policy_for(tenant);
        let window = QuotaWindow::containing(now, policy.window_secs);
        let used = self.backend.refund(tenant, metric, window, cost)?;
        metrics::counter!("quota_refunded_total", "metric" => metric.as_str()).increment(1);
        tracing::debug!(used, "Refunded quota");
        Ok(())
    }

    /// Deletes up to `limit` counters whose window ended before `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger fails.
    pub fn purge_windows(&self, before: u64, limit: usize) -> Result<usize> {
        self.backend.purge_before(before, limit)
    }
}

/// Rejects blank tenant ids; there is no default tenant.
pub(crate) fn require_tenant(tenant: &TenantId) -> Result<()> {
    if tenant.is_blank() {
        return Err(Error::InvalidInput("tenant id must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuotaLimits, TenantPolicy};
    use crate::security::AuditConfig;
    use crate::storage::InMemoryQuotaLedger;

    fn service(limit: u64) -> (QuotaService, Arc<AuditLogger>) {
        let config = HyphanetConfig::default().with_policy_defaults(
            TenantPolicy::default()
                .with_quotas(QuotaLimits::default().with_limit(MetricType::Routes, limit))
                .with_window_secs(60),
        );
        let audit = Arc::new(AuditLogger::with_config(AuditConfig::new(b"k".to_vec())));
        (
            QuotaService::new(
                Arc::new(InMemoryQuotaLedger::new()),
                Arc::clone(&audit),
                Arc::new(config),
            ),
            audit,
        )
    }

    #[test]
    fn test_n_of_n_then_denied_without_side_effect() {
        let (quota, audit) = service(3);
        let tenant = TenantId::new("acme");
        for _ in 0..3 {
            assert!(
                quota
                    .require_at(&tenant, MetricType::Routes, 1, None, 100)
                    .is_ok()
            );
        }
        let err = quota
            .require_at(&tenant, MetricType::Routes, 1, None, 100)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                used: 3,
                limit: 3,
                retry_at: 120,
                ..
            }
        ));
        assert_eq!(
            quota.usage_at(&tenant, MetricType::Routes, 100).unwrap().used,
            3
        );
        assert_eq!(audit.recent_entries(1)[0].event_type, "quota.denied");
    }

    #[test]
    fn test_next_window_resets() {
        let (quota, _) = service(1);
        let tenant = TenantId::new("acme");
        let charge = |now| {
            quota
                .check_and_consume_at(&tenant, MetricType::Routes, 1, None, now)
                .unwrap()
                .is_allowed()
        };
        assert!(charge(59));
        assert!(!charge(59));
        assert!(charge(60));
    }

    #[test]
    fn test_tenants_have_separate_counters() {
        let (quota, _) = service(1);
        for tenant in ["a", "b"] {
            let tenant = TenantId::new(tenant);
            assert!(quota.require_at(&tenant, MetricType::Routes, 1, None, 0).is_ok());
        }
    }

    #[test]
    fn test_blank_tenant_rejected() {
        let (quota, _) = service(1);
        assert!(matches!(
            quota.check_and_consume_at(&TenantId::new(" "), MetricType::Routes, 1, None, 0),
            Err(Error::InvalidInput(_))
        ));
    }
}
