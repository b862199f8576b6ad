//! Per-tenant policy.
//!
//! Tenants differ only in data: every tenant runs the same code paths with its
//! own [`TenantPolicy`]. Unlisted tenants inherit `[policy_defaults]`.

use crate::models::MetricType;
use serde::{Deserialize, Serialize};

/// Per-window limits for each metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    /// Routing quota units per window.
    pub routes: u64,
    /// Memory stores per window.
    pub memory_writes: u64,
    /// Memory searches per window.
    pub searches: u64,
    /// Outcomes per window.
    pub outcomes: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            routes: 1_000,
            memory_writes: 5_000,
            searches: 10_000,
            outcomes: 1_000,
        }
    }
}

impl QuotaLimits {
    /// Returns the limit for a metric.
    #[must_use]
    pub const fn limit_for(&self, metric: MetricType) -> u64 {
        match metric {
            MetricType::Routes => self.routes,
            MetricType::MemoryWrites => self.memory_writes,
            MetricType::Searches => self.searches,
            MetricType::Outcomes => self.outcomes,
        }
    }

    /// Sets the limit for a metric.
    #[must_use]
    pub const fn with_limit(mut self, metric: MetricType, limit: u64) -> Self {
        match metric {
            MetricType::Routes => self.routes = limit,
            MetricType::MemoryWrites => self.memory_writes = limit,
            MetricType::Searches => self.searches = limit,
            MetricType::Outcomes => self.outcomes = limit,
        }
        self
    }
}

/// Limits and defaults applied to one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPolicy {
    /// Quota limits per window.
    pub quotas: QuotaLimits,
    /// Quota window length in seconds.
    pub window_secs: u64,
    /// Hop budget when a broadcast does not set one.
    pub default_max_hops: u32,
    /// Largest hop budget a broadcast may request.
    pub hop_ceiling: u32,
    /// TTL when a broadcast does not set one.
    pub default_ttl_secs: u64,
    /// Largest TTL a broadcast may request.
    pub max_ttl_secs: u64,
    /// Quota units charged per routing pass when a broadcast does not set one.
    pub default_quota_cost: u64,
    /// Fan-out override for this tenant.
    pub fan_out: Option<usize>,
    /// Exploration rate override for this tenant.
    pub epsilon: Option<f64>,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            quotas: QuotaLimits::default(),
            window_secs: 60,
            default_max_hops: 3,
            hop_ceiling: 8,
            default_ttl_secs: 3_600,
            max_ttl_secs: 86_400,
            default_quota_cost: 1,
            fan_out: None,
            epsilon: None,
        }
    }
}

impl TenantPolicy {
    /// Sets the quota limits.
    #[must_use]
    pub const fn with_quotas(mut self, quotas: QuotaLimits) -> Self {
        self.quotas = quotas;
        self
    }

    /// Sets the quota window length.
    #[must_use]
    pub const fn with_window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// Sets the default hop budget.
    #[must_use]
    pub const fn with_default_max_hops(mut self, hops: u32) -> Self {
        self.default_max_hops = hops;
        self
    }

    /// Sets the TTL ceiling.
    #[must_use]
    pub const fn with_max_ttl_secs(mut self, ttl: u64) -> Self {
        self.max_ttl_secs = ttl;
        self
    }

    /// Sets the fan-out override.
    #[must_use]
    pub const fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = Some(fan_out);
        self
    }

    /// Sets the exploration rate override.
    #[must_use]
    pub const fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }
}

/// `[tenants.<id>]` section: every field overrides `[policy_defaults]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFileTenantPolicy {
    /// Routing quota units per window.
    pub routes_limit: Option<u64>,
    /// Memory stores per window.
    pub memory_writes_limit: Option<u64>,
    /// Searches per window.
    pub searches_limit: Option<u64>,
    /// Outcomes per window.
    pub outcomes_limit: Option<u64>,
    /// Quota window length.
    pub window_secs: Option<u64>,
    /// Default hop budget.
    pub default_max_hops: Option<u32>,
    /// Hop ceiling.
    pub hop_ceiling: Option<u32>,
    /// Default TTL.
    pub default_ttl_secs: Option<u64>,
    /// TTL ceiling.
    pub max_ttl_secs: Option<u64>,
    /// Default quota cost.
    pub default_quota_cost: Option<u64>,
    /// Fan-out override.
    pub fan_out: Option<usize>,
    /// Exploration rate override.
    pub epsilon: Option<f64>,
}

impl ConfigFileTenantPolicy {
    /// Applies the overrides on top of `base`.
    #[must_use]
    pub fn apply(&self, base: &TenantPolicy) -> TenantPolicy {
        let mut policy = base.clone();
        if let Some(v) = self.routes_limit {
            policy.quotas.routes = v;
        }
        if let Some(v) = self.memory_writes_limit {
            policy.quotas.memory_writes = v;
        }
        if let Some(v) = self.searches_limit {
            policy.quotas.searches = v;
        }
        if let Some(v) = self.outcomes_limit {
            policy.quotas.outcomes = v;
        }
        if let Some(v) = self.window_secs {
            policy.window_secs = v.max(1);
        }
        if let Some(v) = self.default_max_hops {
            policy.default_max_hops = v;
        }
        if let Some(v) = self.hop_ceiling {
            policy.hop_ceiling = v;
        }
        if let Some(v) = self.default_ttl_secs {
            policy.default_ttl_secs = v;
        }
        if let Some(v) = self.max_ttl_secs {
            policy.max_ttl_secs = v;
        }
        if let Some(v) = self.default_quota_cost {
            policy.default_quota_cost = v;
        }
        if self.fan_out.is_some() {
            policy.fan_out = self.fan_out;
        }
        if let Some(v) = self.epsilon {
            policy.epsilon = Some(v.clamp(0.0, 1.0));
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_for_each_metric() {
        let limits = QuotaLimits::default().with_limit(MetricType::Searches, 7);
        assert_eq!(limits.limit_for(MetricType::Searches), 7);
        assert_eq!(limits.limit_for(MetricType::Routes), 1_000);
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let base = TenantPolicy::default();
        let overrides = ConfigFileTenantPolicy {
            routes_limit: Some(5),
            epsilon: Some(3.0),
            window_secs: Some(0),
            ..ConfigFileTenantPolicy::default()
        };
        let policy = overrides.apply(&base);
        assert_eq!(policy.quotas.routes, 5);
        assert_eq!(policy.quotas.searches, base.quotas.searches);
        assert_eq!(policy.epsilon, Some(1.0));
        assert_eq!(policy.window_secs, 1);
        assert_eq!(policy.default_max_hops, base.default_max_hops);
    }
}
