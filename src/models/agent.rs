//! Agent profiles.

use super::{AgentId, Sensitivity, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Availability of an agent for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Receiving nutrients.
    #[default]
    Active,
    /// Registered but quiet; still routable.
    Idle,
    /// Never routed to.
    Suspended,
}

impl AgentStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Suspended => "suspended",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Returns `true` if the agent may receive routes.
    #[must_use]
    pub const fn is_routable(&self) -> bool {
        !matches!(self, Self::Suspended)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling outcome statistics for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Outcomes at or above the success threshold.
    pub success_count: u64,
    /// All outcomes attributed to the agent.
    pub outcome_count: u64,
    /// Running mean of outcome scores.
    pub avg_outcome: f32,
    /// Last time an outcome or route touched the agent.
    pub last_active: Option<u64>,
}

impl AgentMetrics {
    /// Folds an outcome score into the running statistics.
    pub fn record(&mut self, score: f32, success_threshold: f32, now: u64) {
        self.outcome_count += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.outcome_count as f32;
        self.avg_outcome += (score - self.avg_outcome) / n;
        if score >= success_threshold {
            self.success_count += 1;
        }
        self.last_active = Some(now);
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Agent id, unique per tenant.
    pub id: AgentId,
    /// Declared capability tags.
    pub capabilities: BTreeSet<String>,
    /// Tool tags.
    pub tools: BTreeSet<String>,
    /// Profile embedding.
    pub profile_embedding: Vec<f32>,
    /// Highest sensitivity the agent may receive.
    pub clearance: Sensitivity,
    /// Routing availability.
    pub status: AgentStatus,
    /// Outcome statistics.
    pub metrics: AgentMetrics,
    /// Registration timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Agent {
    /// Creates an active agent with `Internal` clearance.
    #[must_use]
    pub fn new(tenant: TenantId, id: AgentId, profile_embedding: Vec<f32>) -> Self {
        Self {
            tenant,
            id,
            capabilities: BTreeSet::new(),
            tools: BTreeSet::new(),
            profile_embedding,
            clearance: Sensitivity::Internal,
            status: AgentStatus::Active,
            metrics: AgentMetrics::default(),
            created_at: crate::current_timestamp(),
        }
    }

    /// Sets the capability tags.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the tool tags.
    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the clearance.
    #[must_use]
    pub const fn with_clearance(mut self, clearance: Sensitivity) -> Self {
        self.clearance = clearance;
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the registration timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns `true` if the agent may receive content at `sensitivity`.
    #[must_use]
    pub fn is_cleared_for(&self, sensitivity: Sensitivity) -> bool {
        self.clearance >= sensitivity
    }

    /// Iterates over capability and tool tags together.
    pub fn tags(&self) -> impl Iterator<Item = &str> + Clone {
        self.capabilities
            .iter()
            .chain(self.tools.iter())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_running_mean() {
        let mut metrics = AgentMetrics::default();
        metrics.record(1.0, 0.5, 10);
        metrics.record(0.0, 0.5, 20);
        metrics.record(0.5, 0.5, 30);
        assert_eq!(metrics.outcome_count, 3);
        assert_eq!(metrics.success_count, 2);
        assert!((metrics.avg_outcome - 0.5).abs() < 1e-6);
        assert_eq!(metrics.last_active, Some(30));
    }

    #[test]
    fn test_clearance() {
        let agent = Agent::new("t".into(), "a".into(), vec![1.0])
            .with_clearance(Sensitivity::Confidential);
        assert!(agent.is_cleared_for(Sensitivity::Public));
        assert!(agent.is_cleared_for(Sensitivity::Confidential));
        assert!(!agent.is_cleared_for(Sensitivity::Secret));
    }

    #[test]
    fn test_status_routable() {
        assert!(AgentStatus::Active.is_routable());
        assert!(AgentStatus::Idle.is_routable());
        assert!(!AgentStatus::Suspended.is_routable());
        assert_eq!(AgentStatus::parse("Idle"), Some(AgentStatus::Idle));
    }

    #[test]
    fn test_tags_chain_capabilities_and_tools() {
        let agent = Agent::new("t".into(), "a".into(), vec![])
            .with_capabilities(["sql"])
            .with_tools(["psql"]);
        let tags: Vec<_> = agent.tags().collect();
        assert_eq!(tags, vec!["sql", "psql"]);
    }
}
