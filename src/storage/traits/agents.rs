//! Agent registry trait.

use crate::Result;
use crate::models::{Agent, AgentId, AgentStatus, TenantId};

/// Trait for agent registries.
///
/// Agents are never hard-deleted; suspension removes them from routing.
pub trait AgentBackend: Send + Sync {
    /// Registers an agent or replaces its profile.
    ///
    /// Metrics and `created_at` of an existing agent are preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_agent(&self, agent: &Agent) -> Result<()>;

    /// Fetches an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> Result<Option<Agent>>;

    /// Fetches several agents; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_agents(&self, tenant: &TenantId, ids: &[AgentId]) -> Result<Vec<Agent>>;

    /// Lists routable agents declaring any of `capabilities`, by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_by_capabilities(
        &self,
        tenant: &TenantId,
        capabilities: &[String],
        limit: usize,
    ) -> Result<Vec<Agent>>;

    /// Sets an agent's status. Returns `false` if the agent is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn set_status(&self, tenant: &TenantId, id: &AgentId, status: AgentStatus) -> Result<bool>;

    /// Folds an outcome into the agent's metrics in one statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn record_outcome(
        &self,
        tenant: &TenantId,
        id: &AgentId,
        score: f32,
        success_threshold: f32,
        now: u64,
    ) -> Result<bool>;

    /// Counts a tenant's agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count(&self, tenant: &TenantId) -> Result<usize>;
}
