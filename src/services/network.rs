//! The network facade.
//!
//! [`HyphaeNetwork`] owns one instance of every service over a shared set of
//! stores and exposes the public operations. Every operation takes the
//! tenant explicitly; there is no default tenant.
//!
//! Methods ending in `_at` take the current time as Unix epoch seconds so
//! that callers and tests can pin the clock. The plain forms use the system
//! clock.

use super::feedback::{OutcomeFeedbackLoop, OutcomeSummary};
use super::graph::GraphService;
use super::lifecycle::{BroadcastResult, HopOutcome, LifecycleDeps, NutrientLifecycleManager};
use super::quota::{QuotaService, require_tenant};
use super::recall::MemoryService;
use super::routing::RoutingPolicyEngine;
use super::sweep::{SweepReport, SweepService};
use crate::config::HyphanetConfig;
use crate::embedding::validate_embedding;
use crate::models::{
    Agent, AgentId, AgentStatus, EdgeStats, MemoryFilter, MemoryHit, MemoryId, MemoryRecord,
    MetricType, Nutrient, NutrientDraft, NutrientId, NutrientState, QuotaDecision, QuotaUsage,
    Route, TenantId, TraceId,
};
use crate::security::AuditLogger;
use crate::storage::{AgentBackend, NetworkStores, NutrientBackend};
use crate::{Error, Result, current_timestamp};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Per-tenant counts reported by [`HyphaeNetwork::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    /// The tenant.
    pub tenant: TenantId,
    /// Registered agents.
    pub agents: usize,
    /// Stored memories.
    pub memories: usize,
    /// Nutrients per lifecycle state.
    pub nutrients: Vec<(NutrientState, u64)>,
    /// Edge statistics.
    pub edges: EdgeStats,
    /// Usage of every quota metric in the current window.
    pub quotas: Vec<QuotaUsage>,
}

/// An agent knowledge-propagation network.
pub struct HyphaeNetwork {
    config: Arc<HyphanetConfig>,
    agents: Arc<dyn AgentBackend>,
    nutrients: Arc<dyn NutrientBackend>,
    audit: Arc<AuditLogger>,
    graph: Arc<GraphService>,
    quota: Arc<QuotaService>,
    memory: Arc<MemoryService>,
    lifecycle: Arc<NutrientLifecycleManager>,
    feedback: OutcomeFeedbackLoop,
    sweeps: Arc<SweepService>,
}

impl HyphaeNetwork {
    /// Opens the network described by `config`.
    ///
    /// Stores live under `data_dir` when it is set, otherwise in private
    /// in-memory `SQLite` databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a store cannot be
    /// opened.
    pub fn open(config: HyphanetConfig) -> Result<Self> {
        config.validate()?;
        let stores = NetworkStores::open(&config)?;
        Ok(Self::with_stores(config, stores))
    }

    /// Opens a network on map-backed stores. Intended for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn in_memory(config: HyphanetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_stores(config, NetworkStores::in_memory()?))
    }

    /// Builds a network over existing stores.
    #[must_use]
    pub fn with_stores(config: HyphanetConfig, stores: NetworkStores) -> Self {
        let audit = Arc::new(AuditLogger::from_settings(&config.audit));
        let config = Arc::new(config);

        let graph = Arc::new(GraphService::new(
            Arc::clone(&stores.graph),
            Arc::clone(&stores.agents),
            Arc::clone(&audit),
            config.graph.clone(),
            config.decay.clone(),
        ));
        let quota = Arc::new(QuotaService::new(
            Arc::clone(&stores.quota),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        let memory = Arc::new(MemoryService::new(
            Arc::clone(&stores.index),
            Arc::clone(&quota),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        let lifecycle = Arc::new(NutrientLifecycleManager::new(LifecycleDeps {
            nutrients: Arc::clone(&stores.nutrients),
            agents: Arc::clone(&stores.agents),
            graph: Arc::clone(&graph),
            routing: Arc::new(RoutingPolicyEngine::new(&config.routing)),
            quota: Arc::clone(&quota),
            audit: Arc::clone(&audit),
            config: Arc::clone(&config),
        }));
        let feedback = OutcomeFeedbackLoop::new(
            Arc::clone(&stores.nutrients),
            Arc::clone(&stores.agents),
            Arc::clone(&graph),
            Arc::clone(&quota),
            Arc::clone(&audit),
            Arc::clone(&config),
        );
        let sweeps = Arc::new(SweepService::new(
            Arc::clone(&lifecycle),
            Arc::clone(&graph),
            Arc::clone(&memory),
            Arc::clone(&quota),
            config.sweep.clone(),
        ));

        Self {
            config,
            agents: stores.agents,
            nutrients: stores.nutrients,
            audit,
            graph,
            quota,
            memory,
            lifecycle,
            feedback,
            sweeps,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HyphanetConfig {
        &self.config
    }

    /// Returns the audit trail.
    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Returns the graph service.
    #[must_use]
    pub fn graph(&self) -> &GraphService {
        &self.graph
    }

    /// Returns the sweep service, for spawning the background loop.
    #[must_use]
    pub fn sweeps(&self) -> Arc<SweepService> {
        Arc::clone(&self.sweeps)
    }

    // Agents

    /// Registers or replaces an agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TenantMismatch`] if the agent belongs to another
    /// tenant, [`Error::InvalidInput`] for a blank id or a profile of the
    /// wrong dimension, or a storage error.
    #[instrument(skip(self, agent), fields(tenant = %tenant, agent = %agent.id))]
    pub fn register_agent(&self, tenant: &TenantId, agent: &Agent) -> Result<()> {
        require_tenant(tenant)?;
        if agent.tenant != *tenant {
            return Err(Error::TenantMismatch {
                expected: tenant.to_string(),
                found: agent.tenant.to_string(),
            });
        }
        if agent.id.is_blank() {
            return Err(Error::InvalidInput("agent id must not be empty".to_string()));
        }
        validate_embedding(
            "profile embedding",
            &agent.profile_embedding,
            self.config.embedding_dimensions,
        )?;
        self.agents.upsert_agent(agent)?;
        metrics::counter!("agents_registered_total").increment(1);
        tracing::debug!("Registered agent");
        Ok(())
    }

    /// Gets an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get_agent(&self, tenant: &TenantId, id: &AgentId) -> Result<Option<Agent>> {
        require_tenant(tenant)?;
        self.agents.get_agent(tenant, id)
    }

    /// Sets an agent's status. Suspended agents receive no routes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AgentNotFound`] if the agent is not registered.
    pub fn set_agent_status(
        &self,
        tenant: &TenantId,
        id: &AgentId,
        status: AgentStatus,
    ) -> Result<()> {
        require_tenant(tenant)?;
        if self.agents.set_status(tenant, id, status)? {
            Ok(())
        } else {
            Err(Error::AgentNotFound {
                tenant: tenant.to_string(),
                agent: id.to_string(),
            })
        }
    }

    // Nutrients

    /// Broadcasts a nutrient from `origin` and routes its first hop.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::broadcast_at`].
    pub fn broadcast(
        &self,
        tenant: &TenantId,
        origin: &AgentId,
        draft: NutrientDraft,
    ) -> Result<BroadcastResult> {
        self.broadcast_at(tenant, origin, draft, current_timestamp())
    }

    /// [`Self::broadcast`] at a given time.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::broadcast_at`].
    pub fn broadcast_at(
        &self,
        tenant: &TenantId,
        origin: &AgentId,
        draft: NutrientDraft,
        now: u64,
    ) -> Result<BroadcastResult> {
        self.lifecycle.broadcast_at(tenant, origin, draft, now)
    }

    /// Routes the next hop of a nutrient.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::propagate_hop_at`].
    pub fn propagate_hop(&self, tenant: &TenantId, id: &NutrientId) -> Result<HopOutcome> {
        self.lifecycle.propagate_hop_at(tenant, id, current_timestamp())
    }

    /// Routes hop `hop` of a nutrient; an already routed hop returns its
    /// recorded routes.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::propagate_specific_hop_at`].
    pub fn propagate_hop_at(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        hop: u32,
    ) -> Result<HopOutcome> {
        self.lifecycle
            .propagate_specific_hop_at(tenant, id, hop, current_timestamp())
    }

    /// [`Self::propagate_hop_at`] at a given time.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::propagate_specific_hop_at`].
    pub fn propagate_specific_hop_at(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        hop: u32,
        now: u64,
    ) -> Result<HopOutcome> {
        self.lifecycle.propagate_specific_hop_at(tenant, id, hop, now)
    }

    /// Routes the next hop of a nutrient at a given time.
    ///
    /// # Errors
    ///
    /// See [`NutrientLifecycleManager::propagate_hop_at`].
    pub fn propagate_next_at(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        now: u64,
    ) -> Result<HopOutcome> {
        self.lifecycle.propagate_hop_at(tenant, id, now)
    }

    /// Gets a nutrient.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get_nutrient(&self, tenant: &TenantId, id: &NutrientId) -> Result<Option<Nutrient>> {
        self.lifecycle.get_nutrient(tenant, id)
    }

    /// Lists the routes recorded under a trace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn routes_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Result<Vec<Route>> {
        self.lifecycle.routes_for_trace(tenant, trace)
    }

    // Outcomes

    /// Records the outcome of a trace and reinforces its edges.
    ///
    /// # Errors
    ///
    /// See [`OutcomeFeedbackLoop::record_outcome_at`].
    pub fn record_outcome(
        &self,
        tenant: &TenantId,
        trace: &TraceId,
        score: f32,
    ) -> Result<OutcomeSummary> {
        self.record_outcome_at(tenant, trace, score, current_timestamp())
    }

    /// [`Self::record_outcome`] at a given time.
    ///
    /// # Errors
    ///
    /// See [`OutcomeFeedbackLoop::record_outcome_at`].
    pub fn record_outcome_at(
        &self,
        tenant: &TenantId,
        trace: &TraceId,
        score: f32,
        now: u64,
    ) -> Result<OutcomeSummary> {
        self.feedback.record_outcome_at(tenant, trace, score, now)
    }

    // Memory

    /// Stores a memory record.
    ///
    /// # Errors
    ///
    /// See [`MemoryService::store_at`].
    pub fn store_memory(&self, tenant: &TenantId, record: MemoryRecord) -> Result<MemoryId> {
        self.memory.store_at(tenant, record, current_timestamp())
    }

    /// [`Self::store_memory`] at a given time.
    ///
    /// # Errors
    ///
    /// See [`MemoryService::store_at`].
    pub fn store_memory_at(
        &self,
        tenant: &TenantId,
        record: MemoryRecord,
        now: u64,
    ) -> Result<MemoryId> {
        self.memory.store_at(tenant, record, now)
    }

    /// Searches a tenant's memories.
    ///
    /// # Errors
    ///
    /// See [`MemoryService::search_at`].
    pub fn search_memory(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        min_quality: f32,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryHit>> {
        self.memory
            .search_at(tenant, embedding, top_k, min_quality, filter, current_timestamp())
    }

    /// [`Self::search_memory`] at a given time.
    ///
    /// # Errors
    ///
    /// See [`MemoryService::search_at`].
    pub fn search_memory_at(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        top_k: usize,
        min_quality: f32,
        filter: &MemoryFilter,
        now: u64,
    ) -> Result<Vec<MemoryHit>> {
        self.memory
            .search_at(tenant, embedding, top_k, min_quality, filter, now)
    }

    /// Re-scores a memory's quality.
    ///
    /// # Errors
    ///
    /// See [`MemoryService::rescore_quality`].
    pub fn rescore_memory(&self, tenant: &TenantId, id: &MemoryId, quality: f32) -> Result<()> {
        self.memory.rescore_quality(tenant, id, quality)
    }

    // Quotas

    /// Checks and charges `cost` units of `metric`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    pub fn check_quota(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
    ) -> Result<QuotaDecision> {
        self.quota.check_and_consume(tenant, metric, cost)
    }

    /// [`Self::check_quota`] at a given time.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    pub fn check_quota_at(
        &self,
        tenant: &TenantId,
        metric: MetricType,
        cost: u64,
        now: u64,
    ) -> Result<QuotaDecision> {
        self.quota
            .check_and_consume_at(tenant, metric, cost, None, now)
    }

    /// Returns usage of `metric` in the current window.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the ledger fails.
    pub fn usage(&self, tenant: &TenantId, metric: MetricType) -> Result<QuotaUsage> {
        self.quota.usage_at(tenant, metric, current_timestamp())
    }

    // Maintenance

    /// Runs one sweep now.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub fn run_sweeps(&self) -> Result<SweepReport> {
        self.sweeps.run_once()
    }

    /// Runs one sweep as of `now`.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub fn run_sweeps_at(&self, now: u64) -> Result<SweepReport> {
        self.sweeps.run_once_at(now)
    }

    /// Collects per-tenant counts.
    ///
    /// # Errors
    ///
    /// Returns an error if a store query fails.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub fn stats(&self, tenant: &TenantId) -> Result<NetworkStats> {
        require_tenant(tenant)?;
        let now = current_timestamp();
        let quotas = MetricType::all()
            .iter()
            .map(|&metric| self.quota.usage_at(tenant, metric, now))
            .collect::<Result<Vec<_>>>()?;
        Ok(NetworkStats {
            tenant: tenant.clone(),
            agents: self.agents.count(tenant)?,
            memories: self.memory.count(tenant)?,
            nutrients: self.nutrients.count_by_state(tenant)?,
            edges: self.graph.stats(tenant)?,
            quotas,
        })
    }
}
