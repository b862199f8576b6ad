//! Nutrient lifecycle.
//!
//! The manager is the only writer of a nutrient's `current_hop`. A broadcast
//! persists the nutrient at hop 0 and runs the hop-1 routing pass; each
//! further pass routes from the previous hop's destinations.
//!
//! A pass is committed atomically in the store: its routes are inserted and
//! the hop advanced only if the hop still equals `hop - 1`. A caller that
//! loses the race gets the winner's routes, so re-propagating a hop always
//! returns the same set.

use super::graph::GraphService;
use super::quota::{QuotaService, require_tenant};
use super::routing::{Candidate, RoutingPolicyEngine, RoutingRequest};
use crate::config::HyphanetConfig;
use crate::embedding::validate_embedding;
use crate::models::{
    Agent, AgentId, EventMeta, MetricType, NetworkEvent, Nutrient, NutrientDraft, NutrientId,
    NutrientState, Route, RouteId, TenantId, TerminalReason, TraceId,
};
use crate::security::AuditLogger;
use crate::storage::{AgentBackend, HopCommit, HopCommitResult, NutrientBackend};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// Result of a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastResult {
    /// The new nutrient.
    pub nutrient_id: NutrientId,
    /// Trace linking the nutrient, its routes and their outcomes.
    pub trace_id: TraceId,
    /// Hop-1 routes.
    pub routes: Vec<Route>,
}

/// Result of a propagation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum HopOutcome {
    /// The hop is routed; these are its routes (possibly none).
    Routed {
        /// Routes of the hop.
        routes: Vec<Route>,
    },
    /// The nutrient stopped propagating.
    Terminal {
        /// Why it stopped.
        reason: TerminalReason,
    },
}

impl HopOutcome {
    /// Returns the routes of a routed hop.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        match self {
            Self::Routed { routes } => routes,
            Self::Terminal { .. } => &[],
        }
    }

    /// Returns `true` for a terminal outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Shared handles the manager works with.
pub struct LifecycleDeps {
    /// Nutrient and route store.
    pub nutrients: Arc<dyn NutrientBackend>,
    /// Agent registry.
    pub agents: Arc<dyn AgentBackend>,
    /// Graph service.
    pub graph: Arc<GraphService>,
    /// Routing engine.
    pub routing: Arc<RoutingPolicyEngine>,
    /// Quota service.
    pub quota: Arc<QuotaService>,
    /// Audit trail.
    pub audit: Arc<AuditLogger>,
    /// Configuration.
    pub config: Arc<HyphanetConfig>,
}

/// Drives nutrients through `Created → Propagating → Expired | Exhausted`.
pub struct NutrientLifecycleManager {
    nutrients: Arc<dyn NutrientBackend>,
    agents: Arc<dyn AgentBackend>,
    graph: Arc<GraphService>,
    routing: Arc<RoutingPolicyEngine>,
    quota: Arc<QuotaService>,
    audit: Arc<AuditLogger>,
    config: Arc<HyphanetConfig>,
}

impl NutrientLifecycleManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(deps: LifecycleDeps) -> Self {
        Self {
            nutrients: deps.nutrients,
            agents: deps.agents,
            graph: deps.graph,
            routing: deps.routing,
            quota: deps.quota,
            audit: deps.audit,
            config: deps.config,
        }
    }

    /// Broadcasts a nutrient from `origin` and routes hop 1.
    ///
    /// Validation, the origin lookup and the quota charge all happen before
    /// anything is written.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTtl`] for a TTL of zero or above the tenant ceiling
    /// - [`Error::InvalidInput`] for a bad embedding, hop budget or cost, or
    ///   a sensitivity above the origin's clearance
    /// - [`Error::AgentNotFound`] if `origin` is not registered
    /// - [`Error::QuotaExceeded`] if the tenant's routes quota is exhausted
    #[instrument(skip(self, draft), fields(tenant = %tenant, origin = %origin))]
    pub fn broadcast_at(
        &self,
        tenant: &TenantId,
        origin: &AgentId,
        draft: NutrientDraft,
        now: u64,
    ) -> Result<BroadcastResult> {
        let nutrient = self.build_nutrient(tenant, origin, draft, now)?;

        let origin_agent = self
            .agents
            .get_agent(tenant, origin)?
            .ok_or_else(|| Error::AgentNotFound {
                tenant: tenant.to_string(),
                agent: origin.to_string(),
            })?;
        if !origin_agent.status.is_routable() {
            return Err(Error::InvalidInput(format!(
                "agent '{origin}' is suspended and cannot broadcast"
            )));
        }
        if !origin_agent.is_cleared_for(nutrient.sensitivity) {
            return Err(Error::InvalidInput(format!(
                "agent '{origin}' is not cleared for {} content",
                nutrient.sensitivity
            )));
        }

        self.quota.require_at(
            tenant,
            MetricType::Routes,
            nutrient.quota_cost,
            Some(&nutrient.trace_id),
            now,
        )?;

        self.nutrients.insert_nutrient(&nutrient)?;
        self.audit.record(&NetworkEvent::NutrientCreated {
            meta: event_meta(&nutrient, now),
            nutrient_id: nutrient.id.clone(),
            origin: origin.clone(),
        });
        metrics::counter!("nutrients_created_total").increment(1);
        tracing::info!(
            nutrient_id = %nutrient.id,
            trace_id = %nutrient.trace_id,
            max_hops = nutrient.max_hops,
            "Broadcast nutrient"
        );

        let routes = match self.route_pass(&nutrient, 1, &[origin_agent], now)? {
            HopOutcome::Routed { routes } => routes,
            HopOutcome::Terminal { .. } => Vec::new(),
        };
        Ok(BroadcastResult {
            nutrient_id: nutrient.id,
            trace_id: nutrient.trace_id,
            routes,
        })
    }

    /// Routes the next hop of a nutrient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown nutrient,
    /// [`Error::QuotaExceeded`] if the tenant's routes quota is exhausted, or
    /// a storage error.
    pub fn propagate_hop_at(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        now: u64,
    ) -> Result<HopOutcome> {
        let nutrient = self.load(tenant, id)?;
        self.propagate_specific_hop_at(tenant, id, nutrient.current_hop + 1, now)
    }

    /// Routes hop `hop` of a nutrient, idempotently.
    ///
    /// An already recorded hop returns its routes unchanged. A hop whose
    /// predecessor is not recorded yet is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for hop 0, [`Error::NotFound`] for an
    /// unknown nutrient, [`Error::OutOfOrder`] when skipping ahead,
    /// [`Error::QuotaExceeded`], or a storage error.
    #[instrument(skip(self), fields(tenant = %tenant, nutrient_id = %id, hop))]
    pub fn propagate_specific_hop_at(
        &self,
        tenant: &TenantId,
        id: &NutrientId,
        hop: u32,
        now: u64,
    ) -> Result<HopOutcome> {
        require_tenant(tenant)?;
        if hop == 0 {
            return Err(Error::InvalidInput("hop numbers start at 1".to_string()));
        }
        let nutrient = self.load(tenant, id)?;

        if hop <= nutrient.current_hop {
            return Ok(HopOutcome::Routed {
                routes: self.nutrients.routes_for_hop(tenant, id, hop)?,
            });
        }
        if let Some(reason) = nutrient.state.terminal_reason() {
            return Ok(HopOutcome::Terminal { reason });
        }
        if hop > nutrient.current_hop + 1 {
            return Err(Error::OutOfOrder {
                nutrient: id.to_string(),
                requested: hop,
                current: nutrient.current_hop,
            });
        }
        if nutrient.is_exhausted() {
            return self.terminate(&nutrient, TerminalReason::Exhausted, now);
        }
        if nutrient.is_expired_at(now) {
            return self.terminate(&nutrient, TerminalReason::Expired, now);
        }

        self.quota.require_at(
            tenant,
            MetricType::Routes,
            nutrient.quota_cost,
            Some(&nutrient.trace_id),
            now,
        )?;

        let sources = self.hop_sources(&nutrient, hop)?;
        self.route_pass(&nutrient, hop, &sources, now)
    }

    /// Marks up to `limit` overdue nutrients `Expired`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub fn expire_due(&self, now: u64, limit: usize) -> Result<usize> {
        let mut expired = 0;
        for nutrient in self.nutrients.list_due(now, limit)? {
            if self.nutrients.transition_state(
                &nutrient.tenant,
                &nutrient.id,
                nutrient.state,
                NutrientState::Expired,
            )? {
                self.audit_terminated(&nutrient, TerminalReason::Expired, now);
                expired += 1;
            }
        }
        if expired > 0 {
            metrics::counter!("nutrients_expired_total").increment(expired as u64);
            tracing::info!(expired, "Expired overdue nutrients");
        }
        Ok(expired)
    }

    /// Gets a nutrient within `tenant`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get_nutrient(&self, tenant: &TenantId, id: &NutrientId) -> Result<Option<Nutrient>> {
        require_tenant(tenant)?;
        self.nutrients.get_nutrient(tenant, id)
    }

    /// Lists every route recorded under a trace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn routes_for_trace(&self, tenant: &TenantId, trace: &TraceId) -> Result<Vec<Route>> {
        require_tenant(tenant)?;
        self.nutrients.routes_for_trace(tenant, trace)
    }

    fn build_nutrient(
        &self,
        tenant: &TenantId,
        origin: &AgentId,
        draft: NutrientDraft,
        now: u64,
    ) -> Result<Nutrient> {
        require_tenant(tenant)?;
        if origin.is_blank() {
            return Err(Error::InvalidInput("origin agent must not be empty".to_string()));
        }
        if draft.summary.trim().is_empty() {
            return Err(Error::InvalidInput("summary must not be empty".to_string()));
        }
        validate_embedding(
            "nutrient embedding",
            &draft.embedding,
            self.config.embedding_dimensions,
        )?;

        let policy = self.config.policy_for(tenant);
        let ttl_secs = draft.ttl_secs.unwrap_or(policy.default_ttl_secs);
        if ttl_secs == 0 || ttl_secs > policy.max_ttl_secs {
            return Err(Error::InvalidTtl {
                ttl_secs,
                max_ttl_secs: policy.max_ttl_secs,
            });
        }
        let max_hops = draft.max_hops.unwrap_or(policy.default_max_hops);
        if max_hops == 0 || max_hops > policy.hop_ceiling {
            return Err(Error::InvalidInput(format!(
                "max_hops must be within 1..={}, got {max_hops}",
                policy.hop_ceiling
            )));
        }
        let quota_cost = draft.quota_cost.unwrap_or(policy.default_quota_cost);
        if quota_cost == 0 {
            return Err(Error::InvalidInput("quota_cost must be positive".to_string()));
        }

        Ok(Nutrient {
            id: NutrientId::generate(),
            tenant: tenant.clone(),
            trace_id: draft.trace_id.unwrap_or_else(TraceId::generate),
            origin: origin.clone(),
            summary: draft.summary,
            embedding: draft.embedding,
            snippets: draft.snippets,
            tool_hints: draft.tool_hints,
            required_capabilities: draft.required_capabilities,
            sensitivity: draft.sensitivity,
            current_hop: 0,
            max_hops,
            ttl_secs,
            quota_cost,
            created_at: now,
            expires_at: now.saturating_add(ttl_secs),
            state: NutrientState::Created,
        })
    }

    fn load(&self, tenant: &TenantId, id: &NutrientId) -> Result<Nutrient> {
        self.nutrients
            .get_nutrient(tenant, id)?
            .ok_or_else(|| Error::NotFound {
                kind: "nutrient",
                id: id.to_string(),
            })
    }

    /// Senders of hop `hop`: the origin for hop 1, otherwise the previous
    /// hop's destinations in route order.
    fn hop_sources(&self, nutrient: &Nutrient, hop: u32) -> Result<Vec<Agent>> {
        let ids: Vec<AgentId> = if hop == 1 {
            vec![nutrient.origin.clone()]
        } else {
            let mut seen = HashSet::new();
            self.nutrients
                .routes_for_hop(&nutrient.tenant, &nutrient.id, hop - 1)?
                .into_iter()
                .map(|r| r.destination)
                .filter(|d| seen.insert(d.clone()))
                .collect()
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<AgentId, Agent> = self
            .agents
            .get_agents(&nutrient.tenant, &ids)?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Outgoing edges of `source` joined with cold-start capability matches.
    fn candidates(&self, nutrient: &Nutrient, source: &Agent) -> Result<Vec<Candidate>> {
        let edges = self.graph.neighbors(&nutrient.tenant, &source.id)?;
        let mut ids: Vec<AgentId> = edges.iter().map(|e| e.key.destination.clone()).collect();

        let cold_start = if nutrient.required_capabilities.is_empty() {
            Vec::new()
        } else {
            self.agents.find_by_capabilities(
                &nutrient.tenant,
                &nutrient.required_capabilities,
                self.config.routing.cold_start_limit,
            )?
        };

        let mut profiles: HashMap<AgentId, Agent> = HashMap::new();
        if !ids.is_empty() {
            ids.sort();
            ids.dedup();
            for agent in self.agents.get_agents(&nutrient.tenant, &ids)? {
                profiles.insert(agent.id.clone(), agent);
            }
        }

        let mut candidates: Vec<Candidate> = edges
            .into_iter()
            .filter_map(|edge| {
                profiles
                    .get(&edge.key.destination)
                    .cloned()
                    .map(|agent| Candidate {
                        agent,
                        edge: Some(edge),
                    })
            })
            .collect();
        let linked: HashSet<AgentId> = candidates.iter().map(|c| c.agent.id.clone()).collect();
        candidates.extend(
            cold_start
                .into_iter()
                .filter(|a| !linked.contains(&a.id))
                .map(|agent| Candidate { agent, edge: None }),
        );
        Ok(candidates)
    }

    /// Selects, commits and audits the routes of one hop.
    fn route_pass(
        &self,
        nutrient: &Nutrient,
        hop: u32,
        sources: &[Agent],
        now: u64,
    ) -> Result<HopOutcome> {
        let policy = self.config.policy_for(&nutrient.tenant);
        let fan_out = policy.fan_out.unwrap_or(self.config.routing.fan_out);
        let epsilon = policy.epsilon.unwrap_or(self.config.routing.epsilon);
        let explore = self.routing.explore(epsilon);

        let mut excluded: HashSet<AgentId> = self
            .nutrients
            .visited_agents(&nutrient.tenant, &nutrient.id)?
            .into_iter()
            .collect();
        excluded.insert(nutrient.origin.clone());

        let mut routes = Vec::new();
        let mut destinations: HashMap<AgentId, Agent> = HashMap::new();
        for source in sources {
            let candidates = self.candidates(nutrient, source)?;
            let picks = self.routing.select(&RoutingRequest {
                nutrient,
                source: &source.id,
                candidates: &candidates,
                excluded: &excluded,
                fan_out,
                explore,
            });
            for pick in picks {
                excluded.insert(pick.destination.clone());
                if let Some(c) = candidates.iter().find(|c| c.agent.id == pick.destination) {
                    destinations.insert(pick.destination.clone(), c.agent.clone());
                }
                routes.push(Route {
                    id: RouteId::generate(),
                    tenant: nutrient.tenant.clone(),
                    nutrient_id: nutrient.id.clone(),
                    trace_id: nutrient.trace_id.clone(),
                    source: pick.source,
                    destination: pick.destination,
                    hop,
                    score: pick.score,
                    explored: pick.explored,
                    created_at: now,
                    outcome_score: None,
                });
            }
        }

        let next_state = if hop >= nutrient.max_hops {
            NutrientState::Exhausted
        } else {
            NutrientState::Propagating
        };
        let commit = HopCommit {
            tenant: &nutrient.tenant,
            nutrient_id: &nutrient.id,
            hop,
            routes: &routes,
            next_state,
        };
        metrics::counter!("routing_passes_total").increment(1);

        match self.nutrients.commit_hop(&commit)? {
            HopCommitResult::Committed => {},
            HopCommitResult::Superseded(winner) => {
                tracing::debug!(hop, "Hop already committed by a concurrent pass");
                self.quota.refund_at(
                    &nutrient.tenant,
                    MetricType::Routes,
                    nutrient.quota_cost,
                    now,
                )?;
                if !winner.is_empty() {
                    return Ok(HopOutcome::Routed { routes: winner });
                }
                let current = self.load(&nutrient.tenant, &nutrient.id)?;
                if current.current_hop >= hop {
                    return Ok(HopOutcome::Routed { routes: winner });
                }
                return Ok(current.state.terminal_reason().map_or(
                    HopOutcome::Routed { routes: winner },
                    |reason| HopOutcome::Terminal { reason },
                ));
            },
        }

        let by_id: HashMap<&AgentId, &Agent> = sources.iter().map(|a| (&a.id, a)).collect();
        for route in &routes {
            if let (Some(src), Some(dst)) =
                (by_id.get(&route.source), destinations.get(&route.destination))
            {
                self.graph.touch_edge(src, dst, now)?;
            }
            self.audit.record(&NetworkEvent::RouteCreated {
                meta: event_meta(nutrient, now),
                nutrient_id: nutrient.id.clone(),
                source: route.source.clone(),
                destination: route.destination.clone(),
                hop,
                score: route.score,
                explored: route.explored,
            });
        }
        metrics::counter!("routes_created_total").increment(routes.len() as u64);
        if next_state == NutrientState::Exhausted {
            self.audit_terminated(nutrient, TerminalReason::Exhausted, now);
        }
        tracing::info!(
            nutrient_id = %nutrient.id,
            hop,
            routes = routes.len(),
            explore,
            state = %next_state,
            "Committed routing pass"
        );
        Ok(HopOutcome::Routed { routes })
    }

    fn terminate(
        &self,
        nutrient: &Nutrient,
        reason: TerminalReason,
        now: u64,
    ) -> Result<HopOutcome> {
        let next = NutrientState::from(reason);
        nutrient.state.transition(next)?;
        if self
            .nutrients
            .transition_state(&nutrient.tenant, &nutrient.id, nutrient.state, next)?
        {
            self.audit_terminated(nutrient, reason, now);
            return Ok(HopOutcome::Terminal { reason });
        }
        let current = self.load(&nutrient.tenant, &nutrient.id)?;
        Ok(HopOutcome::Terminal {
            reason: current.state.terminal_reason().unwrap_or(reason),
        })
    }

    fn audit_terminated(&self, nutrient: &Nutrient, reason: TerminalReason, now: u64) {
        self.audit.record(&NetworkEvent::NutrientTerminated {
            meta: event_meta(nutrient, now),
            nutrient_id: nutrient.id.clone(),
            reason,
            hop: nutrient.current_hop,
        });
    }
}

fn event_meta(nutrient: &Nutrient, now: u64) -> EventMeta {
    EventMeta::with_timestamp(
        "lifecycle",
        nutrient.tenant.clone(),
        Some(nutrient.trace_id.clone()),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, RoutingConfig, TenantPolicy};
    use crate::models::AgentStatus;
    use crate::security::AuditConfig;
    use crate::storage::NetworkStores;

    struct Harness {
        manager: NutrientLifecycleManager,
        agents: Arc<dyn AgentBackend>,
        audit: Arc<AuditLogger>,
    }

    fn harness(policy: TenantPolicy) -> Harness {
        let config = Arc::new(
            HyphanetConfig::default()
                .with_embedding_dimensions(2)
                .with_routing(
                    RoutingConfig::default()
                        .with_fan_out(3)
                        .with_epsilon(0.0)
                        .with_seed(7),
                )
                .with_policy_defaults(policy),
        );
        let stores = NetworkStores::in_memory().unwrap();
        let audit = Arc::new(AuditLogger::with_config(AuditConfig::new(b"k".to_vec())));
        let graph = Arc::new(GraphService::new(
            Arc::clone(&stores.graph),
            Arc::clone(&stores.agents),
            Arc::clone(&audit),
            GraphConfig::default(),
            config.decay.clone(),
        ));
        let quota = Arc::new(QuotaService::new(
            Arc::clone(&stores.quota),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        let manager = NutrientLifecycleManager::new(LifecycleDeps {
            nutrients: Arc::clone(&stores.nutrients),
            agents: Arc::clone(&stores.agents),
            graph,
            routing: Arc::new(RoutingPolicyEngine::new(&config.routing)),
            quota,
            audit: Arc::clone(&audit),
            config,
        });
        Harness {
            manager,
            agents: stores.agents,
            audit,
        }
    }

    fn register(h: &Harness, id: &str, caps: &[&str]) {
        h.agents
            .upsert_agent(
                &Agent::new(TenantId::new("acme"), AgentId::new(id), vec![1.0, 0.0])
                    .with_capabilities(caps.iter().copied()),
            )
            .unwrap();
    }

    fn draft() -> NutrientDraft {
        NutrientDraft::new("parser fix", vec![1.0, 0.0]).with_required_capabilities(["rust"])
    }

    #[test]
    fn test_broadcast_routes_cold_start_and_propagates() {
        let h = harness(TenantPolicy::default().with_default_max_hops(2));
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        register(&h, "b", &["rust"]);
        register(&h, "c", &["rust"]);

        let result = h
            .manager
            .broadcast_at(&tenant, &AgentId::new("origin"), draft(), 100)
            .unwrap();
        let mut hop1: Vec<_> = result.routes.iter().map(|r| r.destination.as_str()).collect();
        hop1.sort_unstable();
        assert_eq!(hop1, vec!["b", "c"]);
        assert!(result.routes.iter().all(|r| r.hop == 1));

        // Every capable agent is visited already, so hop 2 routes nowhere and
        // exhausts the budget.
        let hop2 = h
            .manager
            .propagate_hop_at(&tenant, &result.nutrient_id, 101)
            .unwrap();
        assert!(hop2.routes().is_empty());
        let nutrient = h
            .manager
            .get_nutrient(&tenant, &result.nutrient_id)
            .unwrap()
            .unwrap();
        assert_eq!(nutrient.current_hop, 2);
        assert_eq!(nutrient.state, NutrientState::Exhausted);

        let hop3 = h
            .manager
            .propagate_hop_at(&tenant, &result.nutrient_id, 102)
            .unwrap();
        assert_eq!(
            hop3,
            HopOutcome::Terminal {
                reason: TerminalReason::Exhausted
            }
        );
    }

    #[test]
    fn test_repeated_hop_returns_same_routes() {
        let h = harness(TenantPolicy::default());
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        register(&h, "b", &["rust"]);
        let result = h
            .manager
            .broadcast_at(&tenant, &AgentId::new("origin"), draft(), 100)
            .unwrap();
        let again = h
            .manager
            .propagate_specific_hop_at(&tenant, &result.nutrient_id, 1, 101)
            .unwrap();
        assert_eq!(again.routes(), result.routes.as_slice());
    }

    #[test]
    fn test_superseded_pass_is_not_charged() {
        let h = harness(TenantPolicy::default().with_default_max_hops(3));
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        register(&h, "b", &["rust"]);
        register(&h, "c", &["rust"]);
        let result = h
            .manager
            .broadcast_at(&tenant, &AgentId::new("origin"), draft(), 100)
            .unwrap();
        let stale = h
            .manager
            .get_nutrient(&tenant, &result.nutrient_id)
            .unwrap()
            .unwrap();
        let used = || {
            h.manager
                .quota
                .usage_at(&tenant, MetricType::Routes, 101)
                .unwrap()
                .used
        };

        let winner = h
            .manager
            .propagate_hop_at(&tenant, &result.nutrient_id, 101)
            .unwrap();
        let charged = used();

        // A second caller that read hop 1 before the winner committed pays,
        // then loses the commit.
        h.manager
            .quota
            .require_at(&tenant, MetricType::Routes, stale.quota_cost, None, 101)
            .unwrap();
        let sources = h.manager.hop_sources(&stale, 2).unwrap();
        let loser = h.manager.route_pass(&stale, 2, &sources, 101).unwrap();

        assert_eq!(loser.routes(), winner.routes());
        assert_eq!(used(), charged);
    }

    #[test]
    fn test_skipping_a_hop_is_out_of_order() {
        let h = harness(TenantPolicy::default());
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        let result = h
            .manager
            .broadcast_at(&tenant, &AgentId::new("origin"), draft(), 100)
            .unwrap();
        assert!(matches!(
            h.manager
                .propagate_specific_hop_at(&tenant, &result.nutrient_id, 3, 101),
            Err(Error::OutOfOrder {
                requested: 3,
                current: 1,
                ..
            })
        ));
        assert!(matches!(
            h.manager
                .propagate_specific_hop_at(&tenant, &result.nutrient_id, 0, 101),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_expired_nutrient_terminates() {
        let h = harness(TenantPolicy::default());
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        let result = h
            .manager
            .broadcast_at(
                &tenant,
                &AgentId::new("origin"),
                draft().with_ttl_secs(10),
                100,
            )
            .unwrap();
        let outcome = h
            .manager
            .propagate_hop_at(&tenant, &result.nutrient_id, 110)
            .unwrap();
        assert_eq!(
            outcome,
            HopOutcome::Terminal {
                reason: TerminalReason::Expired
            }
        );
        assert_eq!(h.audit.recent_entries(1)[0].action, "expired");
    }

    #[test]
    fn test_expire_due_sweeps_overdue() {
        let h = harness(TenantPolicy::default());
        let tenant = TenantId::new("acme");
        register(&h, "origin", &[]);
        h.manager
            .broadcast_at(&tenant, &AgentId::new("origin"), draft().with_ttl_secs(5), 0)
            .unwrap();
        assert_eq!(h.manager.expire_due(4, 10).unwrap(), 0);
        assert_eq!(h.manager.expire_due(5, 10).unwrap(), 1);
        assert_eq!(h.manager.expire_due(6, 10).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_validation() {
        let h = harness(TenantPolicy::default().with_max_ttl_secs(60));
        let tenant = TenantId::new("acme");
        let origin = AgentId::new("origin");
        let valid = || draft().with_ttl_secs(30);
        assert!(matches!(
            h.manager.broadcast_at(&tenant, &origin, valid(), 0),
            Err(Error::AgentNotFound { .. })
        ));
        register(&h, "origin", &[]);
        assert!(matches!(
            h.manager
                .broadcast_at(&tenant, &origin, valid().with_ttl_secs(0), 0),
            Err(Error::InvalidTtl { .. })
        ));
        assert!(matches!(
            h.manager
                .broadcast_at(&tenant, &origin, valid().with_ttl_secs(61), 0),
            Err(Error::InvalidTtl {
                ttl_secs: 61,
                max_ttl_secs: 60
            })
        ));
        assert!(matches!(
            h.manager
                .broadcast_at(&tenant, &origin, valid().with_max_hops(0), 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.manager.broadcast_at(
                &tenant,
                &origin,
                NutrientDraft::new("x", vec![1.0, 0.0, 0.0]).with_ttl_secs(30),
                0
            ),
            Err(Error::InvalidInput(_))
        ));
        h.agents
            .set_status(&tenant, &origin, AgentStatus::Suspended)
            .unwrap();
        assert!(matches!(
            h.manager.broadcast_at(&tenant, &origin, valid(), 0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_routes_do_not_cross_tenants() {
        let h = harness(TenantPolicy::default());
        register(&h, "origin", &[]);
        h.agents
            .upsert_agent(
                &Agent::new(TenantId::new("globex"), AgentId::new("spy"), vec![1.0, 0.0])
                    .with_capabilities(["rust"]),
            )
            .unwrap();
        let result = h
            .manager
            .broadcast_at(&TenantId::new("acme"), &AgentId::new("origin"), draft(), 0)
            .unwrap();
        assert!(result.routes.is_empty());
        assert!(
            h.manager
                .get_nutrient(&TenantId::new("globex"), &result.nutrient_id)
                .unwrap()
                .is_none()
        );
    }
}
