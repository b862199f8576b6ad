//! Graph service for weighted agent-to-agent edges.
//!
//! Wraps a [`GraphBackend`] with the rules the network applies to edges:
//! - Adaptive neighbour limits for dense neighbourhoods
//! - Lazy edge creation seeded with profile similarity
//! - Reinforcement through optimistic compare-and-swap with bounded retry
//! - Bounded, idempotent decay sweeps
//! - Periodic refresh of base similarity from agent profiles
//!
//! Reinforcement is the only path that raises a weight; decay is the only
//! path that lowers one.

// Edge counts are bounded by tenant size and converted for logging and metrics only.
#![allow(clippy::cast_possible_truncation)]

use crate::config::{DecayConfig, GraphConfig};
use crate::embedding::unit_similarity;
use crate::models::{
    Agent, AgentId, DecayPass, Edge, EdgeInit, EdgeKey, EdgeStats, EventMeta, NetworkEvent,
    TenantId, TraceId,
};
use crate::security::AuditLogger;
use crate::storage::{AgentBackend, GraphBackend};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Computes the neighbour limit for a source with `outgoing` edges.
///
/// Sparse neighbourhoods use `base`; dense ones shrink it by the number of
/// `dense_threshold`-sized blocks, never below `min`.
#[must_use]
pub fn adaptive_neighbor_limit(
    outgoing: usize,
    base: usize,
    min: usize,
    dense_threshold: usize,
) -> usize {
    if dense_threshold == 0 || outgoing <= dense_threshold {
        return base;
    }
    let blocks = outgoing.div_ceil(dense_threshold);
    (base / blocks).max(min)
}

/// Result of a successful reinforcement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reinforcement {
    /// Weight before the update.
    pub previous_weight: f32,
    /// Weight after the update.
    pub weight: f32,
}

/// High-level service for graph operations.
pub struct GraphService {
    backend: Arc<dyn GraphBackend>,
    agents: Arc<dyn AgentBackend>,
    audit: Arc<AuditLogger>,
    config: GraphConfig,
    decay: DecayConfig,
}

impl GraphService {
    /// Creates a new graph service.
    #[must_use]
    pub fn new(
        backend: Arc<dyn GraphBackend>,
        agents: Arc<dyn AgentBackend>,
        audit: Arc<AuditLogger>,
        config: GraphConfig,
        decay: DecayConfig,
    ) -> Self {
        Self {
            backend,
            agents,
            audit,
            config,
            decay,
        }
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &dyn GraphBackend {
        self.backend.as_ref()
    }

    /// Gets an edge by natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get_edge(&self, key: &EdgeKey) -> Result<Option<Edge>> {
        self.backend.get_edge(key)
    }

    /// Returns the neighbour limit for `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge count fails.
    pub fn neighbor_limit(&self, tenant: &TenantId, source: &AgentId) -> Result<usize> {
        let outgoing = self.backend.count_outgoing(tenant, source)?;
        Ok(adaptive_neighbor_limit(
            outgoing,
            self.config.base_neighbor_limit,
            self.config.min_neighbor_limit,
            self.config.dense_threshold,
        ))
    }

    /// Lists the strongest outgoing edges of `source`, up to the adaptive limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    #[instrument(skip(self), fields(tenant = %tenant, source = %source))]
    pub fn neighbors(&self, tenant: &TenantId, source: &AgentId) -> Result<Vec<Edge>> {
        let limit = self.neighbor_limit(tenant, source)?;
        self.backend.list_outgoing(tenant, source, limit)
    }

    /// Creates the edge `source -> destination` if absent, otherwise touches it.
    ///
    /// New edges start at the configured initial weight with base similarity
    /// taken from the two agent profiles.
    ///
    /// # Errors
    ///
    /// Returns an error if the agents belong to different tenants or the
    /// upsert fails.
    pub fn touch_edge(&self, source: &Agent, destination: &Agent, now: u64) -> Result<Edge> {
        if source.tenant != destination.tenant {
            return Err(Error::TenantMismatch {
                expected: source.tenant.to_string(),
                found: destination.tenant.to_string(),
            });
        }
        let key = EdgeKey::new(
            source.tenant.clone(),
            source.id.clone(),
            destination.id.clone(),
        );
        let init = EdgeInit {
            weight: self.config.bounds().clamp(self.config.initial_weight),
            base_similarity: unit_similarity(
                &source.profile_embedding,
                &destination.profile_embedding,
            ),
        };
        self.backend.upsert_edge(&key, init, now)
    }

    /// Reinforces an edge by `amount` at `learning_rate`.
    ///
    /// Reads the edge, computes the clamped update and writes it with a
    /// version check, retrying on conflicting writers. A missing edge is
    /// created at the initial weight first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrencyConflict`] when every attempt lost its race,
    /// or a storage error.
    #[instrument(skip(self), fields(edge = %key, amount, trace_id))]
    pub fn reinforce(
        &self,
        key: &EdgeKey,
        amount: f32,
        learning_rate: f32,
        trace_id: Option<&TraceId>,
        now: u64,
    ) -> Result<Reinforcement> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidInput(format!(
                "reinforcement must be a non-negative number, got {amount}"
            )));
        }

        let attempts = self.config.cas_max_attempts.max(1);
        let bounds = self.config.bounds();
        for attempt in 1..=attempts {
            let current = match self.backend.get_edge(key)? {
                Some(edge) => edge,
                None => self.backend.upsert_edge(
                    key,
                    EdgeInit {
                        weight: bounds.clamp(self.config.initial_weight),
                        base_similarity: 0.0,
                    },
                    now,
                )?,
            };
            let next = current.reinforced(amount, learning_rate, bounds, now);
            if self.backend.compare_and_swap(&next, current.version)? {
                let result = Reinforcement {
                    previous_weight: current.weight,
                    weight: next.weight,
                };
                self.audit.record(&NetworkEvent::EdgeReinforced {
                    meta: EventMeta::with_timestamp(
                        "feedback",
                        key.tenant.clone(),
                        trace_id.cloned(),
                        now,
                    ),
                    edge: key.clone(),
                    previous_weight: result.previous_weight,
                    weight: result.weight,
                });
                metrics::counter!("edges_reinforced_total").increment(1);
                return Ok(result);
            }
            tracing::debug!(edge = %key, attempt, "Edge version moved, retrying reinforcement");
            metrics::counter!("edge_cas_conflicts_total").increment(1);
        }

        Err(Error::ConcurrencyConflict {
            resource: key.to_string(),
            attempts,
        })
    }

    /// Decays one tenant's stale edges in bounded batches.
    ///
    /// An edge is stale when its last interaction is older than
    /// `stale_after_secs` before `now`. Each edge decays at most once per
    /// sweep timestamp, so re-running a sweep at the same `now` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch fails.
    #[instrument(skip(self), fields(tenant = %tenant, now))]
    pub fn decay_tenant(
        &self,
        tenant: &TenantId,
        now: u64,
        batch_limit: usize,
        max_batches: usize,
    ) -> Result<usize> {
        let pass = DecayPass {
            cutoff: now.saturating_sub(self.decay.stale_after_secs),
            factor: self.decay.factor,
            min_weight: self.config.min_weight,
            sweep_at: now,
            limit: batch_limit.max(1),
        };

        let mut total = 0;
        for _ in 0..max_batches.max(1) {
            let decayed = self.backend.batch_decay(tenant, &pass)?;
            total += decayed;
            if decayed < pass.limit {
                break;
            }
        }

        if total > 0 {
            self.audit.record(&NetworkEvent::EdgesDecayed {
                meta: EventMeta::with_timestamp("sweep", tenant.clone(), None, now),
                count: total,
                factor: pass.factor,
            });
            tracing::info!(tenant = %tenant, decayed = total, "Decayed stale edges");
        }
        Ok(total)
    }

    /// Decays stale edges for every tenant with edges.
    ///
    /// # Errors
    ///
    /// Returns an error if listing tenants or any batch fails.
    pub fn decay_all(&self, now: u64, batch_limit: usize, max_batches: usize) -> Result<usize> {
        let mut total = 0;
        for tenant in self.backend.tenant_ids()? {
            total += self.decay_tenant(&tenant, now, batch_limit, max_batches)?;
        }
        Ok(total)
    }

    /// Recomputes base similarity for edges not refreshed within
    /// `similarity_refresh_secs`.
    ///
    /// Edges whose agents are no longer registered are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend call fails.
    #[instrument(skip(self), fields(tenant = %tenant, now))]
    pub fn refresh_similarity(&self, tenant: &TenantId, now: u64, limit: usize) -> Result<usize> {
        let stale = self.backend.list_stale_similarity(
            tenant,
            now.saturating_sub(self.decay.similarity_refresh_secs),
            limit,
        )?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut ids: Vec<AgentId> = stale
            .iter()
            .flat_map(|k| [k.source.clone(), k.destination.clone()])
            .collect();
        ids.sort();
        ids.dedup();
        let profiles: HashMap<AgentId, Agent> = self
            .agents
            .get_agents(tenant, &ids)?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let mut refreshed = 0;
        for key in &stale {
            let (Some(src), Some(dst)) = (profiles.get(&key.source), profiles.get(&key.destination))
            else {
                continue;
            };
            let similarity = unit_similarity(&src.profile_embedding, &dst.profile_embedding);
            if self.backend.update_base_similarity(key, similarity, now)? {
                refreshed += 1;
            }
        }
        metrics::counter!("edge_similarity_refreshed_total").increment(refreshed as u64);
        Ok(refreshed)
    }

    /// Refreshes similarity for every tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend call fails.
    pub fn refresh_all(&self, now: u64, limit: usize) -> Result<usize> {
        let mut total = 0;
        for tenant in self.backend.tenant_ids()? {
            total += self.refresh_similarity(&tenant, now, limit)?;
        }
        Ok(total)
    }

    /// Returns edge statistics for a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self, tenant: &TenantId) -> Result<EdgeStats> {
        self.backend.stats(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AuditConfig;
    use crate::storage::{InMemoryGraphBackend, SqliteAgentRegistry, SqliteGraphBackend};
    use std::sync::Barrier;
    use test_case::test_case;

    fn service() -> (GraphService, Arc<AuditLogger>) {
        let audit = Arc::new(AuditLogger::with_config(AuditConfig::new(b"k".to_vec())));
        let service = GraphService::new(
            Arc::new(InMemoryGraphBackend::new()),
            Arc::new(SqliteAgentRegistry::in_memory().unwrap()),
            Arc::clone(&audit),
            GraphConfig::default(),
            DecayConfig::default(),
        );
        (service, audit)
    }

    fn agent(id: &str, profile: Vec<f32>) -> Agent {
        Agent::new(TenantId::new("t"), AgentId::new(id), profile)
    }

    #[test_case(0, 32 ; "empty")]
    #[test_case(64, 32 ; "at threshold")]
    #[test_case(65, 16 ; "two blocks")]
    #[test_case(640, 4 ; "floor")]
    fn test_adaptive_neighbor_limit(outgoing: usize, expected: usize) {
        assert_eq!(adaptive_neighbor_limit(outgoing, 32, 4, 64), expected);
    }

    #[test]
    fn test_touch_edge_seeds_similarity() {
        let (service, _) = service();
        let a = agent("a", vec![1.0, 0.0]);
        let b = agent("b", vec![1.0, 0.0]);
        let edge = service.touch_edge(&a, &b, 10).unwrap();
        assert!((edge.weight - 0.5).abs() < f32::EPSILON);
        assert!((edge.base_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_touch_edge_rejects_cross_tenant() {
        let (service, _) = service();
        let a = agent("a", vec![1.0]);
        let b = Agent::new(TenantId::new("other"), AgentId::new("b"), vec![1.0]);
        assert!(matches!(
            service.touch_edge(&a, &b, 0),
            Err(Error::TenantMismatch { .. })
        ));
    }

    #[test]
    fn test_reinforce_clamps_and_audits() {
        let (service, audit) = service();
        let a = agent("a", vec![1.0]);
        let b = agent("b", vec![1.0]);
        let edge = service.touch_edge(&a, &b, 0).unwrap();
        for _ in 0..30 {
            service.reinforce(&edge.key, 1.0, 0.1, None, 5).unwrap();
        }
        let edge = service.get_edge(&edge.key).unwrap().unwrap();
        assert!((edge.weight - 1.5).abs() < f32::EPSILON);
        assert!((edge.success_total - 30.0).abs() < 1e-4);
        assert_eq!(audit.len(), 30);
    }

    #[test]
    fn test_reinforce_rejects_negative() {
        let (service, _) = service();
        let key = EdgeKey::new("t".into(), "a".into(), "b".into());
        assert!(service.reinforce(&key, -0.1, 0.1, None, 0).is_err());
    }

    #[test]
    fn test_decay_once_per_sweep() {
        let (service, _) = service();
        let a = agent("a", vec![1.0]);
        let b = agent("b", vec![1.0]);
        let edge = service.touch_edge(&a, &b, 0).unwrap();
        let now = 2 * 86_400;
        assert_eq!(service.decay_all(now, 10, 5).unwrap(), 1);
        assert_eq!(service.decay_all(now, 10, 5).unwrap(), 0);
        let decayed = service.get_edge(&edge.key).unwrap().unwrap();
        assert!((decayed.weight - 0.475).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_reinforce_and_decay_lose_no_update() {
        const WRITERS: usize = 8;
        const AMOUNT: f32 = 0.1;
        const RATE: f32 = 0.5;

        let audit = Arc::new(AuditLogger::with_config(AuditConfig::new(b"k".to_vec())));
        let service = GraphService::new(
            Arc::new(SqliteGraphBackend::in_memory().unwrap()),
            Arc::new(SqliteAgentRegistry::in_memory().unwrap()),
            audit,
            GraphConfig {
                cas_max_attempts: 256,
                ..GraphConfig::default()
            },
            DecayConfig::default(),
        );
        let tenant = TenantId::new("t");
        let key = EdgeKey::new(tenant.clone(), AgentId::new("a"), AgentId::new("b"));
        let init = EdgeInit {
            weight: 0.5,
            base_similarity: 0.0,
        };
        let start = service.backend().upsert_edge(&key, init, 1).unwrap();
        let pass = DecayPass {
            cutoff: u64::MAX,
            factor: 0.5,
            min_weight: 0.01,
            sweep_at: 1_000,
            limit: 10,
        };

        let barrier = Barrier::new(WRITERS + 1);
        std::thread::scope(|scope| {
            for i in 0..WRITERS {
                let (service, key, barrier) = (&service, &key, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    service
                        .reinforce(key, AMOUNT, RATE, None, 10 + i as u64)
                        .unwrap();
                });
            }
            let (service, tenant, pass, barrier) = (&service, &tenant, &pass, &barrier);
            scope.spawn(move || {
                barrier.wait();
                assert_eq!(service.backend().batch_decay(tenant, pass).unwrap(), 1);
            });
        });

        let edge = service.get_edge(&key).unwrap().unwrap();
        assert_eq!(edge.version, start.version + WRITERS as u64 + 1);
        assert!((edge.success_total - AMOUNT * WRITERS as f32).abs() < 1e-4);

        // The final weight is the decay applied after some number of the
        // reinforcements, with every reinforcement counted.
        let step = RATE * AMOUNT;
        let matches_sequential = (0..=WRITERS).any(|before| {
            let decayed = (0.5 + step * before as f32) * pass.factor;
            let expected = decayed + step * (WRITERS - before) as f32;
            (edge.weight - expected).abs() < 1e-4
        });
        assert!(matches_sequential, "weight {} lost an update", edge.weight);
    }
}
