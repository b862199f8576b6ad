//! Property-based tests for network invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Edge weights stay within bounds after any reinforcement or decay
//! - Quota windows allow exactly `limit` units and deny the rest
//! - `current_hop` is monotone and never exceeds `max_hops`
//! - Re-propagating a hop returns the same routes
//! - Reporting an outcome twice moves weights exactly once
//! - MMR returns at most `k` distinct hits

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;

use hyphanet::config::{QuotaLimits, RoutingConfig};
use hyphanet::models::{DecayPass, Edge, EdgeInit, MemoryHit, WeightBounds};
use hyphanet::services::mmr::diversify;
use hyphanet::storage::{GraphBackend, InMemoryGraphBackend};
use hyphanet::{
    Agent, AgentId, EdgeKey, HopOutcome, HyphaeNetwork, HyphanetConfig, MemoryKind, MemoryRecord,
    MetricType, NutrientDraft, TenantId, TenantPolicy,
};
use proptest::prelude::*;

fn key() -> EdgeKey {
    EdgeKey::new(TenantId::new("t"), AgentId::new("a"), AgentId::new("b"))
}

#[derive(Debug, Clone)]
enum EdgeOp {
    Reinforce(f32),
    Decay(f32),
}

fn edge_op() -> impl Strategy<Value = EdgeOp> {
    prop_oneof![
        (0.0_f32..=10.0).prop_map(EdgeOp::Reinforce),
        (0.0_f32..=1.0).prop_map(EdgeOp::Decay),
    ]
}

proptest! {
    /// Property: weight stays in [0.01, 1.5] under any mix of updates.
    #[test]
    fn prop_edge_weight_bounded(
        initial in 0.0_f32..=3.0,
        learning_rate in 0.0_f32..=1.0,
        ops in prop::collection::vec(edge_op(), 1..40),
    ) {
        let bounds = WeightBounds::default();
        let backend = InMemoryGraphBackend::new();
        let init = EdgeInit { weight: bounds.clamp(initial), base_similarity: 0.5 };
        backend.upsert_edge(&key(), init, 0).unwrap();

        for (i, op) in ops.into_iter().enumerate() {
            let now = i as u64 + 1;
            match op {
                EdgeOp::Reinforce(amount) => {
                    let edge: Edge = backend.get_edge(&key()).unwrap().unwrap();
                    let version = edge.version;
                    let next = edge.reinforced(amount, learning_rate, bounds, now);
                    prop_assert!(backend.compare_and_swap(&next, version).unwrap());
                },
                EdgeOp::Decay(factor) => {
                    let pass = DecayPass {
                        cutoff: u64::MAX,
                        factor,
                        min_weight: bounds.min,
                        sweep_at: now,
                        limit: 10,
                    };
                    backend.batch_decay(&TenantId::new("t"), &pass).unwrap();
                },
            }
            let weight = backend.get_edge(&key()).unwrap().unwrap().weight;
            prop_assert!((bounds.min..=bounds.max).contains(&weight), "weight {weight}");
        }
    }

    /// Property: N requests of cost 1 are allowed, the rest of the window is denied.
    #[test]
    fn prop_quota_allows_exactly_limit(
        limit in 1_u64..20,
        extra in 1_u64..10,
        offset in 0_u64..60,
    ) {
        let config = HyphanetConfig::default()
            .with_audit_key("prop")
            .with_policy_defaults(
                TenantPolicy::default()
                    .with_window_secs(60)
                    .with_quotas(QuotaLimits::default().with_limit(MetricType::Searches, limit)),
            );
        let net = HyphaeNetwork::in_memory(config).unwrap();
        let tenant = TenantId::new("t");
        let now = 6_000 + offset;

        let mut allowed = 0;
        for _ in 0..(limit + extra) {
            if net.check_quota_at(&tenant, MetricType::Searches, 1, now).unwrap().is_allowed() {
                allowed += 1;
            }
        }
        prop_assert_eq!(allowed, limit);
    }

    /// Property: MMR output is at most `k` distinct records.
    #[test]
    fn prop_mmr_returns_distinct_subset(
        embeddings in prop::collection::vec((-1.0_f32..=1.0, -1.0_f32..=1.0), 0..20),
        k in 0_usize..10,
        lambda in 0.0_f32..=1.0,
    ) {
        let hits: Vec<MemoryHit> = embeddings
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| MemoryHit {
                record: MemoryRecord::new(
                    TenantId::new("t"),
                    AgentId::new("a"),
                    MemoryKind::Insight,
                    format!("m{i}"),
                    vec![x, y],
                ),
                relevance: 1.0 - i as f32 * 0.01,
            })
            .collect();
        let n = hits.len();
        let out = diversify(hits, k, 0.9, lambda);
        prop_assert!(out.len() <= k.min(n));
        let ids: HashSet<_> = out.iter().map(|h| h.record.id.clone()).collect();
        prop_assert_eq!(ids.len(), out.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: hops advance by one, stop at `max_hops`, and replay stably.
    #[test]
    fn prop_hops_monotone_and_replayable(
        agents in 2_usize..8,
        max_hops in 1_u32..5,
        fan_out in 1_usize..4,
        attempts in 1_usize..8,
        seed in any::<u64>(),
    ) {
        let config = HyphanetConfig::default()
            .with_embedding_dimensions(2)
            .with_audit_key("prop")
            .with_routing(RoutingConfig::default().with_fan_out(fan_out).with_seed(seed));
        let net = HyphaeNetwork::in_memory(config).unwrap();
        let tenant = TenantId::new("t");
        for i in 0..agents {
            net.register_agent(
                &tenant,
                &Agent::new(tenant.clone(), AgentId::new(format!("a{i}")), vec![1.0, 0.0])
                    .with_capabilities(["work"]),
            )
            .unwrap();
        }

        let result = net
            .broadcast_at(
                &tenant,
                &AgentId::new("a0"),
                NutrientDraft::new("x", vec![1.0, 0.0])
                    .with_required_capabilities(["work"])
                    .with_max_hops(max_hops),
                100,
            )
            .unwrap();

        let mut last_hop = 1;
        for step in 0..attempts {
            let now = 101 + step as u64;
            let outcome = net.propagate_next_at(&tenant, &result.nutrient_id, now).unwrap();
            let nutrient = net.get_nutrient(&tenant, &result.nutrient_id).unwrap().unwrap();
            prop_assert!(nutrient.current_hop >= last_hop);
            prop_assert!(nutrient.current_hop <= last_hop + 1);
            prop_assert!(nutrient.current_hop <= max_hops);
            last_hop = nutrient.current_hop;
            if let HopOutcome::Routed { routes } = outcome {
                let hop = nutrient.current_hop;
                let replay = net
                    .propagate_specific_hop_at(&tenant, &result.nutrient_id, hop, now)
                    .unwrap();
                let mut first: Vec<_> = routes.iter().map(|r| r.id.clone()).collect();
                let mut again: Vec<_> = replay.routes().iter().map(|r| r.id.clone()).collect();
                first.sort();
                again.sort();
                prop_assert_eq!(first, again);
            }
        }

        // No agent receives the nutrient twice.
        let routes = net.routes_for_trace(&tenant, &result.trace_id).unwrap();
        let destinations: HashSet<_> = routes.iter().map(|r| r.destination.clone()).collect();
        prop_assert_eq!(destinations.len(), routes.len());
        prop_assert!(!destinations.contains(&AgentId::new("a0")));
    }

    /// Property: a repeated outcome leaves every edge where the first left it.
    #[test]
    fn prop_record_outcome_idempotent(score in 0.0_f32..=1.0, fan_out in 1_usize..4) {
        let config = HyphanetConfig::default()
            .with_embedding_dimensions(2)
            .with_audit_key("prop")
            .with_routing(RoutingConfig::default().with_fan_out(fan_out).with_seed(5));
        let net = HyphaeNetwork::in_memory(config).unwrap();
        let tenant = TenantId::new("t");
        for id in ["src", "a", "b", "c"] {
            net.register_agent(
                &tenant,
                &Agent::new(tenant.clone(), AgentId::new(id), vec![0.8, 0.6])
                    .with_capabilities(["work"]),
            )
            .unwrap();
        }
        let result = net
            .broadcast_at(
                &tenant,
                &AgentId::new("src"),
                NutrientDraft::new("x", vec![0.8, 0.6]).with_required_capabilities(["work"]),
                100,
            )
            .unwrap();
        let weights = |net: &HyphaeNetwork| -> Vec<f32> {
            result
                .routes
                .iter()
                .map(|r| {
                    let key = EdgeKey::new(tenant.clone(), r.source.clone(), r.destination.clone());
                    net.graph().get_edge(&key).unwrap().unwrap().weight
                })
                .collect()
        };

        let first = net.record_outcome_at(&tenant, &result.trace_id, score, 101).unwrap();
        prop_assert_eq!(first.updated_edges, result.routes.len());
        let after_first = weights(&net);
        let second = net.record_outcome_at(&tenant, &result.trace_id, score, 102).unwrap();
        prop_assert_eq!(second.updated_edges, 0);
        prop_assert_eq!(weights(&net), after_first);
    }
}
