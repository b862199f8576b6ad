//! Benchmarks for routing decisions.
//!
//! Benchmark targets:
//! - Selecting from 100 candidates: <100µs
//! - Selecting from 1,000 candidates: <1ms
//! - A cold-start broadcast across 200 agents: <5ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::collections::HashSet;
use std::hint::black_box;

use hyphanet::config::{QuotaLimits, RoutingConfig};
use hyphanet::models::{EdgeInit, Sensitivity};
use hyphanet::services::{Candidate, RoutingRequest};
use hyphanet::{
    Agent, AgentId, Edge, EdgeKey, HyphaeNetwork, HyphanetConfig, MetricType, Nutrient,
    NutrientDraft, NutrientId, NutrientState, RoutingPolicyEngine, TenantId, TenantPolicy, TraceId,
};

const DIMS: usize = 32;

/// A deterministic unit-ish embedding for index `i`.
fn embedding(i: usize) -> Vec<f32> {
    (0..DIMS)
        .map(|d| ((i * 31 + d * 7) % 17) as f32 / 17.0)
        .collect()
}

fn nutrient() -> Nutrient {
    Nutrient {
        id: NutrientId::new("bench"),
        tenant: TenantId::new("bench"),
        trace_id: TraceId::new("trc_bench"),
        origin: AgentId::new("origin"),
        summary: "bench".to_string(),
        embedding: embedding(0),
        snippets: vec![],
        tool_hints: vec![],
        required_capabilities: vec!["search".to_string(), "rank".to_string()],
        sensitivity: Sensitivity::Internal,
        current_hop: 0,
        max_hops: 3,
        ttl_secs: 60,
        quota_cost: 1,
        created_at: 0,
        expires_at: 60,
        state: NutrientState::Created,
    }
}

fn candidates(count: usize) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            let id = AgentId::new(format!("agent-{i}"));
            let agent = Agent::new(TenantId::new("bench"), id.clone(), embedding(i))
                .with_capabilities(if i % 3 == 0 { vec!["search"] } else { vec!["rank"] });
            // Every other candidate already has an edge.
            let edge = (i % 2 == 0).then(|| {
                let mut edge = Edge::new(
                    EdgeKey::new(TenantId::new("bench"), AgentId::new("origin"), id),
                    EdgeInit::default(),
                    0,
                );
                edge.weight = (i % 10) as f32 / 10.0 + 0.05;
                edge
            });
            Candidate { agent, edge }
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_select");
    let engine = RoutingPolicyEngine::new(&RoutingConfig::default().with_seed(7));
    let nutrient = nutrient();
    let source = AgentId::new("origin");
    let excluded = HashSet::new();

    for count in [10, 100, 1_000] {
        let pool = candidates(count);
        for explore in [false, true] {
            let label = if explore { "explore" } else { "exploit" };
            group.bench_with_input(BenchmarkId::new(label, count), &pool, |b, pool| {
                b.iter(|| {
                    let request = RoutingRequest {
                        nutrient: &nutrient,
                        source: &source,
                        candidates: pool,
                        excluded: &excluded,
                        fan_out: 3,
                        explore,
                    };
                    black_box(engine.select(&request))
                });
            });
        }
    }
    group.finish();
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_broadcast");
    group.sample_size(30);

    for count in [20, 200] {
        let config = HyphanetConfig::default()
            .with_embedding_dimensions(DIMS)
            .with_routing(RoutingConfig::default().with_fan_out(3).with_seed(11))
            .with_policy_defaults(TenantPolicy::default().with_quotas(
                QuotaLimits::default().with_limit(MetricType::Routes, u64::MAX / 2),
            ))
            .with_audit_key("bench");
        let network = HyphaeNetwork::in_memory(config).unwrap();
        let tenant = TenantId::new("bench");
        for i in 0..count {
            network
                .register_agent(
                    &tenant,
                    &Agent::new(tenant.clone(), AgentId::new(format!("agent-{i}")), embedding(i))
                        .with_capabilities(["search"]),
                )
                .unwrap();
        }

        let mut now = 1_000;
        group.bench_function(BenchmarkId::new("cold_start", count), |b| {
            b.iter(|| {
                now += 1;
                let draft = NutrientDraft::new("bench", embedding(1))
                    .with_required_capabilities(["search"]);
                black_box(
                    network
                        .broadcast_at(&tenant, &AgentId::new("agent-0"), draft, now)
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select, bench_broadcast);
criterion_main!(benches);
