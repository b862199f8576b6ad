//! Multi-tenant isolation tests.
//!
//! Two tenants register agents with the same ids; nothing one tenant does may
//! be visible to, or charged against, the other.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use hyphanet::config::{QuotaLimits, RoutingConfig};
use hyphanet::{
    Agent, AgentId, Error, HyphaeNetwork, HyphanetConfig, MemoryFilter, MemoryKind, MemoryRecord,
    MetricType, NutrientDraft, TenantId, TenantPolicy,
};

const T0: u64 = 3_000_000;

fn network() -> HyphaeNetwork {
    let config = HyphanetConfig::default()
        .with_embedding_dimensions(2)
        .with_routing(RoutingConfig::default().with_epsilon(0.0).with_seed(3))
        .with_audit_key("isolation");
    HyphaeNetwork::in_memory(config).unwrap()
}

fn seed(network: &HyphaeNetwork, tenant: &TenantId) {
    for (id, caps) in [("lead", vec![]), ("worker", vec!["build"])] {
        network
            .register_agent(
                tenant,
                &Agent::new(tenant.clone(), AgentId::new(id), vec![1.0, 0.0])
                    .with_capabilities(caps),
            )
            .unwrap();
    }
}

fn draft() -> NutrientDraft {
    NutrientDraft::new("cache the toolchain", vec![1.0, 0.0]).with_required_capabilities(["build"])
}

#[test]
fn test_overlapping_agent_ids_stay_separate() {
    let net = network();
    let acme = TenantId::new("acme");
    let globex = TenantId::new("globex");
    seed(&net, &acme);
    seed(&net, &globex);

    let a = net
        .broadcast_at(&acme, &AgentId::new("lead"), draft(), T0)
        .unwrap();
    assert_eq!(a.routes.len(), 1);
    assert!(a.routes.iter().all(|r| r.tenant == acme));

    // The other tenant cannot see or act on acme's nutrient and trace.
    assert!(net.get_nutrient(&globex, &a.nutrient_id).unwrap().is_none());
    assert!(net.routes_for_trace(&globex, &a.trace_id).unwrap().is_empty());
    assert!(matches!(
        net.record_outcome_at(&globex, &a.trace_id, 1.0, T0 + 1),
        Err(Error::UnknownTrace { .. })
    ));
    assert!(matches!(
        net.propagate_next_at(&globex, &a.nutrient_id, T0 + 1),
        Err(Error::NotFound { .. })
    ));

    // Reinforcement lands on acme's edge only.
    net.record_outcome_at(&acme, &a.trace_id, 1.0, T0 + 1)
        .unwrap();
    let acme_stats = net.stats(&acme).unwrap();
    let globex_stats = net.stats(&globex).unwrap();
    assert_eq!(acme_stats.edges.edge_count, 1);
    assert_eq!(globex_stats.edges.edge_count, 0);
    assert!(globex_stats.nutrients.is_empty());
}

#[test]
fn test_quota_is_per_tenant() {
    let config = HyphanetConfig::default()
        .with_embedding_dimensions(2)
        .with_audit_key("isolation")
        .with_tenant_policy(
            &TenantId::new("small"),
            TenantPolicy::default()
                .with_quotas(QuotaLimits::default().with_limit(MetricType::Routes, 1)),
        );
    let net = HyphaeNetwork::in_memory(config).unwrap();
    let small = TenantId::new("small");
    let big = TenantId::new("big");
    seed(&net, &small);
    seed(&net, &big);

    net.broadcast_at(&small, &AgentId::new("lead"), draft(), T0)
        .unwrap();
    assert!(matches!(
        net.broadcast_at(&small, &AgentId::new("lead"), draft(), T0),
        Err(Error::QuotaExceeded { .. })
    ));
    for _ in 0..3 {
        net.broadcast_at(&big, &AgentId::new("lead"), draft(), T0)
            .unwrap();
    }
}

#[test]
fn test_memory_search_is_tenant_scoped() {
    let net = network();
    let acme = TenantId::new("acme");
    let globex = TenantId::new("globex");
    net.store_memory_at(
        &acme,
        MemoryRecord::new(
            acme.clone(),
            AgentId::new("worker"),
            MemoryKind::Insight,
            "acme secret sauce",
            vec![1.0, 0.0],
        ),
        T0,
    )
    .unwrap();

    let hits = net
        .search_memory_at(&globex, &[1.0, 0.0], 10, 0.0, &MemoryFilter::new(), T0)
        .unwrap();
    assert!(hits.is_empty());

    let foreign = MemoryRecord::new(
        acme,
        AgentId::new("worker"),
        MemoryKind::Insight,
        "smuggled",
        vec![1.0, 0.0],
    );
    assert!(matches!(
        net.store_memory_at(&globex, foreign, T0),
        Err(Error::TenantMismatch { .. })
    ));
}

#[test]
fn test_blank_tenant_is_rejected_everywhere() {
    let net = network();
    let blank = TenantId::new("");
    assert!(matches!(
        net.broadcast_at(&blank, &AgentId::new("lead"), draft(), T0),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        net.check_quota_at(&blank, MetricType::Routes, 1, T0),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        net.search_memory_at(&blank, &[1.0, 0.0], 1, 0.0, &MemoryFilter::new(), T0),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(net.stats(&blank), Err(Error::InvalidInput(_))));
}
