//! End-to-end learning scenarios.
//!
//! Checks that outcomes steer routing toward productive neighbours and that
//! stale edges decay by exactly the configured factor.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use hyphanet::config::RoutingConfig;
use hyphanet::models::EdgeInit;
use hyphanet::storage::NetworkStores;
use hyphanet::{
    Agent, AgentId, EdgeKey, HopOutcome, HyphaeNetwork, HyphanetConfig, NutrientDraft, TenantId,
};

const T0: u64 = 1_000_000;

fn tenant() -> TenantId {
    TenantId::new("acme")
}

fn key(src: &str, dst: &str) -> EdgeKey {
    EdgeKey::new(tenant(), AgentId::new(src), AgentId::new(dst))
}

/// A network with agent `x` linked to `strong` (0.8) and `weak` (0.2).
fn two_neighbour_network(fan_out: usize) -> (HyphaeNetwork, NetworkStores) {
    network_with(
        RoutingConfig::default()
            .with_fan_out(fan_out)
            .with_epsilon(0.0)
            .with_seed(42),
    )
}

fn network_with(routing: RoutingConfig) -> (HyphaeNetwork, NetworkStores) {
    let config = HyphanetConfig::default()
        .with_embedding_dimensions(3)
        .with_routing(routing)
        .with_audit_key("scenario-key");
    let stores = NetworkStores::in_memory().unwrap();
    let network = HyphaeNetwork::with_stores(config, stores.clone());

    for id in ["x", "strong", "weak"] {
        network
            .register_agent(
                &tenant(),
                &Agent::new(tenant(), AgentId::new(id), vec![0.6, 0.8, 0.0]),
            )
            .unwrap();
    }
    for (dst, weight) in [("strong", 0.8), ("weak", 0.2)] {
        stores
            .graph
            .upsert_edge(
                &key("x", dst),
                EdgeInit {
                    weight,
                    base_similarity: 1.0,
                },
                T0,
            )
            .unwrap();
    }
    (network, stores)
}

#[test]
fn test_outcome_reinforces_only_the_routed_edge() {
    let (network, stores) = two_neighbour_network(1);
    let draft = NutrientDraft::new("flaky test root cause", vec![0.6, 0.8, 0.0])
        .with_max_hops(2)
        .with_ttl_secs(60);

    let result = network
        .broadcast_at(&tenant(), &AgentId::new("x"), draft, T0)
        .unwrap();
    assert_eq!(result.routes.len(), 1);
    assert_eq!(result.routes[0].destination.as_str(), "strong");
    assert!(!result.routes[0].explored);

    let weak_before = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    let summary = network
        .record_outcome_at(&tenant(), &result.trace_id, 1.0, T0 + 5)
        .unwrap();
    assert_eq!(summary.updated_edges, 1);

    let strong = stores.graph.get_edge(&key("x", "strong")).unwrap().unwrap();
    let weak = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    assert!(strong.weight > 0.8);
    assert!(strong.success_total > 0.0);
    assert!((weak.weight - weak_before.weight).abs() < f32::EPSILON);
    assert_eq!(weak.version, weak_before.version);
}

#[test]
fn test_default_routing_sends_to_strongest_neighbour_only() {
    let (network, stores) = network_with(RoutingConfig::default().with_epsilon(0.0));
    let draft = NutrientDraft::new("flaky test root cause", vec![0.6, 0.8, 0.0]);

    let result = network
        .broadcast_at(&tenant(), &AgentId::new("x"), draft, T0)
        .unwrap();
    let destinations: Vec<_> = result.routes.iter().map(|r| r.destination.as_str()).collect();
    assert_eq!(destinations, vec!["strong"]);

    network
        .record_outcome_at(&tenant(), &result.trace_id, 1.0, T0 + 5)
        .unwrap();
    let strong = stores.graph.get_edge(&key("x", "strong")).unwrap().unwrap();
    let weak = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    assert!(strong.weight > 0.8);
    assert!((weak.weight - 0.2).abs() < f32::EPSILON);
    assert!(weak.success_total.abs() < f32::EPSILON);
}

#[test]
fn test_repeated_success_keeps_strong_neighbour_first() {
    let (network, stores) = two_neighbour_network(1);
    for round in 0..5 {
        let now = T0 + round * 10;
        let result = network
            .broadcast_at(
                &tenant(),
                &AgentId::new("x"),
                NutrientDraft::new("release checklist", vec![0.6, 0.8, 0.0]).with_max_hops(1),
                now,
            )
            .unwrap();
        assert_eq!(result.routes[0].destination.as_str(), "strong");
        network
            .record_outcome_at(&tenant(), &result.trace_id, 0.9, now + 1)
            .unwrap();
    }
    let strong = stores.graph.get_edge(&key("x", "strong")).unwrap().unwrap();
    assert!(strong.weight <= 1.5);
    assert!(strong.weight > 0.9);
}

#[test]
fn test_second_hop_routes_from_first_hop_destinations() {
    let (network, stores) = two_neighbour_network(1);
    network
        .register_agent(
            &tenant(),
            &Agent::new(tenant(), AgentId::new("far"), vec![0.6, 0.8, 0.0]),
        )
        .unwrap();
    stores
        .graph
        .upsert_edge(
            &key("strong", "far"),
            EdgeInit {
                weight: 0.5,
                base_similarity: 1.0,
            },
            T0,
        )
        .unwrap();

    let result = network
        .broadcast_at(
            &tenant(),
            &AgentId::new("x"),
            NutrientDraft::new("cache stampede fix", vec![0.6, 0.8, 0.0]).with_max_hops(2),
            T0,
        )
        .unwrap();
    let hop2 = network
        .propagate_next_at(&tenant(), &result.nutrient_id, T0 + 1)
        .unwrap();
    let HopOutcome::Routed { routes } = hop2 else {
        unreachable!("hop 2 is within budget");
    };
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].source.as_str(), "strong");
    assert_eq!(routes[0].destination.as_str(), "far");
    assert_eq!(routes[0].hop, 2);
    assert_eq!(routes[0].trace_id, result.trace_id);

    let nutrient = network
        .get_nutrient(&tenant(), &result.nutrient_id)
        .unwrap()
        .unwrap();
    assert_eq!(nutrient.current_hop, 2);
    assert!(nutrient.state.is_terminal());
}

#[test]
fn test_decay_hits_untouched_edges_only() {
    let (network, stores) = two_neighbour_network(1);
    let stale_after = network.config().decay.stale_after_secs;
    let factor = network.config().decay.factor;
    let sweep_at = T0 + stale_after + 100;

    // Touch x->strong shortly before the sweep; x->weak stays idle.
    stores
        .graph
        .upsert_edge(
            &key("x", "strong"),
            EdgeInit {
                weight: 0.5,
                base_similarity: 1.0,
            },
            sweep_at - 10,
        )
        .unwrap();

    let report = network.run_sweeps_at(sweep_at).unwrap();
    assert_eq!(report.edges_decayed, 1);

    let strong = stores.graph.get_edge(&key("x", "strong")).unwrap().unwrap();
    let weak = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    assert!((strong.weight - 0.8).abs() < 1e-6);
    assert!((weak.weight - 0.2 * factor).abs() < 1e-6);

    // A second sweep at the same instant decays nothing more.
    let again = network.run_sweeps_at(sweep_at).unwrap();
    assert_eq!(again.edges_decayed, 0);
    let weak_again = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    assert!((weak_again.weight - weak.weight).abs() < f32::EPSILON);
}

#[test]
fn test_decay_never_drops_below_floor() {
    let (network, stores) = two_neighbour_network(1);
    let stale_after = network.config().decay.stale_after_secs;
    let mut now = T0 + stale_after;
    for _ in 0..200 {
        now += 1;
        network.run_sweeps_at(now).unwrap();
    }
    let weak = stores.graph.get_edge(&key("x", "weak")).unwrap().unwrap();
    assert!(weak.weight >= 0.01);
    assert!((weak.weight - 0.01).abs() < 1e-4);
}
