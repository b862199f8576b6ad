//! Stats command handler.

use anyhow::Context;
use hyphanet::{HyphaeNetwork, HyphanetConfig, NetworkStats, TenantId};

/// Prints statistics for one tenant.
pub fn cmd_stats(config: HyphanetConfig, tenant: &str, json: bool) -> anyhow::Result<()> {
    let network = HyphaeNetwork::open(config).context("opening network stores")?;
    let stats = network.stats(&TenantId::new(tenant))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        display_stats(&stats);
    }
    Ok(())
}

fn display_stats(stats: &NetworkStats) {
    println!("Tenant: {}", stats.tenant);
    println!("=======");
    println!();
    println!("Agents:   {}", stats.agents);
    println!("Memories: {}", stats.memories);
    println!();

    println!("Nutrients:");
    if stats.nutrients.is_empty() {
        println!("  (none)");
    }
    for (state, count) in &stats.nutrients {
        println!("  {state:<12} {count}");
    }
    println!();

    let edges = &stats.edges;
    println!("Edges: {} from {} sources", edges.edge_count, edges.source_count);
    if edges.edge_count > 0 {
        println!(
            "  weight min/avg/max: {:.3} / {:.3} / {:.3}",
            edges.min_weight, edges.avg_weight, edges.max_weight
        );
    }
    println!();

    println!("Quotas (current window):");
    for usage in &stats.quotas {
        println!(
            "  {:<14} {:>8} / {:<8} resets at {}",
            usage.metric.as_str(),
            usage.used,
            usage.limit,
            usage.window_end
        );
    }
}
