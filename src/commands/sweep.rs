//! Sweep command handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hyphanet::{HyphaeNetwork, HyphanetConfig, SweepReport};
use tokio::sync::watch;

/// Runs one sweep, or sweeps every `interval` seconds until Ctrl-C.
///
/// # Examples
///
/// ```bash
/// # Sweep once and exit
/// hyphanet sweep
///
/// # Sweep every five minutes
/// hyphanet sweep --interval 300
/// ```
pub async fn cmd_sweep(config: HyphanetConfig, interval: Option<u64>) -> anyhow::Result<()> {
    let network = Arc::new(HyphaeNetwork::open(config).context("opening network stores")?);

    let Some(secs) = interval else {
        let sweeper = Arc::clone(&network);
        let report = tokio::task::spawn_blocking(move || sweeper.run_sweeps())
            .await
            .context("sweep task failed")??;
        display_report(&report);
        return Ok(());
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = network
        .sweeps()
        .spawn(Duration::from_secs(secs.max(1)), shutdown_rx);
    println!("Sweeping every {secs}s; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    let _ = shutdown_tx.send(true);
    handle.await.context("sweep loop failed")?;
    println!("Stopped");
    Ok(())
}

fn display_report(report: &SweepReport) {
    println!("{}", report.summary());
    if report.changed_anything() {
        println!();
        println!("  Nutrients expired:      {}", report.nutrients_expired);
        println!("  Edges decayed:          {}", report.edges_decayed);
        println!("  Similarities refreshed: {}", report.similarities_refreshed);
        println!("  Memories purged:        {}", report.memories_purged);
        println!("  Quota windows purged:   {}", report.quota_windows_purged);
    }
}
