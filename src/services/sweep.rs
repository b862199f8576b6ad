//! Background sweeps.
//!
//! One sweep expires overdue nutrients, decays stale edges, refreshes stale
//! base similarities, purges expired memories and drops old quota windows.
//! Every task is bounded by `sweep.batch_limit` rows per batch and
//! `sweep.max_batches` batches, so a sweep never holds a store for long.

use super::graph::GraphService;
use super::lifecycle::NutrientLifecycleManager;
use super::quota::QuotaService;
use super::recall::MemoryService;
use crate::config::SweepConfig;
use crate::{Result, current_timestamp};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Converts a duration to milliseconds, capping at `u64::MAX`.
fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Nutrients marked expired.
    pub nutrients_expired: usize,
    /// Edges decayed.
    pub edges_decayed: usize,
    /// Edges whose base similarity was recomputed.
    pub similarities_refreshed: usize,
    /// Expired memories deleted.
    pub memories_purged: usize,
    /// Quota windows deleted.
    pub quota_windows_purged: usize,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl SweepReport {
    /// Returns `true` if the sweep changed anything.
    #[must_use]
    pub const fn changed_anything(&self) -> bool {
        self.nutrients_expired
            + self.edges_decayed
            + self.similarities_refreshed
            + self.memories_purged
            + self.quota_windows_purged
            > 0
    }

    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.changed_anything() {
            return format!("Nothing to sweep ({}ms)", self.duration_ms);
        }
        format!(
            "Expired {} nutrients, decayed {} edges, refreshed {} similarities, \
             purged {} memories and {} quota windows in {}ms",
            self.nutrients_expired,
            self.edges_decayed,
            self.similarities_refreshed,
            self.memories_purged,
            self.quota_windows_purged,
            self.duration_ms
        )
    }
}

/// Runs the periodic maintenance tasks.
pub struct SweepService {
    lifecycle: Arc<NutrientLifecycleManager>,
    graph: Arc<GraphService>,
    memory: Arc<MemoryService>,
    quota: Arc<QuotaService>,
    config: SweepConfig,
}

impl SweepService {
    /// Creates a sweep service.
    #[must_use]
    pub fn new(
        lifecycle: Arc<NutrientLifecycleManager>,
        graph: Arc<GraphService>,
        memory: Arc<MemoryService>,
        quota: Arc<QuotaService>,
        config: SweepConfig,
    ) -> Self {
        Self {
            lifecycle,
            graph,
            memory,
            quota,
            config,
        }
    }

    /// Returns the sweep configuration.
    #[must_use]
    pub const fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs one sweep now.
    ///
    /// # Errors
    ///
    /// Returns the first store error; earlier tasks keep their effects.
    pub fn run_once(&self) -> Result<SweepReport> {
        self.run_once_at(current_timestamp())
    }

    /// Runs one sweep as of `now`.
    ///
    /// # Errors
    ///
    /// Returns the first store error; earlier tasks keep their effects.
    #[instrument(skip(self))]
    pub fn run_once_at(&self, now: u64) -> Result<SweepReport> {
        let start = Instant::now();
        let batch = self.config.batch_limit.max(1);
        let batches = self.config.max_batches.max(1);
        let before = now.saturating_sub(self.config.quota_retention_secs);

        let report = SweepReport {
            nutrients_expired: drain(batch, batches, || self.lifecycle.expire_due(now, batch))?,
            edges_decayed: self.graph.decay_all(now, batch, batches)?,
            similarities_refreshed: self.graph.refresh_all(now, batch)?,
            memories_purged: drain(batch, batches, || self.memory.purge_expired(now, batch))?,
            quota_windows_purged: drain(batch, batches, || {
                self.quota.purge_windows(before, batch)
            })?,
            duration_ms: duration_to_millis(start.elapsed()),
        };
        metrics::counter!("sweeps_total").increment(1);
        metrics::histogram!("sweep_duration_ms").record(start.elapsed().as_secs_f64() * 1_000.0);
        info!(
            nutrients_expired = report.nutrients_expired,
            edges_decayed = report.edges_decayed,
            similarities_refreshed = report.similarities_refreshed,
            memories_purged = report.memories_purged,
            quota_windows_purged = report.quota_windows_purged,
            duration_ms = report.duration_ms,
            "Sweep completed"
        );
        Ok(report)
    }

    /// Runs a sweep every `interval` until `shutdown` flips to `true` or its
    /// sender is dropped.
    ///
    /// Each sweep runs on the blocking pool. A failed sweep is logged and the
    /// loop continues.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting sweep task");
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        debug!("Running sweep");
                        let service = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || service.run_once()).await {
                            Ok(Ok(report)) => debug!(summary = %report.summary(), "Sweep finished"),
                            Ok(Err(e)) => warn!(error = %e, "Sweep failed"),
                            Err(e) => warn!(error = %e, "Sweep task panicked"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown signal received, stopping sweep task");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Repeats `task` while it fills whole batches, up to `max_batches` times.
fn drain(
    batch: usize,
    max_batches: usize,
    mut task: impl FnMut() -> Result<usize>,
) -> Result<usize> {
    let mut total = 0;
    for _ in 0..max_batches {
        let n = task()?;
        total += n;
        if n < batch {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_stops_on_partial_batch() {
        let mut remaining = 7_usize;
        let total = drain(3, 10, || {
            let n = remaining.min(3);
            remaining -= n;
            Ok(n)
        })
        .unwrap();
        assert_eq!(total, 7);
    }

    #[test]
    fn test_drain_respects_max_batches() {
        let mut calls = 0;
        let total = drain(2, 3, || {
            calls += 1;
            Ok(2)
        })
        .unwrap();
        assert_eq!((total, calls), (6, 3));
    }

    #[tokio::test]
    async fn test_spawned_sweeps_stop_on_shutdown() {
        let config = crate::HyphanetConfig::default().with_audit_key("sweep");
        let network = crate::HyphaeNetwork::in_memory(config).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = network.sweeps().spawn(Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_report_summary() {
        assert!(SweepReport::default().summary().starts_with("Nothing"));
        let report = SweepReport {
            edges_decayed: 2,
            ..SweepReport::default()
        };
        assert!(report.changed_anything());
        assert!(report.summary().contains("decayed 2 edges"));
    }
}
