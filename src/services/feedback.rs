//! Outcome feedback.
//!
//! An outcome reported for a trace is attached to every route recorded under
//! it and reinforces each route's edge by `score · route.score`. Attaching is
//! conditional on the route having no outcome yet, so reporting twice is a
//! no-op. A route whose reinforcement fails is released again, so a retry
//! picks it up. Explored and exploited routes are treated the same.

use super::graph::GraphService;
use super::quota::{QuotaService, require_tenant};
use crate::config::HyphanetConfig;
use crate::models::{EventMeta, MetricType, NetworkEvent, TenantId, TraceId};
use crate::security::AuditLogger;
use crate::storage::{AgentBackend, NutrientBackend};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Result of recording an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    /// The trace the outcome was reported for.
    pub trace_id: TraceId,
    /// Routes that took the outcome on this call.
    pub attributed_routes: usize,
    /// Edges reinforced on this call.
    pub updated_edges: usize,
}

/// Attributes outcomes to routes and reinforces their edges.
pub struct OutcomeFeedbackLoop {
    nutrients: Arc<dyn NutrientBackend>,
    agents: Arc<dyn AgentBackend>,
    graph: Arc<GraphService>,
    quota: Arc<QuotaService>,
    audit: Arc<AuditLogger>,
    config: Arc<HyphanetConfig>,
}

impl OutcomeFeedbackLoop {
    /// Creates a feedback loop.
    #[must_use]
    pub fn new(
        nutrients: Arc<dyn NutrientBackend>,
        agents: Arc<dyn AgentBackend>,
        graph: Arc<GraphService>,
        quota: Arc<QuotaService>,
        audit: Arc<AuditLogger>,
        config: Arc<HyphanetConfig>,
    ) -> Self {
        Self {
            nutrients,
            agents,
            graph,
            quota,
            audit,
            config,
        }
    }

    /// Records `score` for every route under `trace`.
    ///
    /// Only routes without an outcome are updated. When every route already
    /// has one, nothing changes and no quota is charged.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a score outside `[0, 1]`
    /// - [`Error::UnknownTrace`] if no route carries `trace` in `tenant`
    /// - [`Error::QuotaExceeded`] if the tenant's outcomes quota is exhausted
    /// - [`Error::ConcurrencyConflict`] if an edge stays contended; the
    ///   failed route keeps no outcome and is reinforced on retry
    #[instrument(skip(self), fields(tenant = %tenant, trace_id = %trace))]
    pub fn record_outcome_at(
        &self,
        tenant: &TenantId,
        trace: &TraceId,
        score: f32,
        now: u64,
    ) -> Result<OutcomeSummary> {
        require_tenant(tenant)?;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(Error::InvalidInput(format!(
                "outcome score must be within [0, 1], got {score}"
            )));
        }

        let routes = self.nutrients.routes_for_trace(tenant, trace)?;
        if routes.is_empty() {
            return Err(Error::UnknownTrace {
                tenant: tenant.to_string(),
                trace: trace.to_string(),
            });
        }
        let pending: Vec<_> = routes
            .into_iter()
            .filter(|r| r.outcome_score.is_none())
            .collect();
        if pending.is_empty() {
            tracing::debug!("Outcome already recorded for every route");
            return Ok(OutcomeSummary {
                trace_id: trace.clone(),
                attributed_routes: 0,
                updated_edges: 0,
            });
        }

        self.quota
            .require_at(tenant, MetricType::Outcomes, 1, Some(trace), now)?;

        let feedback = &self.config.feedback;
        let mut attributed = 0;
        let mut updated = 0;
        for route in &pending {
            if !self.nutrients.attach_outcome(tenant, &route.id, score)? {
                continue;
            }
            attributed += 1;
            if let Err(e) = self.graph.reinforce(
                &route.edge_key(),
                score * route.score,
                feedback.learning_rate,
                Some(trace),
                now,
            ) {
                // Release the route so a retry can reinforce it.
                if let Err(detach) = self.nutrients.detach_outcome(tenant, &route.id, score) {
                    tracing::warn!(
                        route_id = %route.id,
                        error = %detach,
                        "Failed to release outcome after reinforcement error"
                    );
                }
                return Err(e);
            }
            updated += 1;
            if let Err(e) = self.agents.record_outcome(
                tenant,
                &route.destination,
                score,
                feedback.success_threshold,
                now,
            ) {
                tracing::warn!(
                    agent_id = %route.destination,
                    error = %e,
                    "Failed to update agent success counters"
                );
            }
        }

        self.audit.record(&NetworkEvent::OutcomeRecorded {
            meta: EventMeta::with_timestamp("feedback", tenant.clone(), Some(trace.clone()), now),
            score,
            attributed_routes: attributed,
            updated_edges: updated,
        });
        metrics::counter!("outcomes_recorded_total").increment(1);
        metrics::histogram!("outcome_score").record(f64::from(score));
        tracing::info!(score, attributed, updated, "Recorded outcome");

        Ok(OutcomeSummary {
            trace_id: trace.clone(),
            attributed_routes: attributed,
            updated_edges: updated,
        })
    }
}
