//! Routing records.

use super::{AgentId, EdgeKey, NutrientId, RouteId, TenantId, TraceId};
use serde::{Deserialize, Serialize};

/// An append-only record of one nutrient delivery.
///
/// The only mutation a route ever sees is attaching its outcome, once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Unique identifier.
    pub id: RouteId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// The routed nutrient.
    pub nutrient_id: NutrientId,
    /// Trace shared with the nutrient.
    pub trace_id: TraceId,
    /// Sending agent.
    pub source: AgentId,
    /// Receiving agent.
    pub destination: AgentId,
    /// Hop number, starting at 1.
    pub hop: u32,
    /// Composite routing score at selection time.
    pub score: f32,
    /// `true` if the destination was picked by exploration.
    pub explored: bool,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Outcome score once attributed.
    pub outcome_score: Option<f32>,
}

impl Route {
    /// Returns the key of the edge this route travelled.
    #[must_use]
    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey::new(
            self.tenant.clone(),
            self.source.clone(),
            self.destination.clone(),
        )
    }
}

/// A route selected by the policy engine but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    /// Sending agent.
    pub source: AgentId,
    /// Receiving agent.
    pub destination: AgentId,
    /// Composite score.
    pub score: f32,
    /// Picked by exploration.
    pub explored: bool,
}
