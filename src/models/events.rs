//! Network events for audit and observability.

use super::{AgentId, EdgeKey, MemoryId, MetricType, NutrientId, TenantId, TerminalReason, TraceId};
use crate::current_timestamp;
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Tenant the event belongs to.
    pub tenant: TenantId,
    /// Trace the event belongs to, if any.
    pub trace_id: Option<TraceId>,
    /// Emitting component.
    pub source: &'static str,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates metadata stamped with the current time.
    #[must_use]
    pub fn new(source: &'static str, tenant: TenantId, trace_id: Option<TraceId>) -> Self {
        Self::with_timestamp(source, tenant, trace_id, current_timestamp())
    }

    /// Creates metadata with an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(
        source: &'static str,
        tenant: TenantId,
        trace_id: Option<TraceId>,
        timestamp: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant,
            trace_id,
            source,
            timestamp,
        }
    }
}

/// State changes that are recorded in the audit trail.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A nutrient was broadcast.
    NutrientCreated {
        /// Event metadata.
        meta: EventMeta,
        /// The nutrient.
        nutrient_id: NutrientId,
        /// Broadcasting agent.
        origin: AgentId,
    },
    /// A route was committed.
    RouteCreated {
        /// Event metadata.
        meta: EventMeta,
        /// The nutrient.
        nutrient_id: NutrientId,
        /// Sending agent.
        source: AgentId,
        /// Receiving agent.
        destination: AgentId,
        /// Hop number.
        hop: u32,
        /// Composite score.
        score: f32,
        /// Picked by exploration.
        explored: bool,
    },
    /// A nutrient reached a terminal state.
    NutrientTerminated {
        /// Event metadata.
        meta: EventMeta,
        /// The nutrient.
        nutrient_id: NutrientId,
        /// Why it stopped.
        reason: TerminalReason,
        /// Last routed hop.
        hop: u32,
    },
    /// An edge weight was raised by an outcome.
    EdgeReinforced {
        /// Event metadata.
        meta: EventMeta,
        /// The edge.
        edge: EdgeKey,
        /// Weight before.
        previous_weight: f32,
        /// Weight after.
        weight: f32,
    },
    /// A decay sweep lowered edge weights.
    EdgesDecayed {
        /// Event metadata.
        meta: EventMeta,
        /// Number of edges decayed.
        count: usize,
        /// Decay factor applied.
        factor: f32,
    },
    /// A quota check was denied.
    QuotaDenied {
        /// Event metadata.
        meta: EventMeta,
        /// The metric.
        metric: MetricType,
        /// Requested units.
        cost: u64,
        /// Units already used.
        used: u64,
        /// Window limit.
        limit: u64,
    },
    /// A memory record was stored.
    MemoryStored {
        /// Event metadata.
        meta: EventMeta,
        /// The record.
        memory_id: MemoryId,
        /// Authoring agent.
        agent: AgentId,
    },
    /// An outcome was attributed to a trace.
    OutcomeRecorded {
        /// Event metadata.
        meta: EventMeta,
        /// Outcome score.
        score: f32,
        /// Routes that received the outcome.
        attributed_routes: usize,
        /// Edges reinforced.
        updated_edges: usize,
    },
}

impl NetworkEvent {
    /// Returns the event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::NutrientCreated { meta, .. }
            | Self::RouteCreated { meta, .. }
            | Self::NutrientTerminated { meta, .. }
            | Self::EdgeReinforced { meta, .. }
            | Self::EdgesDecayed { meta, .. }
            | Self::QuotaDenied { meta, .. }
            | Self::MemoryStored { meta, .. }
            | Self::OutcomeRecorded { meta, .. } => meta,
        }
    }

    /// Returns the dotted event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::NutrientCreated { .. } => "nutrient.created",
            Self::RouteCreated { .. } => "route.created",
            Self::NutrientTerminated { .. } => "nutrient.terminated",
            Self::EdgeReinforced { .. } => "edge.reinforced",
            Self::EdgesDecayed { .. } => "edge.decayed",
            Self::QuotaDenied { .. } => "quota.denied",
            Self::MemoryStored { .. } => "memory.stored",
            Self::OutcomeRecorded { .. } => "outcome.recorded",
        }
    }
}
