//! Data models for hyphanet.
//!
//! Every entity carries a [`TenantId`]; there are no cross-tenant references.

mod agent;
mod edge;
mod events;
mod ids;
mod memory;
mod nutrient;
mod quota;
mod route;

pub use agent::{Agent, AgentMetrics, AgentStatus};
pub use edge::{
    DEFAULT_INITIAL_WEIGHT, DecayPass, Edge, EdgeInit, EdgeStats, MAX_EDGE_WEIGHT,
    MIN_EDGE_WEIGHT, WeightBounds,
};
pub use events::{EventMeta, NetworkEvent};
pub use ids::{AgentId, EdgeKey, MemoryId, NutrientId, RouteId, TenantId, TraceId};
pub use memory::{MemoryFilter, MemoryHit, MemoryKind, MemoryRecord};
pub use nutrient::{Nutrient, NutrientDraft, NutrientState, Sensitivity, TerminalReason};
pub use quota::{MetricType, QuotaDecision, QuotaUsage, QuotaWindow};
pub use route::{Route, RouteCandidate};
