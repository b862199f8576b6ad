//! Network services.
//!
//! Services orchestrate the storage backends and implement the network's
//! operations. [`HyphaeNetwork`] wires them together over one set of stores.

mod feedback;
mod graph;
mod lifecycle;
pub mod mmr;
mod network;
mod quota;
mod recall;
pub mod routing;
mod sweep;

pub use feedback::{OutcomeFeedbackLoop, OutcomeSummary};
pub use graph::{GraphService, Reinforcement, adaptive_neighbor_limit};
pub use lifecycle::{BroadcastResult, HopOutcome, LifecycleDeps, NutrientLifecycleManager};
pub use network::{HyphaeNetwork, NetworkStats};
pub use quota::QuotaService;
pub use recall::MemoryService;
pub use routing::{Candidate, RoutingPolicyEngine, RoutingRequest, ScoreWeights, ScoredCandidate};
pub use sweep::{SweepReport, SweepService};
