//! Routing policy.
//!
//! Scores candidate destinations for a nutrient and selects up to `fan_out`
//! of them, occasionally exploring beyond the greedy choice.

mod engine;
pub mod scoring;

pub use engine::{Candidate, RoutingPolicyEngine, RoutingRequest, ScoredCandidate};
pub use scoring::ScoreWeights;
