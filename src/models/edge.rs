//! Weighted edges between agents.

use super::EdgeKey;
use serde::{Deserialize, Serialize};

/// Lowest weight an edge can reach.
pub const MIN_EDGE_WEIGHT: f32 = 0.01;

/// Highest weight an edge can reach.
pub const MAX_EDGE_WEIGHT: f32 = 1.5;

/// Weight assigned to lazily-created edges.
pub const DEFAULT_INITIAL_WEIGHT: f32 = 0.5;

/// Inclusive bounds applied after every weight update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    /// Lower bound.
    pub min: f32,
    /// Upper bound.
    pub max: f32,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            min: MIN_EDGE_WEIGHT,
            max: MAX_EDGE_WEIGHT,
        }
    }
}

impl WeightBounds {
    /// Clamps a weight into the bounds. NaN maps to the lower bound.
    #[must_use]
    pub fn clamp(&self, weight: f32) -> f32 {
        if weight.is_nan() {
            return self.min;
        }
        weight.clamp(self.min, self.max)
    }
}

/// A directed, weighted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Natural key.
    pub key: EdgeKey,
    /// Current weight in `[MIN_EDGE_WEIGHT, MAX_EDGE_WEIGHT]`.
    pub weight: f32,
    /// Cosine similarity of the two agent profiles, clamped to `[0, 1]`.
    pub base_similarity: f32,
    /// When `base_similarity` was last computed (Unix epoch seconds).
    pub similarity_refreshed_at: u64,
    /// Cumulative reinforcement applied.
    pub success_total: f32,
    /// Cumulative weight removed by decay.
    pub decay_total: f32,
    /// Last route or reinforcement (Unix epoch seconds).
    pub last_interaction: u64,
    /// Sweep timestamp of the last decay, 0 if never decayed.
    pub last_decayed_at: u64,
    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Edge {
    /// Builds a new edge from its initial parameters.
    #[must_use]
    pub const fn new(key: EdgeKey, init: EdgeInit, now: u64) -> Self {
        Self {
            key,
            weight: init.weight,
            base_similarity: init.base_similarity,
            similarity_refreshed_at: now,
            success_total: 0.0,
            decay_total: 0.0,
            last_interaction: now,
            last_decayed_at: 0,
            version: 1,
            created_at: now,
        }
    }

    /// Returns a copy reinforced by `amount`, scaled by `learning_rate`.
    ///
    /// `version` is left for the store to bump on a successful swap.
    #[must_use]
    pub fn reinforced(
        &self,
        amount: f32,
        learning_rate: f32,
        bounds: WeightBounds,
        now: u64,
    ) -> Self {
        let mut next = self.clone();
        next.success_total += amount;
        next.weight = bounds.clamp(self.weight + learning_rate * amount);
        next.last_interaction = now.max(self.last_interaction);
        next
    }
}

/// Parameters for a lazily-created edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeInit {
    /// Initial weight.
    pub weight: f32,
    /// Profile similarity at creation.
    pub base_similarity: f32,
}

impl Default for EdgeInit {
    fn default() -> Self {
        Self {
            weight: DEFAULT_INITIAL_WEIGHT,
            base_similarity: 0.0,
        }
    }
}

/// One bounded batch of a decay sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPass {
    /// Edges whose `last_interaction` is older than this are decayed.
    pub cutoff: u64,
    /// Multiplicative factor in `(0, 1]`.
    pub factor: f32,
    /// Floor for decayed weights.
    pub min_weight: f32,
    /// Identifies the sweep; an edge is decayed at most once per sweep.
    pub sweep_at: u64,
    /// Maximum number of edges touched by this batch.
    pub limit: usize,
}

/// Aggregate edge statistics for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeStats {
    /// Number of edges.
    pub edge_count: u64,
    /// Number of distinct source agents.
    pub source_count: u64,
    /// Mean weight, 0 when empty.
    pub avg_weight: f32,
    /// Minimum weight, 0 when empty.
    pub min_weight: f32,
    /// Maximum weight, 0 when empty.
    pub max_weight: f32,
}
