//! Epsilon-greedy neighbour selection.

use super::scoring::{ScoreWeights, capability_boost, effective_similarity, fuzzy_overlap};
use crate::config::RoutingConfig;
use crate::embedding::unit_similarity;
use crate::models::{Agent, AgentId, Edge, Nutrient, RouteCandidate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Mutex;

/// A destination the engine may route to.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Candidate profile.
    pub agent: Agent,
    /// Edge from the source, `None` on cold start.
    pub edge: Option<Edge>,
}

/// Inputs of one source's selection within a routing pass.
#[derive(Debug)]
pub struct RoutingRequest<'a> {
    /// The nutrient being routed.
    pub nutrient: &'a Nutrient,
    /// The sending agent.
    pub source: &'a AgentId,
    /// Outgoing edges joined with cold-start matches.
    pub candidates: &'a [Candidate],
    /// Agents that may not be picked (visited, or already chosen this hop).
    pub excluded: &'a HashSet<AgentId>,
    /// Maximum destinations.
    pub fan_out: usize,
    /// Whether this pass explores; drawn once per pass by [`RoutingPolicyEngine::explore`].
    pub explore: bool,
}

/// A candidate with its composite score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Candidate agent.
    pub agent: AgentId,
    /// Composite score.
    pub score: f32,
    /// Last interaction on the edge, `None` on cold start.
    pub last_interaction: Option<u64>,
}

/// Scores candidates and picks destinations.
///
/// The random source is seeded from `RoutingConfig::seed` when set, which
/// makes exploration reproducible.
pub struct RoutingPolicyEngine {
    weights: ScoreWeights,
    rng: Mutex<StdRng>,
}

impl RoutingPolicyEngine {
    /// Creates an engine from routing configuration.
    #[must_use]
    pub fn new(config: &RoutingConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            weights: ScoreWeights::from(config),
            rng: Mutex::new(rng),
        }
    }

    /// Returns the score weights.
    #[must_use]
    pub const fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Draws the exploration decision for one routing pass.
    pub fn explore(&self, epsilon: f64) -> bool {
        if epsilon <= 0.0 {
            return false;
        }
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.random::<f64>() < epsilon
    }

    /// Scores one candidate for a nutrient.
    #[must_use]
    pub fn score(&self, nutrient: &Nutrient, agent: &Agent, edge: Option<&Edge>) -> f32 {
        let edge_weight = edge.map_or(0.0, |e| e.weight);
        let similarity = unit_similarity(&nutrient.embedding, &agent.profile_embedding);
        let overlap = fuzzy_overlap(&nutrient.required_capabilities, agent.tags());
        let boost = capability_boost(&nutrient.required_capabilities, &agent.capabilities);
        self.weights.composite(
            edge_weight,
            effective_similarity(similarity, overlap, self.weights.fuzzy),
            boost,
        )
    }

    /// Filters and ranks candidates.
    ///
    /// Excludes the source, the `excluded` set, suspended agents and agents
    /// not cleared for the nutrient's sensitivity. Order: score desc, last
    /// interaction desc (cold start last), agent id asc.
    #[must_use]
    pub fn rank(&self, request: &RoutingRequest<'_>) -> Vec<ScoredCandidate> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<ScoredCandidate> = request
            .candidates
            .iter()
            .filter(|c| {
                c.agent.id != *request.source
                    && c.agent.tenant == request.nutrient.tenant
                    && !request.excluded.contains(&c.agent.id)
                    && c.agent.status.is_routable()
                    && c.agent.is_cleared_for(request.nutrient.sensitivity)
            })
            .filter(|c| seen.insert(c.agent.id.clone()))
            .map(|c| ScoredCandidate {
                agent: c.agent.id.clone(),
                score: self.score(request.nutrient, &c.agent, c.edge.as_ref()),
                last_interaction: c.edge.as_ref().map(|e| e.last_interaction),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.last_interaction.cmp(&a.last_interaction))
                .then_with(|| a.agent.cmp(&b.agent))
        });
        ranked
    }

    /// Selects at most `fan_out` destinations.
    ///
    /// When the pass explores and unselected candidates remain, the last slot
    /// is replaced by a uniform sample from the remainder.
    #[must_use]
    pub fn select(&self, request: &RoutingRequest<'_>) -> Vec<RouteCandidate> {
        let ranked = self.rank(request);
        let take = request.fan_out.min(ranked.len());
        if take == 0 {
            return Vec::new();
        }

        let mut picks: Vec<RouteCandidate> = ranked[..take]
            .iter()
            .map(|c| RouteCandidate {
                source: request.source.clone(),
                destination: c.agent.clone(),
                score: c.score,
                explored: false,
            })
            .collect();

        if request.explore && ranked.len() > take {
            let index = {
                let mut rng = self
                    .rng
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                rng.random_range(take..ranked.len())
            };
            let sampled = &ranked[index];
            picks[take - 1] = RouteCandidate {
                source: request.source.clone(),
                destination: sampled.agent.clone(),
                score: sampled.score,
                explored: true,
            };
            metrics::counter!("routing_explorations_total").increment(1);
        }

        picks
    }
}
