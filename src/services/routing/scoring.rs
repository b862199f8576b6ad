//! Composite routing score.
//!
//! ```text
//! score = w_edge · edge_weight
//!       + w_sim  · (s + fuzzy_weight · overlap · (1 − s))
//!       + w_cap  · capability_boost
//! ```
//!
//! `s` is the clamped cosine between the nutrient and the candidate profile,
//! `overlap` the fuzzy match of required tags against the candidate's
//! capability and tool tags, `capability_boost` the fraction of required
//! capabilities the candidate has exactly.

use crate::config::RoutingConfig;
use std::collections::BTreeSet;

/// Weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Edge weight term.
    pub edge: f32,
    /// Effective similarity term.
    pub similarity: f32,
    /// Capability boost term.
    pub capability: f32,
    /// Share of the similarity gap closed by tag overlap.
    pub fuzzy: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for ScoreWeights {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            edge: config.edge_weight,
            similarity: config.similarity_weight,
            capability: config.capability_weight,
            fuzzy: config.fuzzy_weight.clamp(0.0, 1.0),
        }
    }
}

impl ScoreWeights {
    /// Combines the three terms.
    #[must_use]
    pub fn composite(&self, edge_weight: f32, effective_similarity: f32, boost: f32) -> f32 {
        self.edge.mul_add(
            edge_weight,
            self.similarity
                .mul_add(effective_similarity, self.capability * boost),
        )
    }
}

/// Splits a tag into lowercase alphanumeric tokens.
#[must_use]
pub fn tokenize(tag: &str) -> BTreeSet<String> {
    tag.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the token sets of two tags.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn token_jaccard(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f32 / union as f32
}

/// Scores one required tag against one candidate tag: 1.0 on a
/// case-insensitive exact match, token Jaccard otherwise.
#[must_use]
pub fn tag_match(required: &str, tag: &str) -> f32 {
    if required.trim().eq_ignore_ascii_case(tag.trim()) {
        1.0
    } else {
        token_jaccard(required, tag)
    }
}

/// Average over required tags of each tag's best match among `tags`.
///
/// Returns 0.0 when nothing is required or the candidate has no tags.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fuzzy_overlap<'a>(required: &[String], tags: impl Iterator<Item = &'a str> + Clone) -> f32 {
    if required.is_empty() {
        return 0.0;
    }
    let total: f32 = required
        .iter()
        .map(|req| {
            tags.clone()
                .map(|tag| tag_match(req, tag))
                .fold(0.0_f32, f32::max)
        })
        .sum();
    (total / required.len() as f32).clamp(0.0, 1.0)
}

/// Fraction of required capabilities the candidate declares exactly.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn capability_boost(required: &[String], capabilities: &BTreeSet<String>) -> f32 {
    if required.is_empty() {
        return 0.0;
    }
    let matched = required
        .iter()
        .filter(|req| capabilities.contains(req.as_str()))
        .count();
    matched as f32 / required.len() as f32
}

/// Raises `similarity` toward 1.0 by `fuzzy_weight · overlap` of the gap.
#[must_use]
pub fn effective_similarity(similarity: f32, overlap: f32, fuzzy_weight: f32) -> f32 {
    let s = if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    };
    (fuzzy_weight * overlap).mul_add(1.0 - s, s)
}
