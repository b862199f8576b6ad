//! Maximal marginal relevance re-ranking.
//!
//! Picks hits one at a time, maximizing
//! `λ · relevance − (1 − λ) · max similarity to the hits already picked`.
//! The pairwise similarity matrix is computed once per search.

use crate::embedding::unit_similarity;
use crate::models::MemoryHit;

/// Symmetric pairwise similarity of a set of embeddings.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f32>,
}

impl SimilarityMatrix {
    /// Computes the matrix for `hits`.
    #[must_use]
    pub fn for_hits(hits: &[MemoryHit]) -> Self {
        let size = hits.len();
        let mut values = vec![0.0; size * size];
        for i in 0..size {
            values[i * size + i] = 1.0;
            for j in (i + 1)..size {
                let sim = unit_similarity(&hits[i].record.embedding, &hits[j].record.embedding);
                values[i * size + j] = sim;
                values[j * size + i] = sim;
            }
        }
        Self { size, values }
    }

    /// Similarity of hits `i` and `j`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.values[i * self.size + j]
    }

    /// Number of hits covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the matrix covers no hits.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Largest similarity between two distinct hits among the first `n`.
    #[must_use]
    pub fn max_mutual(&self, n: usize) -> f32 {
        let n = n.min(self.size);
        let mut max = 0.0_f32;
        for i in 0..n {
            for j in (i + 1)..n {
                max = max.max(self.get(i, j));
            }
        }
        max
    }
}

/// Re-ranks `hits` (ordered by relevance) with MMR and keeps `k`.
///
/// Ties go to the earlier, more relevant hit.
#[must_use]
pub fn mmr_rerank(
    hits: Vec<MemoryHit>,
    matrix: &SimilarityMatrix,
    lambda: f32,
    k: usize,
) -> Vec<MemoryHit> {
    let k = k.min(hits.len());
    let mut picked: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..hits.len()).collect();

    while picked.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &candidate) in remaining.iter().enumerate() {
            let redundancy = picked
                .iter()
                .map(|&p| matrix.get(candidate, p))
                .fold(0.0_f32, f32::max);
            let score = lambda.mul_add(hits[candidate].relevance, -(1.0 - lambda) * redundancy);
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        picked.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<MemoryHit>> = hits.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Applies MMR when the top `k` hits are near-duplicates, otherwise keeps
/// the relevance order. Returns at most `k` hits.
#[must_use]
pub fn diversify(hits: Vec<MemoryHit>, k: usize, threshold: f32, lambda: f32) -> Vec<MemoryHit> {
    if hits.len() < 2 || k < 2 {
        let mut hits = hits;
        hits.truncate(k);
        return hits;
    }
    let matrix = SimilarityMatrix::for_hits(&hits);
    if matrix.max_mutual(k) < threshold {
        let mut hits = hits;
        hits.truncate(k);
        return hits;
    }
    metrics::counter!("memory_mmr_reranks_total").increment(1);
    mmr_rerank(hits, &matrix, lambda, k)
}
