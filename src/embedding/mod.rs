//! Embedding vector utilities.
//!
//! Embeddings are supplied by callers as opaque fixed-length `f32` vectors;
//! nothing in this crate produces them.

use crate::{Error, Result};

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or 0.0 if the vectors differ in length,
/// are empty, or either has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Cosine similarity clamped to `[0.0, 1.0]`.
///
/// Opposed vectors count as unrelated, never as negatively related.
#[must_use]
pub fn unit_similarity(a: &[f32], b: &[f32]) -> f32 {
    let sim = cosine_similarity(a, b);
    if sim.is_nan() { 0.0 } else { sim.clamp(0.0, 1.0) }
}

/// Checks that an embedding has the configured length and finite values.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] naming `field` on a length mismatch or a
/// non-finite component.
pub fn validate_embedding(field: &str, embedding: &[f32], dimensions: usize) -> Result<()> {
    if embedding.len() != dimensions {
        return Err(Error::InvalidInput(format!(
            "{field} has {} dimensions, expected {dimensions}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "{field} contains non-finite values"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unit_similarity_clamps_negative() {
        assert!(unit_similarity(&[1.0, 0.0], &[-1.0, 0.0]).abs() < f32::EPSILON);
        assert!((unit_similarity(&[3.0, 4.0], &[3.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding("embedding", &[0.1, 0.2], 2).is_ok());
        assert!(matches!(
            validate_embedding("embedding", &[0.1], 2),
            Err(Error::InvalidInput(_))
        ));
        assert!(validate_embedding("embedding", &[f32::NAN, 0.0], 2).is_err());
    }
}
