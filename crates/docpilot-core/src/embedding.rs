//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that query-embedding backends implement,
//! plus the normalization and inner-product helpers the flat index uses.
//!
//! Concrete embedders (OpenAI-compatible HTTP) live in the `docpilot` app
//! crate. The embedder used at query time must be the exact function that
//! produced the chunk store; the [`Retriever`](crate::retrieve::Retriever)
//! enforces a matching model name and dimensionality.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for query embedders.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale a vector to unit L2 norm in place.
///
/// Zero (or near-zero) vectors are left untouched; their similarity to
/// anything is `0.0`.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Inner product of two equal-length vectors.
///
/// Equals cosine similarity when both inputs are L2-normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_untouched() {
        let mut v = vec![0.0f32, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dot_of_normalized_vectors_is_cosine() {
        let mut a = vec![3.0f32, 4.0];
        let mut b = vec![4.0f32, 3.0];
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        assert!((dot(&a, &b) - 0.96).abs() < 1e-6);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-6);
    }
}
