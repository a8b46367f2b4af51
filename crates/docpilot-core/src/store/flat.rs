//! Brute-force [`VectorIndex`] implementation.
//!
//! Exact inner-product search over L2-normalized vectors held in a `Vec`.
//! Read-only after construction, so concurrent searches need no locking.

use std::cmp::Reverse;

use crate::embedding::{dot, l2_normalize};

use super::{IndexHit, VectorIndex, SCORE_TOLERANCE};

/// Exact nearest-neighbour index. Positions are insertion order.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Build an index; every vector is normalized on the way in.
    pub fn new(dims: usize, vectors: Vec<Vec<f32>>) -> Self {
        let vectors = vectors
            .into_iter()
            .map(|mut v| {
                l2_normalize(&mut v);
                v
            })
            .collect();
        Self { dims, vectors }
    }
}

/// Bucket a similarity so that scores within [`SCORE_TOLERANCE`] compare equal.
///
/// Quantizing keeps the sort key a total order, which a tolerance-based
/// comparator would not be.
fn tie_bucket(similarity: f32) -> i64 {
    (f64::from(similarity) / f64::from(SCORE_TOLERANCE)).round() as i64
}

impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
        if k == 0 || query.len() != self.dims || self.vectors.is_empty() {
            return Vec::new();
        }

        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut hits: Vec<IndexHit> = self
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(position, v)| {
                let similarity = dot(&q, v).clamp(-1.0, 1.0);
                similarity.is_finite().then_some(IndexHit {
                    position,
                    similarity,
                })
            })
            .collect();

        hits.sort_by_key(|h| (Reverse(tie_bucket(h.similarity)), h.position));
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FlatIndex {
        FlatIndex::new(
            2,
            vec![
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.7, 0.7],
                vec![-1.0, 0.0],
            ],
        )
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let hits = index().search(&[1.0, 0.0], 4);
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![0, 2, 1, 3]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[3].similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        assert_eq!(index().search(&[1.0, 0.0], 2).len(), 2);
        assert!(index().search(&[1.0, 0.0], 0).is_empty());
        assert_eq!(index().search(&[1.0, 0.0], 100).len(), 4);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let idx = FlatIndex::new(
            2,
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]],
        );
        let hits = idx.search(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_dimension_query_returns_nothing() {
        assert!(index().search(&[1.0, 0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_empty_index() {
        let idx = FlatIndex::new(3, Vec::new());
        assert!(idx.is_empty());
        assert!(idx.search(&[1.0, 0.0, 0.0], 5).is_empty());
    }
}
