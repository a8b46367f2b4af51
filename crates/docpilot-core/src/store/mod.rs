//! Chunk store and vector index.
//!
//! The [`ChunkStore`] is the read-only collection of documentation chunks
//! built offline. It is validated once at load: a store that fails
//! validation is a fatal [`Configuration`](CopilotError::Configuration)
//! error, never a per-query one.
//!
//! The [`VectorIndex`] trait abstracts nearest-neighbour lookup so that an
//! approximate index can replace the brute-force [`FlatIndex`] without
//! touching the retriever. Implementations must be `Send + Sync`; once
//! built they are shared across concurrent queries without locking.

pub mod flat;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::embedding::l2_normalize;
use crate::error::{CopilotError, Result};
use crate::models::Chunk;

pub use flat::FlatIndex;

/// Similarity tolerance under which two scores are considered tied.
pub const SCORE_TOLERANCE: f32 = 1e-6;

/// A single nearest-neighbour hit: position in the store plus similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub position: usize,
    pub similarity: f32,
}

/// Abstract nearest-neighbour index over chunk embeddings.
///
/// Hits must be ordered by similarity descending, ties (within
/// [`SCORE_TOLERANCE`]) broken by ascending insertion position.
pub trait VectorIndex: Send + Sync {
    /// Dimensionality of the indexed vectors.
    fn dims(&self) -> usize;
    /// Number of indexed vectors.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Return up to `k` nearest vectors to `query` by cosine similarity.
    fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit>;
}

/// On-disk shape of a chunk store produced by the offline indexer.
#[derive(Debug, Deserialize)]
struct StoreFile {
    model: String,
    dims: usize,
    #[serde(default)]
    chunks: Vec<Chunk>,
}

/// Immutable, validated collection of chunks.
///
/// Every embedding is L2-normalized at construction so that inner product
/// equals cosine similarity.
#[derive(Debug)]
pub struct ChunkStore {
    model: String,
    dims: usize,
    chunks: Vec<Arc<Chunk>>,
}

impl ChunkStore {
    /// Build a store, validating ids and embeddings.
    ///
    /// # Errors
    ///
    /// [`CopilotError::Configuration`] when `dims` is zero, an id is empty or
    /// duplicated, or an embedding has the wrong length or non-finite values.
    pub fn new(model: impl Into<String>, dims: usize, chunks: Vec<Chunk>) -> Result<Self> {
        if dims == 0 {
            return Err(CopilotError::configuration("chunk store dims must be > 0"));
        }

        let mut seen = HashSet::with_capacity(chunks.len());
        let mut stored = Vec::with_capacity(chunks.len());

        for mut chunk in chunks {
            if chunk.id.trim().is_empty() {
                return Err(CopilotError::configuration("chunk with empty id"));
            }
            if !seen.insert(chunk.id.clone()) {
                return Err(CopilotError::configuration(format!(
                    "duplicate chunk id: {}",
                    chunk.id
                )));
            }
            if chunk.embedding.len() != dims {
                return Err(CopilotError::configuration(format!(
                    "chunk {} has {} embedding components, store dims is {}",
                    chunk.id,
                    chunk.embedding.len(),
                    dims
                )));
            }
            if chunk.embedding.iter().any(|x| !x.is_finite()) {
                return Err(CopilotError::configuration(format!(
                    "chunk {} has a non-finite embedding value",
                    chunk.id
                )));
            }
            l2_normalize(&mut chunk.embedding);
            stored.push(Arc::new(chunk));
        }

        Ok(Self {
            model: model.into(),
            dims,
            chunks: stored,
        })
    }

    /// Parse and validate a JSON store document:
    /// `{ "model": "...", "dims": N, "chunks": [ ... ] }`.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let file: StoreFile = serde_json::from_slice(bytes)
            .map_err(|e| CopilotError::configuration(format!("corrupt chunk store: {}", e)))?;
        Self::new(file.model, file.dims, file.chunks)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk at insertion position `pos`.
    pub fn get(&self, pos: usize) -> Option<&Arc<Chunk>> {
        self.chunks.get(pos)
    }

    pub fn find(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.iter()
    }

    /// Build the brute-force index over this store's embeddings.
    pub fn build_flat_index(&self) -> FlatIndex {
        FlatIndex::new(
            self.dims,
            self.chunks.iter().map(|c| c.embedding.clone()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: format!("text of {}", id),
            title: format!("Title {}", id),
            url: Some(format!("https://docs.example.com/{}", id)),
            category: Some("general".to_string()),
            embedding,
        }
    }

    #[test]
    fn test_store_normalizes_embeddings() {
        let store = ChunkStore::new("m", 2, vec![chunk("a", vec![3.0, 4.0])]).unwrap();
        let e = &store.get(0).unwrap().embedding;
        assert!((e[0] - 0.6).abs() < 1e-6);
        assert!((e[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_store_rejects_duplicate_ids() {
        let err = ChunkStore::new(
            "m",
            2,
            vec![chunk("a", vec![1.0, 0.0]), chunk("a", vec![0.0, 1.0])],
        )
        .unwrap_err();
        assert!(matches!(err, CopilotError::Configuration(_)));
        assert!(err.to_string().contains("duplicate chunk id"));
    }

    #[test]
    fn test_store_rejects_dimension_mismatch() {
        let err = ChunkStore::new("m", 3, vec![chunk("a", vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(err, CopilotError::Configuration(_)));
    }

    #[test]
    fn test_store_rejects_zero_dims_and_nan() {
        assert!(ChunkStore::new("m", 0, Vec::new()).is_err());
        assert!(ChunkStore::new("m", 2, vec![chunk("a", vec![f32::NAN, 1.0])]).is_err());
    }

    #[test]
    fn test_empty_store_is_valid() {
        let store = ChunkStore::new("m", 4, Vec::new()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.build_flat_index().len(), 0);
    }

    #[test]
    fn test_from_json_slice() {
        let json = br#"{
            "model": "mini",
            "dims": 2,
            "chunks": [
                {"id": "c1", "text": "Discord setup", "title": "Discord Integration Guide",
                 "url": "https://docs.example.com/discord", "category": "integrations",
                 "embedding": [1.0, 0.0]},
                {"id": "c2", "text": "Billing", "title": "Billing", "embedding": [0.0, 2.0]}
            ]
        }"#;
        let store = ChunkStore::from_json_slice(json).unwrap();
        assert_eq!(store.model(), "mini");
        assert_eq!(store.dims(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.find("c2").unwrap().url, None);
        assert_eq!(store.find("c1").unwrap().title, "Discord Integration Guide");
    }

    #[test]
    fn test_from_json_slice_corrupt() {
        let err = ChunkStore::from_json_slice(b"{not json").unwrap_err();
        assert!(err.to_string().contains("corrupt chunk store"));
    }
}
