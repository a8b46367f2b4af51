//! Query retrieval: embed, nearest-neighbour lookup, similarity floor.
//!
//! # Algorithm
//!
//! 1. Blank query, `k = 0`, or empty store → empty result (no embedding call).
//! 2. Embed the query with the same [`Embedder`] that built the store
//!    (same model name and dims, checked at construction).
//!    A vector of the wrong length is a fatal configuration error.
//! 3. Ask the [`VectorIndex`] for the `k` nearest chunks by cosine similarity.
//! 4. Drop hits below the similarity floor. An empty result is a valid
//!    "no relevant context" outcome, not an error.
//! 5. Assign 1-based ranks in descending similarity order.
//!
//! Retrieval is read-only; any number of calls may run concurrently.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{CopilotError, Result};
use crate::models::ScoredChunk;
use crate::store::{ChunkStore, VectorIndex};

/// Turns a raw query into ranked, floor-filtered chunks.
pub struct Retriever {
    store: Arc<ChunkStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    similarity_floor: f32,
}

impl Retriever {
    /// Assemble a retriever, verifying that store, index, and embedder agree.
    ///
    /// # Errors
    ///
    /// [`CopilotError::Configuration`] if the embedder's model name or
    /// dimensionality differs from the store's, or the index was not built
    /// from the store.
    pub fn new(
        store: Arc<ChunkStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        similarity_floor: f32,
    ) -> Result<Self> {
        if embedder.model_name() != store.model() {
            return Err(CopilotError::configuration(format!(
                "embedder model {} does not match chunk store model {}",
                embedder.model_name(),
                store.model()
            )));
        }
        if embedder.dims() != store.dims() {
            return Err(CopilotError::configuration(format!(
                "embedder {} produces {} dims but chunk store ({}) has {}",
                embedder.model_name(),
                embedder.dims(),
                store.model(),
                store.dims()
            )));
        }
        if index.dims() != store.dims() || index.len() != store.len() {
            return Err(CopilotError::configuration(format!(
                "vector index ({} vectors, {} dims) does not match chunk store ({} chunks, {} dims)",
                index.len(),
                index.dims(),
                store.len(),
                store.dims()
            )));
        }
        if !similarity_floor.is_finite() || !(-1.0..=1.0).contains(&similarity_floor) {
            return Err(CopilotError::configuration(
                "similarity floor must be within [-1.0, 1.0]",
            ));
        }
        Ok(Self {
            store,
            index,
            embedder,
            similarity_floor,
        })
    }

    /// Convenience constructor using the brute-force [`FlatIndex`](crate::store::FlatIndex).
    pub fn with_flat_index(
        store: Arc<ChunkStore>,
        embedder: Arc<dyn Embedder>,
        similarity_floor: f32,
    ) -> Result<Self> {
        let index = Arc::new(store.build_flat_index());
        Self::new(store, index, embedder, similarity_floor)
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn similarity_floor(&self) -> f32 {
        self.similarity_floor
    }

    /// Retrieve at most `k` chunks with similarity ≥ the floor, best first.
    ///
    /// # Errors
    ///
    /// - [`CopilotError::RetrievalUnavailable`] if the embedder call fails.
    /// - [`CopilotError::Configuration`] if the embedder returns a vector of
    ///   the wrong dimensionality.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() || k == 0 || self.store.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| CopilotError::RetrievalUnavailable(format!("{:#}", e)))?;

        if query_vec.len() != self.store.dims() {
            return Err(CopilotError::configuration(format!(
                "embedder {} returned {} dims, chunk store expects {}",
                self.embedder.model_name(),
                query_vec.len(),
                self.store.dims()
            )));
        }
        if query_vec.iter().any(|x| !x.is_finite()) {
            return Err(CopilotError::RetrievalUnavailable(
                "query embedding contains non-finite values".to_string(),
            ));
        }

        let hits = self.index.search(&query_vec, k);
        let candidates = hits.len();

        let results: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|h| h.similarity >= self.similarity_floor)
            .filter_map(|h| {
                self.store.get(h.position).map(|chunk| (chunk.clone(), h.similarity))
            })
            .enumerate()
            .map(|(i, (chunk, score))| ScoredChunk {
                chunk,
                score,
                rank: i + 1,
            })
            .collect();

        debug!(
            candidates,
            kept = results.len(),
            floor = self.similarity_floor,
            top_score = results.first().map(|r| r.score),
            "retrieval complete"
        );

        Ok(results)
    }
}
