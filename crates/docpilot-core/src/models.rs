//! Core data models used throughout Docpilot.
//!
//! Chunks are loaded once and shared behind `Arc`; scored chunks are
//! produced per query; turns are immutable records appended to a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of documentation text with its precomputed embedding.
///
/// Owned by the [`ChunkStore`](crate::store::ChunkStore). Never mutated
/// after the store is built.
#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub embedding: Vec<f32>,
}

/// A chunk matched by a query, with its similarity and 1-based rank.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub rank: usize,
}

impl ScoredChunk {
    pub fn to_source(&self) -> Source {
        Source {
            chunk_id: self.chunk.id.clone(),
            title: self.chunk.title.clone(),
            url: self.chunk.url.clone(),
            score: self.score,
            category: self.chunk.category.clone(),
        }
    }
}

/// Serializable snapshot of a [`ScoredChunk`], as stored in a [`Turn`]
/// and returned to transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub title: String,
    pub url: Option<String>,
    pub score: f32,
    pub category: Option<String>,
}

/// What a turn records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A query answered by the pipeline (possibly degraded).
    #[default]
    Answer,
    /// The user asked for a human instead of an answer.
    EscalationRequest,
}

/// One answered query within a conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub query: String,
    pub answer: String,
    /// Final calibrated confidence, always in `[0, 100]`.
    pub confidence: u8,
    pub sources: Vec<Source>,
    pub timestamp: DateTime<Utc>,
    pub escalated: bool,
    #[serde(default)]
    pub kind: TurnKind,
}

impl Turn {
    pub fn is_answer(&self) -> bool {
        self.kind == TurnKind::Answer
    }
}

/// A turn that has not been timestamped yet.
///
/// [`SessionStore::record_turn`](crate::session::SessionStore::record_turn)
/// stamps it under the session's writer lock so that concurrent requests
/// for the same key can never append out of time order.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub query: String,
    pub answer: String,
    pub confidence: u8,
    pub sources: Vec<Source>,
    pub escalated: bool,
}

impl NewTurn {
    pub fn into_turn(self, timestamp: DateTime<Utc>) -> Turn {
        Turn {
            id: uuid::Uuid::new_v4().to_string(),
            query: self.query,
            answer: self.answer,
            confidence: self.confidence,
            sources: self.sources,
            timestamp,
            escalated: self.escalated,
            kind: TurnKind::Answer,
        }
    }
}
