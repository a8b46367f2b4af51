//! # Docpilot Core
//!
//! The retrieval-and-confidence engine behind Docpilot: data models, chunk
//! store and vector index, retriever, grounding prompt and reply parsing,
//! confidence calibration, conversation sessions, and the escalation
//! policy.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. The embedding
//! and generative models are injected through the [`Embedder`] and
//! [`CompletionClient`] traits; concrete clients live in the `docpilot`
//! app crate.

pub mod calibrate;
pub mod embedding;
pub mod error;
pub mod escalation;
pub mod generate;
pub mod models;
pub mod retrieve;
pub mod session;
pub mod store;

pub use calibrate::{CalibrationParams, Calibrator};
pub use embedding::Embedder;
pub use error::{CopilotError, Result};
pub use escalation::{EscalationDecision, EscalationPolicy, EscalationState};
pub use generate::{Completion, CompletionClient, GeneratedAnswer, Prompt};
pub use models::{Chunk, NewTurn, ScoredChunk, Source, Turn, TurnKind};
pub use retrieve::Retriever;
pub use session::{ConversationSession, SessionStore, SessionSummary};
pub use store::{ChunkStore, FlatIndex, VectorIndex};
