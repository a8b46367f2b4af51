//! # Docpilot
//!
//! **A documentation support copilot with calibrated confidence and human
//! escalation.**
//!
//! Docpilot answers questions against a fixed documentation corpus. Each
//! query is embedded, matched against a precomputed chunk store, answered
//! by a generative model grounded in the matching chunks, scored with a
//! calibrated confidence, and routed through an escalation policy that
//! decides whether a human should step in.
//!
//! The engine itself lives in [`docpilot_core`]. This crate adds the
//! runtime around it:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`embedding`] | OpenAI-compatible query embedder |
//! | [`llm`] | OpenAI-compatible chat completion client |
//! | [`generator`] | Answer generation with a deadline |
//! | [`copilot`] | The `answer(query, session_key)` entry point |
//! | [`history`] | JSON session archive |
//! | [`server`] | HTTP transport (axum) |
//! | [`cli`] | Terminal rendering for the `docpilot` binary |
//!
//! ## Configuration
//!
//! ```toml
//! [store]
//! path = "data/chunks.json"
//!
//! [retrieval]
//! top_k = 5
//! similarity_floor = 0.3
//!
//! [escalation]
//! escalation_threshold = 30
//! warn_threshold = 50
//! admin_channel = "support-oncall"
//! ```
//!
//! See `config/docpilot.example.toml` for every option.

pub mod cli;
pub mod config;
pub mod copilot;
pub mod embedding;
pub mod generator;
pub mod history;
pub mod llm;
pub mod logging;
pub mod server;

pub use copilot::{AnswerResponse, Copilot, EscalationResponse, ESCALATION_ACK, UNAVAILABLE_ANSWER};
