//! Error taxonomy for the retrieval-and-confidence engine.
//!
//! Only conditions that callers must branch on are variants here. An empty
//! retrieval result ("no relevant context") is a valid outcome and is never
//! reported as an error.

use thiserror::Error;

/// Errors surfaced by the core engine.
///
/// | Variant | Scope | Recovery |
/// |---------|-------|----------|
/// | [`Configuration`](CopilotError::Configuration) | startup | fatal, abort |
/// | [`RetrievalUnavailable`](CopilotError::RetrievalUnavailable) | per query | degrade |
/// | [`GenerationUnavailable`](CopilotError::GenerationUnavailable) | per query | degrade |
/// | [`InvalidSession`](CopilotError::InvalidSession) | per query | reject, session untouched |
#[derive(Debug, Error)]
pub enum CopilotError {
    /// Embedding dimension mismatch, missing or corrupt chunk store, bad settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The query embedding could not be computed (embedder unreachable).
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The generative model failed, timed out, or returned malformed output.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Malformed session key or turn; rejected before any mutation.
    #[error("invalid session: {0}")]
    InvalidSession(String),
}

impl CopilotError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CopilotError::Configuration(msg.into())
    }

    pub fn invalid_session(msg: impl Into<String>) -> Self {
        CopilotError::InvalidSession(msg.into())
    }

    /// True for per-query failures that degrade to a low-confidence answer.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            CopilotError::RetrievalUnavailable(_) | CopilotError::GenerationUnavailable(_)
        )
    }
}

pub type Result<T, E = CopilotError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_classification() {
        assert!(CopilotError::GenerationUnavailable("timeout".into()).is_degradable());
        assert!(CopilotError::RetrievalUnavailable("down".into()).is_degradable());
        assert!(!CopilotError::configuration("dims").is_degradable());
        assert!(!CopilotError::invalid_session("empty key").is_degradable());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = CopilotError::configuration("embedding dims 384 != store dims 768");
        assert_eq!(
            err.to_string(),
            "configuration error: embedding dims 384 != store dims 768"
        );
    }
}
