//! Answer generation with a deadline.
//!
//! Wraps an injected [`CompletionClient`]: builds the grounding prompt
//! from the retrieved chunks and the last few turns, runs the call under
//! `tokio::time::timeout`, and maps every failure (timeout, transport,
//! malformed reply) to [`CopilotError::GenerationUnavailable`]. No retries
//! happen here.

use std::sync::Arc;
use std::time::Duration;

use docpilot_core::generate::{build_prompt, finalize};
use docpilot_core::{CompletionClient, CopilotError, GeneratedAnswer, ScoredChunk, Turn};
use tracing::{debug, warn};

use crate::config::GenerationConfig;

pub struct AnswerGenerator {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
    history_turns: usize,
    ungrounded_cap: u8,
}

impl AnswerGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        timeout: Duration,
        history_turns: usize,
        ungrounded_cap: u8,
    ) -> Self {
        Self {
            client,
            timeout,
            history_turns,
            ungrounded_cap: ungrounded_cap.min(100),
        }
    }

    pub fn from_config(client: Arc<dyn CompletionClient>, config: &GenerationConfig) -> Self {
        Self::new(
            client,
            Duration::from_secs(config.timeout_secs),
            config.history_turns,
            config.ungrounded_confidence_cap,
        )
    }

    pub fn history_turns(&self) -> usize {
        self.history_turns
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Generate an answer for `query`.
    ///
    /// `history` is the session's turns, oldest first; only the last
    /// `history_turns` reach the prompt. With no `chunks` the reply is
    /// marked ungrounded and its confidence capped.
    pub async fn generate(
        &self,
        query: &str,
        chunks: &[ScoredChunk],
        history: &[Turn],
    ) -> docpilot_core::Result<GeneratedAnswer> {
        let start = history.len().saturating_sub(self.history_turns);
        let prompt = build_prompt(query, chunks, &history[start..]);

        let completion = match tokio::time::timeout(self.timeout, self.client.complete(&prompt)).await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                let reason = format!("{:#}", e);
                warn!(client = self.client.name(), error = %reason, "generation failed");
                return Err(CopilotError::GenerationUnavailable(reason));
            }
            Err(_) => {
                warn!(
                    client = self.client.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "generation timed out"
                );
                return Err(CopilotError::GenerationUnavailable(format!(
                    "no reply within {:?}",
                    self.timeout
                )));
            }
        };

        let answer = finalize(completion, prompt.grounded, self.ungrounded_cap);
        debug!(
            grounded = answer.grounded,
            self_reported = answer.self_reported,
            "generation complete"
        );
        Ok(answer)
    }
}
