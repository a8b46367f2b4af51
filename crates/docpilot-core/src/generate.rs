//! Grounding prompt assembly and model-reply handling.
//!
//! The generative model is an injected collaborator behind the narrow
//! [`CompletionClient`] capability: given a [`Prompt`], return answer text
//! plus a self-reported confidence. This module builds the prompt from the
//! retrieved chunks and recent turns, parses raw model output, and applies
//! the ungrounded-confidence ceiling. Timeouts and transport concerns live
//! with the caller.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{ScoredChunk, Turn};

/// Longest slice of a previous answer carried into the prompt.
const HISTORY_ANSWER_CHARS: usize = 500;

/// A chat-style prompt: system instructions plus the user payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Whether any documentation context was supplied.
    pub grounded: bool,
}

/// Raw result of a completion call, before clamping and capping.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Model self-assessment; may be out of range, it is clamped later.
    pub confidence: i64,
}

/// Answer text plus a self-reported confidence guaranteed to be in `[0, 100]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub text: String,
    pub self_reported: u8,
    pub grounded: bool,
}

/// Capability interface for the external generative model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider identifier, for logs.
    fn name(&self) -> &str;
    /// Run the prompt and return answer text with a confidence estimate.
    async fn complete(&self, prompt: &Prompt) -> Result<Completion>;
}

const REPLY_FORMAT: &str = "Reply with a single JSON object and nothing else: \
{\"answer\": \"<your answer>\", \"confidence\": <integer 0-100>}. \
The confidence is how likely your answer is correct and complete.";

/// Build the grounding prompt.
///
/// `history` should already be bounded to the last few turns; answered
/// turns are rendered oldest first and escalation requests are skipped. With no `chunks`, the system instructions tell
/// the model to state that the documentation does not cover the question.
pub fn build_prompt(query: &str, chunks: &[ScoredChunk], history: &[Turn]) -> Prompt {
    let grounded = !chunks.is_empty();

    let system = if grounded {
        format!(
            "You are a documentation support assistant. Answer the user's question \
             using only the documentation context provided. Cite sources by their \
             [Source n] marker. If the context does not answer the question, say so. {}",
            REPLY_FORMAT
        )
    } else {
        format!(
            "You are a documentation support assistant. No documentation matched the \
             user's question. Say explicitly that you could not find this in the \
             documentation and that your reply is not grounded in it; do not invent \
             product details. Report a low confidence. {}",
            REPLY_FORMAT
        )
    };

    let mut user = String::new();

    let answered: Vec<&Turn> = history.iter().filter(|t| t.is_answer()).collect();
    if !answered.is_empty() {
        user.push_str("Conversation so far:\n");
        for turn in answered {
            user.push_str("User: ");
            user.push_str(&turn.query);
            user.push_str("\nAssistant: ");
            user.push_str(&truncate_chars(&turn.answer, HISTORY_ANSWER_CHARS));
            user.push('\n');
        }
        user.push('\n');
    }

    if grounded {
        user.push_str("Documentation context:\n");
        for sc in chunks {
            let chunk = &sc.chunk;
            match &chunk.url {
                Some(url) => user.push_str(&format!("[Source {}: {} ({})]\n", sc.rank, chunk.title, url)),
                None => user.push_str(&format!("[Source {}: {}]\n", sc.rank, chunk.title)),
            }
            user.push_str(chunk.text.trim());
            user.push_str("\n\n");
        }
    } else {
        user.push_str("Documentation context: none found.\n\n");
    }

    user.push_str("Question: ");
    user.push_str(query.trim());

    Prompt {
        system,
        user,
        grounded,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

#[derive(Deserialize)]
struct JsonReply {
    answer: String,
    confidence: serde_json::Value,
}

/// Parse raw model output into a [`Completion`].
///
/// Accepted shapes:
/// - a JSON object `{"answer": "...", "confidence": 87}`, optionally inside
///   a ```` ```json ```` fence or surrounded by prose;
/// - plain text whose last non-empty line is `Confidence: 87` (a trailing
///   `%` is allowed).
///
/// Anything else, or an empty answer, is malformed.
pub fn parse_reply(raw: &str) -> Result<Completion> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("empty model reply");
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(reply) = serde_json::from_str::<JsonReply>(&trimmed[start..=end]) {
                let confidence = json_confidence(&reply.confidence)?;
                let text = reply.answer.trim().to_string();
                if text.is_empty() {
                    bail!("model reply has an empty answer");
                }
                return Ok(Completion { text, confidence });
            }
        }
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if let Some(last) = lines.pop() {
        if let Some(confidence) = confidence_line(last) {
            let text = lines.join("\n").trim().to_string();
            if text.is_empty() {
                bail!("model reply has an empty answer");
            }
            return Ok(Completion { text, confidence });
        }
    }

    bail!("malformed model reply: no confidence found")
}

fn json_confidence(value: &serde_json::Value) -> Result<i64> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    if let Some(f) = value.as_f64() {
        if f.is_finite() {
            return Ok(f.round() as i64);
        }
    }
    if let Some(s) = value.as_str() {
        if let Ok(i) = s.trim().trim_end_matches('%').trim().parse::<i64>() {
            return Ok(i);
        }
    }
    bail!("model reply has a non-numeric confidence: {}", value)
}

fn confidence_line(line: &str) -> Option<i64> {
    let line = line.trim().trim_matches('*').trim();
    let (label, value) = line.split_once(':')?;
    if !label.trim().eq_ignore_ascii_case("confidence") {
        return None;
    }
    value
        .trim()
        .trim_matches('*')
        .trim_end_matches('%')
        .trim()
        .parse::<i64>()
        .ok()
}

/// Clamp the model's confidence to `[0, 100]`, then cap it when the answer
/// had no grounding context.
pub fn finalize(completion: Completion, grounded: bool, ungrounded_cap: u8) -> GeneratedAnswer {
    let mut confidence = completion.confidence.clamp(0, 100) as u8;
    if !grounded {
        confidence = confidence.min(ungrounded_cap.min(100));
    }
    GeneratedAnswer {
        text: completion.text,
        self_reported: confidence,
        grounded,
    }
}
