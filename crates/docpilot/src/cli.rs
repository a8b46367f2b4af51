//! Terminal rendering and interactive command parsing for the CLI.

use std::fmt::Write as _;

use docpilot_core::{EscalationPolicy, EscalationState, SessionSummary, Turn};

use crate::copilot::{AnswerResponse, CopilotStatus, EscalationResponse};

pub const LOW_CONFIDENCE_WARNING: &str = "Low confidence warning: this answer might not be \
accurate. Consider asking for clarification or checking the documentation directly.";

pub const ESCALATION_NOTICE: &str =
    "This question has been flagged for a human support agent.";

pub const ESCALATE_HINT: &str = "Not sure about this answer? Type 'escalate' to reach human support.";

pub const HELP_TEXT: &str = "Commands:
  <question>            Ask about the product
  history <term>        Search this session's earlier questions and answers
  summary               Show the session summary
  escalate              Ask for a human support agent
  help                  Show this help message
  quit | exit | bye     Leave the session

Example questions:
  How do I set up Discord analytics?
  How can I start a Twitter DM campaign?
  What are Topic Definitions?";

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Quit,
    Help,
    Summary,
    Escalate,
    History(String),
    /// `history` without a term.
    HistoryUsage,
    Ask(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let lower = line.to_lowercase();
    match lower.as_str() {
        "quit" | "exit" | "bye" => return ReplCommand::Quit,
        "help" => return ReplCommand::Help,
        "summary" => return ReplCommand::Summary,
        "escalate" => return ReplCommand::Escalate,
        "history" => return ReplCommand::HistoryUsage,
        _ => {}
    }
    const PREFIX: &str = "history ";
    let has_prefix = line
        .get(..PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX));
    if has_prefix {
        let term = line[PREFIX.len()..].trim();
        if term.is_empty() {
            return ReplCommand::HistoryUsage;
        }
        return ReplCommand::History(term.to_string());
    }
    ReplCommand::Ask(line.to_string())
}

/// Render an answer for the terminal.
///
/// `details` adds the escalation reason and source URLs.
pub fn render_answer(response: &AnswerResponse, policy: &EscalationPolicy, details: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", response.answer);
    let _ = writeln!(out);
    let _ = writeln!(out, "Confidence: {}%", response.confidence);

    if response.confidence < policy.warn_threshold {
        let _ = writeln!(out, "{}", LOW_CONFIDENCE_WARNING);
    }
    if response.escalation.state == EscalationState::Escalated {
        let _ = writeln!(out, "{}", ESCALATION_NOTICE);
        if response.escalation.repeated {
            let _ = writeln!(out, "Several answers in a row were low confidence.");
        }
    }
    if response.escalation.state != EscalationState::Normal {
        let _ = writeln!(out, "{}", ESCALATE_HINT);
    }

    if !response.sources.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            let _ = writeln!(out, "{}. {} (score: {:.3})", i + 1, source.title, source.score);
            if details {
                if let Some(url) = &source.url {
                    let _ = writeln!(out, "   {}", url);
                }
            }
        }
    }

    if details {
        let _ = writeln!(out);
        let _ = writeln!(out, "State: {} ({})", response.escalation.state, response.escalation.reason);
        let _ = writeln!(out, "Session: {}  Turn: {}", response.session, response.turn_id);
    }
    out
}

pub fn render_escalation(response: &EscalationResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", response.message);
    match &response.admin_channel {
        Some(channel) => {
            let _ = writeln!(out, "Support has been notified on {}.", channel);
        }
        None => {
            let _ = writeln!(
                out,
                "No support channel is configured; your request is recorded in this session."
            );
        }
    }
    out
}

pub fn render_summary(summary: &SessionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session summary:");
    let _ = writeln!(out, "  Total queries: {}", summary.turn_count);
    let _ = writeln!(out, "  Escalations: {}", summary.escalation_count);
    if summary.escalation_requests > 0 {
        let _ = writeln!(out, "  Human support requests: {}", summary.escalation_requests);
    }
    let _ = writeln!(out, "  Average confidence: {:.2}%", summary.avg_confidence);
    if !summary.topics.is_empty() {
        let _ = writeln!(out, "  Main topics: {}", summary.topics.join(", "));
    }
    out
}

pub fn render_matches(term: &str, matches: &[Turn]) -> String {
    if matches.is_empty() {
        return format!("No previous interactions found for '{}'\n", term);
    }
    let mut out = String::new();
    let _ = writeln!(out, "Found {} previous interactions about '{}':", matches.len(), term);
    for (i, turn) in matches.iter().enumerate() {
        let preview: String = turn.answer.chars().take(100).collect();
        let ellipsis = if turn.answer.chars().count() > 100 { "..." } else { "" };
        let _ = writeln!(out, "{}. Q: {}", i + 1, turn.query);
        let _ = writeln!(out, "   A: {}{}", preview, ellipsis);
        let _ = writeln!(out, "   Confidence: {}%", turn.confidence);
        let _ = writeln!(out, "   Time: {}", turn.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    out
}

pub fn render_status(status: &CopilotStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Chunk store: {} chunks, {} dims ({})", status.chunks, status.dims, status.store_model);
    let _ = writeln!(out, "Generation: {}", status.generation_client);
    let _ = writeln!(out, "Retrieval: top_k={} floor={}", status.top_k, status.similarity_floor);
    let _ = writeln!(
        out,
        "History archive: {}",
        if status.history_archive { "enabled" } else { "disabled" }
    );
    out
}
