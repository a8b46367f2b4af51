//! Escalation policy: decide whether an answer is surfaced as-is, flagged
//! with a warning, or routed to a human.
//!
//! The policy is a pure function of the current turn's final confidence
//! and the session's earlier turns. It never mutates history and never
//! performs notifications itself; `notify_admin` is an instruction for the
//! caller.
//!
//! | confidence                         | state       |
//! |------------------------------------|-------------|
//! | `< escalation_threshold`           | `Escalated` |
//! | `< warn_threshold`                 | `Warned`    |
//! | otherwise                          | `Normal`    |

use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, Result};
use crate::models::Turn;

/// Outcome class for a single turn. Not sticky across turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationState {
    Normal,
    Warned,
    Escalated,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::Normal => "normal",
            EscalationState::Warned => "warned",
            EscalationState::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for EscalationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per turn; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationDecision {
    pub state: EscalationState,
    pub should_escalate: bool,
    pub notify_admin: bool,
    /// This turn closes a run of `repeat_after` consecutive escalations.
    pub repeated: bool,
    pub reason: String,
}

/// Threshold configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub escalation_threshold: u8,
    pub warn_threshold: u8,
    /// Where escalations are forwarded; `None` disables admin notification.
    pub admin_channel: Option<String>,
    /// Consecutive escalated turns that raise the repeated signal; 0 disables.
    pub repeat_after: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            escalation_threshold: 30,
            warn_threshold: 50,
            admin_channel: None,
            repeat_after: 2,
        }
    }
}

impl EscalationPolicy {
    /// Check threshold ordering and range.
    pub fn validate(&self) -> Result<()> {
        if self.warn_threshold > 100 || self.escalation_threshold > 100 {
            return Err(CopilotError::configuration(
                "escalation thresholds must be within [0, 100]",
            ));
        }
        if self.warn_threshold < self.escalation_threshold {
            return Err(CopilotError::configuration(format!(
                "warn_threshold ({}) must be >= escalation_threshold ({})",
                self.warn_threshold, self.escalation_threshold
            )));
        }
        if matches!(&self.admin_channel, Some(c) if c.trim().is_empty()) {
            return Err(CopilotError::configuration("admin_channel must not be blank"));
        }
        Ok(())
    }

    pub fn state_for(&self, confidence: u8) -> EscalationState {
        if confidence < self.escalation_threshold {
            EscalationState::Escalated
        } else if confidence < self.warn_threshold {
            EscalationState::Warned
        } else {
            EscalationState::Normal
        }
    }

    /// Evaluate the current turn.
    ///
    /// `history` holds the session's earlier turns, oldest first, not
    /// including the turn being evaluated.
    pub fn evaluate(&self, confidence: u8, history: &[Turn]) -> EscalationDecision {
        let state = self.state_for(confidence);
        let should_escalate = state == EscalationState::Escalated;

        let repeated = should_escalate
            && self.repeat_after > 0
            && history.len() + 1 >= self.repeat_after
            && history
                .iter()
                .rev()
                .take(self.repeat_after - 1)
                .all(|t| t.escalated);

        let reason = match state {
            EscalationState::Escalated if repeated => format!(
                "confidence {} below escalation threshold {} for {} consecutive turns",
                confidence, self.escalation_threshold, self.repeat_after
            ),
            EscalationState::Escalated => format!(
                "confidence {} below escalation threshold {}",
                confidence, self.escalation_threshold
            ),
            EscalationState::Warned => format!(
                "confidence {} below warning threshold {}",
                confidence, self.warn_threshold
            ),
            EscalationState::Normal => format!("confidence {} acceptable", confidence),
        };

        EscalationDecision {
            state,
            should_escalate,
            notify_admin: should_escalate && self.admin_channel.is_some(),
            repeated,
            reason,
        }
    }

    /// Decision for an explicit request to talk to a human. Escalates
    /// regardless of confidence.
    pub fn user_requested(&self) -> EscalationDecision {
        EscalationDecision {
            state: EscalationState::Escalated,
            should_escalate: true,
            notify_admin: self.admin_channel.is_some(),
            repeated: false,
            reason: "user requested".to_string(),
        }
    }

    /// Decision for a turn whose answer could not be produced at all.
    pub fn unavailable(&self, cause: &str) -> EscalationDecision {
        EscalationDecision {
            state: EscalationState::Escalated,
            should_escalate: true,
            notify_admin: self.admin_channel.is_some(),
            repeated: false,
            reason: format!("answer service unavailable: {}", cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTurn;
    use chrono::Utc;

    fn turn(escalated: bool) -> Turn {
        NewTurn {
            query: "q".into(),
            answer: "a".into(),
            confidence: if escalated { 10 } else { 80 },
            sources: Vec::new(),
            escalated,
        }
        .into_turn(Utc::now())
    }

    #[test]
    fn test_threshold_boundaries() {
        let p = EscalationPolicy::default();
        assert_eq!(p.evaluate(0, &[]).state, EscalationState::Escalated);
        assert_eq!(p.evaluate(29, &[]).state, EscalationState::Escalated);
        assert_eq!(p.evaluate(30, &[]).state, EscalationState::Warned);
        assert_eq!(p.evaluate(49, &[]).state, EscalationState::Warned);
        assert_eq!(p.evaluate(50, &[]).state, EscalationState::Normal);
        assert_eq!(p.evaluate(100, &[]).state, EscalationState::Normal);
    }

    #[test]
    fn test_only_escalated_sets_should_escalate() {
        let p = EscalationPolicy::default();
        for c in 0..=100u8 {
            let d = p.evaluate(c, &[]);
            assert_eq!(d.should_escalate, c < 30);
            assert!(!d.notify_admin);
        }
    }

    #[test]
    fn test_notify_admin_requires_channel() {
        let p = EscalationPolicy {
            admin_channel: Some("ops-alerts".into()),
            ..Default::default()
        };
        assert!(p.evaluate(10, &[]).notify_admin);
        assert!(!p.evaluate(40, &[]).notify_admin);
        assert!(p.unavailable("timeout").notify_admin);
    }

    #[test]
    fn test_repeated_escalation_signal() {
        let p = EscalationPolicy::default();
        assert!(!p.evaluate(10, &[]).repeated);
        assert!(!p.evaluate(10, &[turn(false)]).repeated);
        assert!(p.evaluate(10, &[turn(false), turn(true)]).repeated);
        assert!(!p.evaluate(60, &[turn(true)]).repeated);

        let off = EscalationPolicy {
            repeat_after: 0,
            ..Default::default()
        };
        assert!(!off.evaluate(10, &[turn(true), turn(true)]).repeated);

        let single = EscalationPolicy {
            repeat_after: 1,
            ..Default::default()
        };
        assert!(single.evaluate(10, &[]).repeated);
    }

    #[test]
    fn test_history_is_not_mutated() {
        let p = EscalationPolicy::default();
        let history = vec![turn(true), turn(false)];
        let before = history.clone();
        let _ = p.evaluate(5, &history);
        assert_eq!(history, before);
    }

    #[test]
    fn test_validate_threshold_order() {
        assert!(EscalationPolicy::default().validate().is_ok());
        let bad = EscalationPolicy {
            escalation_threshold: 60,
            warn_threshold: 50,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(CopilotError::Configuration(_))));
        let blank = EscalationPolicy {
            admin_channel: Some("  ".into()),
            ..Default::default()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_unavailable_is_escalated() {
        let d = EscalationPolicy::default().unavailable("timed out after 30s");
        assert_eq!(d.state, EscalationState::Escalated);
        assert!(d.should_escalate);
        assert!(d.reason.contains("timed out"));
    }

    #[test]
    fn test_user_request_always_escalates() {
        let quiet = EscalationPolicy::default().user_requested();
        assert_eq!(quiet.state, EscalationState::Escalated);
        assert!(quiet.should_escalate);
        assert!(!quiet.notify_admin);
        assert_eq!(quiet.reason, "user requested");

        let paged = EscalationPolicy {
            admin_channel: Some("support-oncall".into()),
            ..EscalationPolicy::default()
        }
        .user_requested();
        assert!(paged.notify_admin);
    }
}
