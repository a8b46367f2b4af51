//! Conversation sessions and the keyed session store.
//!
//! A [`ConversationSession`] is an append-only, time-ordered list of
//! [`Turn`]s. The [`SessionStore`] maps caller-supplied keys (user or
//! channel ids) to sessions and is injected into the orchestrator rather
//! than living in a global.
//!
//! # Concurrency
//!
//! Each key owns a writer mutex and a copy-on-write `Arc` snapshot:
//!
//! ```text
//! append:  lock(writer) → build turn from current → Arc::make_mut + push
//! read:    clone Arc under a short read lock → no further locking
//! ```
//!
//! Appends for one key are serialized; appends for different keys and all
//! reads proceed in parallel. Readers never observe a partially appended
//! turn. An append pushes in place unless a reader still holds an older
//! snapshot, in which case that reader keeps the old copy. Sessions are
//! never evicted here: growth is unbounded unless the caller truncates or
//! drops keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, Result};
use crate::models::{NewTurn, Turn, TurnKind};

/// Longest accepted session key, in characters.
pub const MAX_KEY_LEN: usize = 128;

/// Number of topics reported by [`ConversationSession::summary`].
const SUMMARY_TOPICS: usize = 5;

/// Ordered turn history for one user or channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub key: String,
    turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Aggregate view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub turn_count: usize,
    pub escalation_count: usize,
    /// Turns where the user asked for a human.
    pub escalation_requests: usize,
    /// Mean confidence of answered turns, rounded to two decimals; `0.0`
    /// when there are none.
    pub avg_confidence: f64,
    /// Most frequent query words longer than three characters.
    pub topics: Vec<String>,
}

impl ConversationSession {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            turns: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn.
    ///
    /// # Errors
    ///
    /// [`CopilotError::InvalidSession`] for a blank id or query, confidence
    /// above 100, or a timestamp earlier than the previous turn. The session
    /// is left unchanged.
    pub fn append_turn(&mut self, turn: Turn) -> Result<()> {
        validate_turn(&turn, self.turns.last())?;
        self.last_active = self.last_active.max(turn.timestamp);
        self.turns.push(turn);
        Ok(())
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Turns whose query or answer contains `term`, case-insensitively.
    ///
    /// A blank term matches nothing.
    pub fn search(&self, term: &str) -> Vec<&Turn> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.turns
            .iter()
            .filter(|t| {
                t.query.to_lowercase().contains(&needle) || t.answer.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        let answered: Vec<&Turn> = self.turns.iter().filter(|t| t.is_answer()).collect();
        let avg_confidence = if answered.is_empty() {
            0.0
        } else {
            let total: u64 = answered.iter().map(|t| u64::from(t.confidence)).sum();
            let avg = total as f64 / answered.len() as f64;
            (avg * 100.0).round() / 100.0
        };

        SessionSummary {
            turn_count: self.turns.len(),
            escalation_count: self.turns.iter().filter(|t| t.escalated).count(),
            escalation_requests: self.turns.len() - answered.len(),
            avg_confidence,
            topics: self.topics(),
        }
    }

    fn topics(&self) -> Vec<String> {
        // (word, count, first position)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut position = 0usize;
        for turn in self.turns.iter().filter(|t| t.is_answer()) {
            for raw in turn.query.split_whitespace() {
                let word = raw
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                if word.chars().count() <= 3 {
                    continue;
                }
                let entry = counts.entry(word).or_insert((0, position));
                entry.0 += 1;
                position += 1;
            }
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(w, (count, first))| (w, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(SUMMARY_TOPICS)
            .map(|(w, _, _)| w)
            .collect()
    }

    /// Check a deserialized session for key validity and turn ordering.
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;
        let mut prev: Option<&Turn> = None;
        for turn in &self.turns {
            validate_turn(turn, prev)?;
            prev = Some(turn);
        }
        Ok(())
    }
}

/// Reject blank, oversized, or control-character session keys.
pub fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CopilotError::invalid_session("session key must not be empty"));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(CopilotError::invalid_session(format!(
            "session key longer than {} characters",
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CopilotError::invalid_session(
            "session key contains control characters",
        ));
    }
    Ok(())
}

fn validate_turn(turn: &Turn, last: Option<&Turn>) -> Result<()> {
    if turn.id.trim().is_empty() {
        return Err(CopilotError::invalid_session("turn id must not be empty"));
    }
    if turn.query.trim().is_empty() {
        return Err(CopilotError::invalid_session("turn query must not be empty"));
    }
    if turn.confidence > 100 {
        return Err(CopilotError::invalid_session(format!(
            "turn confidence {} outside [0, 100]",
            turn.confidence
        )));
    }
    if let Some(last) = last {
        if turn.timestamp < last.timestamp {
            return Err(CopilotError::invalid_session(
                "turn timestamp precedes the previous turn",
            ));
        }
    }
    Ok(())
}

struct SessionSlot {
    writer: Mutex<()>,
    current: RwLock<Arc<ConversationSession>>,
}

impl SessionSlot {
    fn new(session: ConversationSession) -> Self {
        Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(session)),
        }
    }

    fn load(&self) -> Arc<ConversationSession> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Push `turn` onto the published session. Callers hold `writer` and
    /// must not keep a snapshot of their own alive across the call.
    fn append(&self, turn: Turn) -> Result<Arc<ConversationSession>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        validate_turn(&turn, current.turns().last())?;
        Arc::make_mut(&mut *current).append_turn(turn)?;
        Ok(Arc::clone(&*current))
    }
}

/// Keyed store of conversation sessions.
#[derive(Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_slot(&self, key: &str) -> Option<Arc<SessionSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot(&self, key: &str) -> Result<Arc<SessionSlot>> {
        validate_key(key)?;
        if let Some(slot) = self.existing_slot(key) {
            return Ok(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new(ConversationSession::new(key))))
            .clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.existing_slot(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Return the session for `key`, creating an empty one on first use.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<ConversationSession>> {
        Ok(self.slot(key)?.load())
    }

    /// Latest published snapshot, if the key has a session.
    pub fn snapshot(&self, key: &str) -> Option<Arc<ConversationSession>> {
        self.existing_slot(key).map(|slot| slot.load())
    }

    /// Append a fully formed turn to the session for `key`.
    pub fn append_turn(&self, key: &str, turn: Turn) -> Result<Arc<ConversationSession>> {
        let slot = self.slot(key)?;
        let _writer = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);
        slot.append(turn)
    }

    /// Timestamp `turn` under the key's writer lock and append it.
    ///
    /// The timestamp is never earlier than the previous turn's, so
    /// concurrent requests for the same key cannot violate time order.
    pub fn record_turn(&self, key: &str, turn: NewTurn) -> Result<(Turn, Arc<ConversationSession>)> {
        let (turn, (), session) = self.record(key, TurnKind::Answer, |_| (turn, ()))?;
        Ok((turn, session))
    }

    /// Like [`record_turn`](Self::record_turn), but `build` derives the turn
    /// from the session as it stands under the writer lock, so decisions
    /// that depend on earlier turns see every turn recorded before this one.
    pub fn record_turn_with<T>(
        &self,
        key: &str,
        build: impl FnOnce(&ConversationSession) -> (NewTurn, T),
    ) -> Result<(Turn, T, Arc<ConversationSession>)> {
        self.record(key, TurnKind::Answer, build)
    }

    /// Record that the user asked for a human.
    ///
    /// The turn counts as escalated but is left out of the confidence
    /// average and topics.
    pub fn record_escalation_request(
        &self,
        key: &str,
        turn: NewTurn,
    ) -> Result<(Turn, Arc<ConversationSession>)> {
        let (turn, (), session) = self.record(key, TurnKind::EscalationRequest, |_| (turn, ()))?;
        Ok((turn, session))
    }

    fn record<T>(
        &self,
        key: &str,
        kind: TurnKind,
        build: impl FnOnce(&ConversationSession) -> (NewTurn, T),
    ) -> Result<(Turn, T, Arc<ConversationSession>)> {
        let slot = self.slot(key)?;
        let _writer = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let (turn, extra) = {
            let current = slot.load();
            let now = match current.turns().last() {
                Some(last) => Utc::now().max(last.timestamp),
                None => Utc::now(),
            };
            let (new_turn, extra) = build(&*current);
            let mut turn = new_turn.into_turn(now);
            turn.kind = kind;
            (turn, extra)
        };
        let session = slot.append(turn.clone())?;
        Ok((turn, extra, session))
    }

    /// The last `n` turns for `key`, oldest first. Unknown keys yield none.
    pub fn recent_turns(&self, key: &str, n: usize) -> Vec<Turn> {
        self.snapshot(key)
            .map(|s| s.recent_turns(n).to_vec())
            .unwrap_or_default()
    }

    pub fn search(&self, key: &str, term: &str) -> Vec<Turn> {
        self.snapshot(key)
            .map(|s| s.search(term).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self, key: &str) -> SessionSummary {
        match self.snapshot(key) {
            Some(s) => s.summary(),
            None => ConversationSession::new(key).summary(),
        }
    }

    /// Install a previously persisted session if `key` has none yet.
    ///
    /// Returns `true` when the session was installed.
    pub fn restore(&self, session: ConversationSession) -> Result<bool> {
        session.validate()?;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(&session.key) {
            return Ok(false);
        }
        slots.insert(session.key.clone(), Arc::new(SessionSlot::new(session)));
        Ok(true)
    }
}
