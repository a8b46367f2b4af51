//! The copilot: one entry point from a raw query to a calibrated,
//! escalation-checked answer.
//!
//! # Pipeline
//!
//! ```text
//! answer(query, key)
//!   ├── validate key + query          (InvalidSession, nothing recorded)
//!   ├── restore session from archive  (first access only)
//!   ├── Retriever::retrieve           (top_k, similarity floor)
//!   ├── AnswerGenerator::generate     (bounded history, timeout)
//!   ├── Calibrator::calibrate         (self-report × evidence)
//!   ├── SessionStore::record_turn_with (under the key's writer lock)
//!   │     └── EscalationPolicy::evaluate  (Normal / Warned / Escalated)
//!   └── HistoryArchive::persist_latest
//! ```
//!
//! [`Copilot::escalate`] records an explicit request for a human outside
//! this pipeline.
//!
//! Retrieval or generation outages never escape as errors: the query is
//! answered with [`UNAVAILABLE_ANSWER`], confidence 0, and an escalation.
//! Only `InvalidSession` and `Configuration` reach the caller.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use docpilot_core::session::validate_key;
use docpilot_core::{
    CalibrationParams, Calibrator, ChunkStore, CompletionClient, CopilotError, Embedder,
    EscalationDecision, EscalationPolicy, EscalationState, NewTurn, Retriever, ScoredChunk,
    SessionStore, SessionSummary, Source, Turn,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::OpenAIEmbedder;
use crate::generator::AnswerGenerator;
use crate::history::HistoryArchive;
use crate::llm::OpenAIChatClient;

/// Answer text used when the answer could not be produced.
pub const UNAVAILABLE_ANSWER: &str =
    "The answer service is currently unavailable. Please try again later.";

/// Reply shown when the user asks for a human.
pub const ESCALATION_ACK: &str = "Your request has been noted for human review. \
A support team member will get back to you soon. In the meantime, you can keep \
asking me other questions.";

/// Query text recorded for an escalation request.
const ESCALATION_REQUEST_QUERY: &str = "Human support requested";

/// A source as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub url: Option<String>,
    pub score: f32,
    pub category: Option<String>,
}

impl From<&Source> for SourceRef {
    fn from(s: &Source) -> Self {
        Self {
            title: s.title.clone(),
            url: s.url.clone(),
            score: s.score,
            category: s.category.clone(),
        }
    }
}

/// Outward response for one query.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub query: String,
    pub answer: String,
    pub confidence: u8,
    pub sources: Vec<SourceRef>,
    pub escalated: bool,
    pub escalation: EscalationDecision,
    /// True when retrieval or generation was down and `answer` is the
    /// service-unavailable marker.
    pub unavailable: bool,
    pub session: String,
    pub turn_id: String,
}

/// Outward response for an explicit escalation request.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationResponse {
    pub session: String,
    pub turn_id: String,
    pub message: String,
    /// Where to deliver the notification, when one should be sent.
    pub admin_channel: Option<String>,
    pub escalation: EscalationDecision,
}

/// Snapshot of the loaded corpus and models, for `/status` and `check`.
#[derive(Debug, Clone, Serialize)]
pub struct CopilotStatus {
    pub chunks: usize,
    pub dims: usize,
    pub store_model: String,
    pub generation_client: String,
    pub top_k: usize,
    pub similarity_floor: f32,
    pub sessions: usize,
    pub history_archive: bool,
}

/// Tunables that shape a response, independent of the collaborators.
#[derive(Debug, Clone)]
pub struct CopilotSettings {
    pub top_k: usize,
    pub max_sources: usize,
    pub search_limit: usize,
    pub calibration: CalibrationParams,
    pub escalation: EscalationPolicy,
}

impl Default for CopilotSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_sources: 3,
            search_limit: 10,
            calibration: CalibrationParams::default(),
            escalation: EscalationPolicy::default(),
        }
    }
}

impl CopilotSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_sources: config.response.max_sources,
            search_limit: config.history.search_limit,
            calibration: config.calibration.params(config.retrieval.similarity_floor),
            escalation: config.escalation.clone(),
        }
    }
}

pub struct Copilot {
    retriever: Retriever,
    generator: AnswerGenerator,
    calibrator: Calibrator,
    policy: EscalationPolicy,
    sessions: Arc<SessionStore>,
    archive: Option<HistoryArchive>,
    restore_lock: tokio::sync::Mutex<()>,
    top_k: usize,
    max_sources: usize,
    search_limit: usize,
}

/// Read and validate the chunk store file.
pub fn load_chunk_store(path: &Path) -> Result<ChunkStore> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read chunk store: {}", path.display()))?;
    let store = ChunkStore::from_json_slice(&bytes)
        .with_context(|| format!("Invalid chunk store: {}", path.display()))?;
    Ok(store)
}

impl Copilot {
    pub fn new(retriever: Retriever, generator: AnswerGenerator, settings: CopilotSettings) -> Self {
        let mut calibration = settings.calibration;
        calibration.similarity_floor = f64::from(retriever.similarity_floor());
        Self {
            retriever,
            generator,
            calibrator: Calibrator::new(calibration),
            policy: settings.escalation,
            sessions: Arc::new(SessionStore::new()),
            archive: None,
            restore_lock: tokio::sync::Mutex::new(()),
            top_k: settings.top_k,
            max_sources: settings.max_sources,
            search_limit: settings.search_limit,
        }
    }

    /// Share an existing session store.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_archive(mut self, archive: HistoryArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Build a copilot from configuration with the HTTP model clients.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(load_chunk_store(&config.store.path)?);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::new(&config.embedding)?);
        let client: Arc<dyn CompletionClient> =
            Arc::new(OpenAIChatClient::new(&config.generation)?);
        Self::assemble(config, store, embedder, client)
    }

    /// Build a copilot from configuration with injected collaborators.
    pub fn assemble(
        config: &Config,
        store: Arc<ChunkStore>,
        embedder: Arc<dyn Embedder>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let retriever =
            Retriever::with_flat_index(store, embedder, config.retrieval.similarity_floor)?;
        let generator = AnswerGenerator::from_config(client, &config.generation);
        let mut copilot = Self::new(retriever, generator, CopilotSettings::from_config(config));
        if let Some(dir) = &config.history.dir {
            copilot = copilot.with_archive(HistoryArchive::open(dir)?);
        }
        Ok(copilot)
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn status(&self) -> CopilotStatus {
        let store = self.retriever.store();
        CopilotStatus {
            chunks: store.len(),
            dims: store.dims(),
            store_model: store.model().to_string(),
            generation_client: self.generator.client_name().to_string(),
            top_k: self.top_k,
            similarity_floor: self.retriever.similarity_floor(),
            sessions: self.sessions.len(),
            history_archive: self.archive.is_some(),
        }
    }

    /// Answer `query` within the session identified by `session_key`.
    ///
    /// # Errors
    ///
    /// - [`CopilotError::InvalidSession`] for a malformed key or blank
    ///   query; nothing is recorded.
    /// - [`CopilotError::Configuration`] if the embedder returns vectors
    ///   of the wrong dimensionality.
    pub async fn answer(
        &self,
        query: &str,
        session_key: &str,
    ) -> Result<AnswerResponse, CopilotError> {
        validate_key(session_key)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(CopilotError::invalid_session("query must not be empty"));
        }

        self.restore_if_archived(session_key).await;
        let history = self
            .sessions
            .get_or_create(session_key)?
            .recent_turns(self.generator.history_turns())
            .to_vec();

        let mut chunks: Vec<ScoredChunk> = Vec::new();
        let generated = match self.retriever.retrieve(query, self.top_k).await {
            Ok(found) => {
                chunks = found;
                self.generator.generate(query, &chunks, &history).await
            }
            Err(e) => Err(e),
        };

        let (answer, confidence, degraded) = match generated {
            Ok(generated) => {
                let confidence =
                    self.calibrator.calibrate(i64::from(generated.self_reported), &chunks);
                (generated.text, confidence, None)
            }
            Err(e) if e.is_degradable() => {
                warn!(session = session_key, error = %e, "answer degraded");
                (UNAVAILABLE_ANSWER.to_string(), 0, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        let unavailable = degraded.is_some();

        // Decided under the key's writer lock against every recorded turn.
        let sources: Vec<Source> = chunks.iter().map(ScoredChunk::to_source).collect();
        let (turn, decision, _) = self.sessions.record_turn_with(session_key, |current| {
            let decision = match &degraded {
                None => self.policy.evaluate(confidence, current.turns()),
                Some(cause) => self.policy.unavailable(cause),
            };
            let turn = NewTurn {
                query: query.to_string(),
                answer: answer.clone(),
                confidence,
                sources: sources.clone(),
                escalated: decision.should_escalate,
            };
            (turn, decision)
        })?;

        self.archive_session(session_key).await;

        let top_score = chunks.first().map(|c| c.score);
        match decision.state {
            EscalationState::Normal => info!(
                session = session_key,
                confidence,
                state = %decision.state,
                top_score,
                sources = chunks.len(),
                "query answered"
            ),
            _ => warn!(
                session = session_key,
                confidence,
                state = %decision.state,
                top_score,
                notify_admin = decision.notify_admin,
                repeated = decision.repeated,
                reason = %decision.reason,
                "low-confidence answer"
            ),
        }

        Ok(AnswerResponse {
            query: query.to_string(),
            answer,
            confidence,
            sources: sources.iter().take(self.max_sources).map(SourceRef::from).collect(),
            escalated: decision.should_escalate,
            escalation: decision,
            unavailable,
            session: session_key.to_string(),
            turn_id: turn.id,
        })
    }

    /// Record that the user asked for a human.
    ///
    /// Escalates whatever the earlier confidence was. Delivering the admin
    /// notification is up to the caller when `notify_admin` is set.
    pub async fn escalate(&self, session_key: &str) -> Result<EscalationResponse, CopilotError> {
        validate_key(session_key)?;
        self.restore_if_archived(session_key).await;

        let decision = self.policy.user_requested();
        let (turn, _) = self.sessions.record_escalation_request(
            session_key,
            NewTurn {
                query: ESCALATION_REQUEST_QUERY.to_string(),
                answer: ESCALATION_ACK.to_string(),
                confidence: 0,
                sources: Vec::new(),
                escalated: true,
            },
        )?;
        self.archive_session(session_key).await;

        let admin_channel = if decision.notify_admin {
            self.policy.admin_channel.clone()
        } else {
            None
        };
        warn!(
            session = session_key,
            notify_admin = decision.notify_admin,
            admin_channel = admin_channel.as_deref(),
            "human support requested"
        );

        Ok(EscalationResponse {
            session: session_key.to_string(),
            turn_id: turn.id,
            message: ESCALATION_ACK.to_string(),
            admin_channel,
            escalation: decision,
        })
    }

    /// The last `limit` turns for `session_key`, oldest first.
    pub async fn history(&self, session_key: &str, limit: usize) -> Result<Vec<Turn>, CopilotError> {
        validate_key(session_key)?;
        self.restore_if_archived(session_key).await;
        Ok(self.sessions.recent_turns(session_key, limit))
    }

    /// Turns mentioning `term`, most recent first, at most the configured
    /// search limit.
    pub async fn search_history(
        &self,
        session_key: &str,
        term: &str,
    ) -> Result<Vec<Turn>, CopilotError> {
        validate_key(session_key)?;
        self.restore_if_archived(session_key).await;
        let mut matches = self.sessions.search(session_key, term);
        matches.reverse();
        matches.truncate(self.search_limit);
        Ok(matches)
    }

    pub async fn summary(&self, session_key: &str) -> Result<SessionSummary, CopilotError> {
        validate_key(session_key)?;
        self.restore_if_archived(session_key).await;
        Ok(self.sessions.summary(session_key))
    }

    async fn restore_if_archived(&self, key: &str) {
        let Some(archive) = &self.archive else {
            return;
        };
        if self.sessions.contains(key) {
            return;
        }
        let _guard = self.restore_lock.lock().await;
        if self.sessions.contains(key) {
            return;
        }
        match archive.load(key).await {
            Ok(Some(session)) => match self.sessions.restore(session) {
                Ok(true) => info!(session = key, "session restored from archive"),
                Ok(false) => {}
                Err(e) => set_aside(archive, key, &e.to_string()).await,
            },
            Ok(None) => {}
            Err(e) => set_aside(archive, key, &format!("{:#}", e)).await,
        }
    }

    async fn archive_session(&self, key: &str) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.persist_latest(&self.sessions, key).await {
                warn!(session = key, error = ?e, "failed to archive session");
            }
        }
    }
}

/// Move an unreadable archive out of the way before the key starts a
/// fresh session; hold the key if the file cannot be moved.
async fn set_aside(archive: &HistoryArchive, key: &str, reason: &str) {
    match archive.quarantine(key).await {
        Ok(Some(path)) => warn!(
            session = key,
            error = reason,
            moved_to = %path.display(),
            "unreadable archived session moved aside"
        ),
        Ok(None) => {}
        Err(e) => {
            archive.hold(key);
            error!(
                session = key,
                error = reason,
                move_error = ?e,
                "unreadable archived session left in place; this session will not be saved"
            );
        }
    }
}
