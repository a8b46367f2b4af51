//! HTTP transport.
//!
//! Maps JSON requests onto [`Copilot`] calls. Each request names a session
//! key; requests without one share the `"web"` session.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question (`{query, session?}`) |
//! | `POST` | `/escalate` | Ask for a human (`{session?}`) |
//! | `GET`  | `/history` | Recent turns and summary (`?session=&limit=`) |
//! | `POST` | `/search_history` | Search a session (`{session?, search_term}`) |
//! | `GET`  | `/summary` | Session summary (`?session=`) |
//! | `GET`  | `/status` | Corpus and model status |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `configuration` (500), `internal` (500).
//! A degraded answer (model unavailable) is a normal `200` response with
//! `unavailable: true`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docpilot_core::{CopilotError, SessionSummary, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::copilot::{AnswerResponse, Copilot, CopilotStatus, EscalationResponse};

/// Session key used when a request does not name one.
pub const DEFAULT_SESSION: &str = "web";

const DEFAULT_HISTORY_LIMIT: usize = 5;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
struct AppState {
    copilot: Arc<Copilot>,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(copilot: Arc<Copilot>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/escalate", post(handle_escalate))
        .route("/history", get(handle_history))
        .route("/search_history", post(handle_search_history))
        .route("/summary", get(handle_summary))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { copilot })
}

/// Serve on `bind` until the process is terminated.
pub async fn run_server(bind: &str, copilot: Arc<Copilot>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "docpilot server listening");
    axum::serve(listener, router(copilot)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<CopilotError> for AppError {
    fn from(err: CopilotError) -> Self {
        match err {
            CopilotError::InvalidSession(msg) => bad_request(msg),
            CopilotError::Configuration(msg) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "configuration".to_string(),
                message: msg,
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn session_or_default(session: Option<String>) -> String {
    session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    version: String,
    #[serde(flatten)]
    copilot: CopilotStatus,
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        copilot: state.copilot.status(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    session: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(req) = payload?;
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let session = session_or_default(req.session);
    let response = state.copilot.answer(&req.query, &session).await?;
    Ok(Json(response))
}

// ============ POST /escalate ============

#[derive(Deserialize)]
struct EscalateRequest {
    #[serde(default)]
    session: Option<String>,
}

async fn handle_escalate(
    State(state): State<AppState>,
    payload: Result<Json<EscalateRequest>, JsonRejection>,
) -> Result<Json<EscalationResponse>, AppError> {
    let Json(req) = payload?;
    let session = session_or_default(req.session);
    let response = state.copilot.escalate(&session).await?;
    Ok(Json(response))
}

// ============ GET /history ============

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    session: String,
    turns: Vec<Turn>,
    summary: SessionSummary,
}

async fn handle_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = session_or_default(params.session);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let turns = state.copilot.history(&session, limit).await?;
    let summary = state.copilot.summary(&session).await?;
    Ok(Json(HistoryResponse {
        session,
        turns,
        summary,
    }))
}

// ============ POST /search_history ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    session: Option<String>,
    search_term: String,
}

#[derive(Serialize)]
struct SearchResponse {
    session: String,
    search_term: String,
    results: Vec<Turn>,
}

async fn handle_search_history(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = payload?;
    if req.search_term.trim().is_empty() {
        return Err(bad_request("search_term must not be empty"));
    }
    let session = session_or_default(req.session);
    let results = state.copilot.search_history(&session, &req.search_term).await?;
    Ok(Json(SearchResponse {
        session,
        search_term: req.search_term,
        results,
    }))
}

// ============ GET /summary ============

#[derive(Deserialize)]
struct SummaryParams {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Serialize)]
struct SummaryResponse {
    session: String,
    #[serde(flatten)]
    summary: SessionSummary,
}

async fn handle_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SummaryResponse>, AppError> {
    let session = session_or_default(params.session);
    let summary = state.copilot.summary(&session).await?;
    Ok(Json(SummaryResponse { session, summary }))
}
