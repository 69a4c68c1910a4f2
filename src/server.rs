//! HTTP API for the agent pipeline.
//!
//! Exposes sessions, turns, retrieval, and the tool catalogue as a JSON
//! API so front-ends can drive the same orchestrator the CLI uses.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/tools` | Aggregated MCP tool catalogue |
//! | `GET`    | `/sessions` | List stored sessions |
//! | `POST`   | `/sessions` | Create a session (`{title?}`) |
//! | `GET`    | `/sessions/{id}` | Session snapshot (messages + tools) |
//! | `DELETE` | `/sessions/{id}` | Delete a session and its messages |
//! | `POST`   | `/sessions/{id}/messages` | Run a full turn (`{content}`) |
//! | `POST`   | `/search` | Retrieval only (`{query, k?}`) |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "tool_timeout", "message": "tool 'fetch' timed out after 30s" } }
//! ```
//!
//! Codes map to statuses: `bad_request`/`config` (400), `not_found` (404),
//! `tool_timeout` (408), `embedding_unavailable`/
//! `embedding_dimension_mismatch` (422), `transport_unavailable`/
//! `tool_unavailable`/`model_call_failed` (502), `internal` (500).
//!
//! Failures *inside* a turn (a tool erroring, the model giving up after
//! its retry, the loop cap) are part of the conversation — they come back
//! as error messages in the `AgentState`, not as HTTP errors.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can talk to a locally running server.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::AgentOrchestrator;
use crate::config::Config;
use crate::error::AgentError;
use crate::models::{AgentSession, AgentState, McpTool, SearchResult};
use crate::search;

/// Shared application state passed to all route handlers via Axum's
/// `State` extractor. Everything hangs off the orchestrator.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<AgentOrchestrator>,
}

/// Starts the HTTP server, building the whole pipeline from
/// configuration. The schema must already exist (`agt init`).
///
/// Binds to the address configured in `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(AgentOrchestrator::from_config(config).await?);
    run_server_with(&config.server.bind, orchestrator).await
}

/// Starts the HTTP server on `bind` with a pre-built orchestrator.
///
/// This is the hook tests use to serve against mock embedding and chat
/// backends.
pub async fn run_server_with(
    bind: &str,
    orchestrator: Arc<AgentOrchestrator>,
) -> anyhow::Result<()> {
    let tool_count = orchestrator.tools().catalogue().await.len();

    let state = AppState { orchestrator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/tools", get(handle_tools))
        .route(
            "/sessions",
            get(handle_list_sessions).post(handle_create_session),
        )
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{id}/messages", post(handle_send_message))
        .route("/search", post(handle_search))
        .layer(cors)
        .with_state(state);

    println!("Agent API listening on http://{}", bind);
    if tool_count > 0 {
        println!("  {} MCP tool(s) available", tool_count);
    }

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable
/// message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors to HTTP responses. Typed [`AgentError`]s keep
/// their stable code; anything else is sniffed for the known
/// embeddings-disabled message (a plain `bail!` in the search path) and
/// otherwise reported as `internal`.
fn classify(err: anyhow::Error) -> AppError {
    if let Some(agent_err) = err.downcast_ref::<AgentError>() {
        let status = match agent_err {
            AgentError::Config(_) => StatusCode::BAD_REQUEST,
            AgentError::ToolTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            AgentError::EmbeddingUnavailable(_)
            | AgentError::EmbeddingDimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AgentError::TransportUnavailable(_)
            | AgentError::ToolUnavailable(_)
            | AgentError::ModelCallFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return AppError {
            status,
            code: agent_err.code().to_string(),
            message: agent_err.to_string(),
        };
    }

    let message = format!("{:#}", err);
    if message.contains("requires embeddings") || message.contains("provider is disabled") {
        return AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "embedding_unavailable".to_string(),
            message,
        };
    }

    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message,
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools ============

/// JSON response body for `GET /tools`.
#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<McpTool>,
}

/// Handler for `GET /tools`.
///
/// Returns the merged tool catalogue across every connected MCP server,
/// with input schemas.
async fn handle_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.orchestrator.tools().catalogue().await,
    })
}

// ============ /sessions ============

/// JSON response body for `GET /sessions`.
#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<AgentSession>,
}

/// Handler for `GET /sessions`. Most recently touched first.
async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionsResponse>, AppError> {
    let sessions = state
        .orchestrator
        .sessions()
        .list()
        .await
        .map_err(classify)?;
    Ok(Json(SessionsResponse { sessions }))
}

/// JSON request body for `POST /sessions`.
#[derive(Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    title: Option<String>,
}

/// Handler for `POST /sessions`. Creates an empty session; the title
/// defaults when omitted or blank.
async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<AgentSession>, AppError> {
    let session = state
        .orchestrator
        .sessions()
        .create(req.title.as_deref())
        .await
        .map_err(classify)?;
    Ok(Json(session))
}

/// Handler for `GET /sessions/{id}`.
///
/// Returns the session snapshot: replayed messages (with token usage and
/// citation lists) plus the current tool catalogue.
async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentState>, AppError> {
    let session = state
        .orchestrator
        .sessions()
        .get(&id)
        .await
        .map_err(classify)?;
    if session.is_none() {
        return Err(not_found(format!("no session with id: {}", id)));
    }

    let snapshot = state.orchestrator.load_state(&id).await.map_err(classify)?;
    Ok(Json(snapshot))
}

/// Handler for `DELETE /sessions/{id}`. Cascades to the session's
/// messages. Returns `204` on success.
async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .orchestrator
        .sessions()
        .delete(&id)
        .await
        .map_err(classify)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", id)))
    }
}

// ============ POST /sessions/{id}/messages ============

/// JSON request body for `POST /sessions/{id}/messages`.
#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

/// Handler for `POST /sessions/{id}/messages`.
///
/// Runs one full agent turn (retrieval, model, tool loop) and returns
/// the updated session snapshot. A turn that fails internally still
/// returns `200` — the failure is an error message in the snapshot.
async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<AgentState>, AppError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let session = state
        .orchestrator
        .sessions()
        .get(&id)
        .await
        .map_err(classify)?;
    if session.is_none() {
        return Err(not_found(format!("no session with id: {}", id)));
    }

    let snapshot = state
        .orchestrator
        .send_message(&id, content)
        .await
        .map_err(classify)?;
    Ok(Json(snapshot))
}

// ============ POST /search ============

/// JSON request body for `POST /search`.
#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Overrides `retrieval.final_top_k`.
    #[serde(default)]
    k: Option<usize>,
}

/// JSON response body for `POST /search`.
#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

/// Handler for `POST /search`.
///
/// Retrieval without the agent loop: embed the query, cosine search,
/// rerank. Requires an embedding provider (`422` otherwise).
async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let results = search::query_hits(
        state.orchestrator.retrieval(),
        state.orchestrator.store(),
        state.orchestrator.embedder(),
        &req.query,
        req.k,
        false,
    )
    .await
    .map_err(classify)?;

    Ok(Json(SearchResponse { results }))
}
