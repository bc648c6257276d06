//! HTTP chat surface.
//!
//! Each session id gets its own conversation memory; all sessions share the
//! index and the model providers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/sources` | Source documents loaded by the last build |
//! | `POST` | `/sessions/{id}/ask` | `{question}` → `{answer, sources}` |
//! | `POST` | `/sessions/{id}/reset` | Clear that session's history |
//! | `GET`  | `/sessions/{id}/history` | Turns of that session |
//! | `DELETE` | `/sessions/{id}` | End the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "validation error: question is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `cancelled` (409),
//! `generation_failed` (502), `retrieval_failed` (503), `timeout` (504),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front-end
//! can be served from anywhere.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use folio_core::models::{Answer, ConversationTurn};
use folio_core::RagError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::session::{Services, SessionRegistry};

/// Serve until the process is terminated.
pub async fn run_server(services: Arc<Services>) -> anyhow::Result<()> {
    let bind_addr = services.config().server.bind.clone();
    let app = router(Arc::new(SessionRegistry::new(services)));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Folio listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// The application router, with CORS.
pub fn router(sessions: Arc<SessionRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sources", get(handle_sources))
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}/reset", post(handle_reset))
        .route("/sessions/{id}/history", get(handle_history))
        .route("/sessions/{id}", delete(handle_end_session))
        .layer(cors)
        .with_state(sessions)
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::Cancelled { .. } => (StatusCode::CONFLICT, "cancelled"),
            RagError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RagError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            RagError::Retrieval(_) | RagError::Embedding(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "retrieval_failed")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
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

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<String>,
}

async fn handle_sources(State(sessions): State<Arc<SessionRegistry>>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: sessions.services().sources(),
    })
}

// ============ POST /sessions/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(sessions): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let session = sessions.get_or_create(&id);
    let answer = session.engine().ask(&request.question).await?;
    Ok(Json(answer))
}

// ============ POST /sessions/{id}/reset ============

#[derive(Serialize)]
struct ResetResponse {
    session: String,
    turns: usize,
}

async fn handle_reset(
    State(sessions): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, AppError> {
    let session = sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    session.engine().reset();
    Ok(Json(ResetResponse {
        session: id,
        turns: session.engine().history().len(),
    }))
}

// ============ GET /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    session: String,
    turns: Vec<ConversationTurn>,
}

async fn handle_history(
    State(sessions): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    Ok(Json(HistoryResponse {
        session: id,
        turns: session.engine().history(),
    }))
}

// ============ DELETE /sessions/{id} ============

async fn handle_end_session(
    State(sessions): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", id)))
    }
}
