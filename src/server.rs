//! HTTP question-answering endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/ask?q=...` | Answer with default settings |
//! | `POST` | `/ask` | Answer a JSON `AnswerRequest` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `generation_failed` (502).
//!
//! All origins, methods and headers are permitted (CORS).

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AnswerEngine;
use crate::error::AnswerError;
use crate::models::{AnswerRequest, AnswerResponse};

#[derive(Clone)]
struct AppState {
    engine: Arc<AnswerEngine>,
}

/// Build the router; exposed so tests can serve it on an ephemeral port.
pub fn router(engine: Arc<AnswerEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", get(handle_ask_query).post(handle_ask_json))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(engine: Arc<AnswerEngine>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    println!("libris listening on http://{}", bind_addr);
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
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
        code: "bad_request",
        message: message.into(),
    }
}

impl From<AnswerError> for AppError {
    fn from(err: AnswerError) -> Self {
        match err {
            AnswerError::EmptyQuestion | AnswerError::InvalidRequest(_) => {
                bad_request(err.to_string())
            }
            AnswerError::Generation(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "generation_failed",
                message: err.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ /ask ============

#[derive(Deserialize)]
struct AskParams {
    q: Option<String>,
    top_k: Option<usize>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

async fn handle_ask_query(
    State(state): State<AppState>,
    params: Result<Query<AskParams>, QueryRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let question = params
        .q
        .ok_or_else(|| bad_request("missing query parameter: q"))?;
    let request = AnswerRequest {
        question,
        top_k: params.top_k,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
    };
    Ok(Json(state.engine.answer(request).await?))
}

async fn handle_ask_json(
    State(state): State<AppState>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.engine.answer(request).await?))
}
