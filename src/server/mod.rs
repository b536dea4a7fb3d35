//! HTTP front end for the question-answering engine.
//!
//! | Method | Path      | Description                                  |
//! |--------|-----------|----------------------------------------------|
//! | `POST` | `/ask`    | Answer a question against the knowledge base |
//! | `GET`  | `/status` | Readiness of the knowledge base              |
//! | `GET`  | `/health` | Liveness check (returns version)             |
//!
//! While the index is still being built, `/ask` responds `503` with a
//! `status: "initializing"` body so clients can retry. After a failed
//! build it responds `500` with the recorded cause.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::LibrettoError;
use crate::database::SearchResult;
use crate::engine::{QueryEngine, ReadinessState};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

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

/// Maps an engine failure to the HTTP contract. Pipeline failures are
/// reported with a generic message; the detail only goes to the log.
fn classify_engine_error(err: LibrettoError) -> AppError {
    match err {
        LibrettoError::NotReady => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "initializing",
            message: "The knowledge base is still initializing; retry shortly".to_string(),
        },
        LibrettoError::IndexBuild(cause) => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "index_failed",
            message: format!("Knowledge base initialization failed: {}", cause),
        },
        other => {
            error!("Failed to answer question: {}", other);
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: "An internal error occurred while answering the question".to_string(),
            }
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let answer = state
        .engine
        .answer(question)
        .await
        .map_err(classify_engine_error)?;

    Ok(Json(AskResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let readiness = state.engine.readiness();
    let response = match readiness.state() {
        ReadinessState::Initializing => StatusResponse {
            status: "initializing",
            error: None,
        },
        ReadinessState::Ready => StatusResponse {
            status: "ready",
            error: None,
        },
        ReadinessState::Failed => StatusResponse {
            status: "failed",
            error: readiness.failure_cause().map(ToString::to_string),
        },
    };
    Json(response)
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router. Split out from [`run_server`] so tests
/// can serve it on an ephemeral port.
#[inline]
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serves the API on the given port until the process is terminated.
///
/// Accepts connections immediately; requests arriving before the index
/// build finishes get the `initializing` response rather than a refused
/// connection.
#[inline]
pub async fn run_server(port: u16, state: AppState) -> crate::Result<()> {
    let app = build_router(state);
    let addr = format!("127.0.0.1:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
