//! HTTP API and static frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Answer a question within a session |
//! | `GET`  | `/api/courses` | Course count and titles |
//! | `POST` | `/api/clear-session` | Drop a session's history and issue a new id |
//! | `GET`  | `/api/tools` | Tool declarations sent to the model |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/*` | Static frontend, when `server.static_dir` exists |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "missing field `query`" } }
//! ```
//!
//! Error codes: `validation_error` (422), `retrieval_failed` (500),
//! `generation_failed` (502), `rate_limited` (503), `timeout` (504),
//! `internal` (500). Any body that fails JSON extraction (wrong content
//! type, bad syntax, missing or mistyped fields) is a `validation_error`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::generator::GeneratorError;
use crate::models::CourseAnalytics;
use crate::rag::{QueryError, QueryOutcome, RagSystem};
use crate::tools::ToolDefinition;

type AppState = Arc<RagSystem>;

/// Build the application router. Static files are served from
/// `static_dir` for any path the API does not claim, falling back to
/// `index.html`.
pub fn router(rag: Arc<RagSystem>, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/courses", get(handle_courses))
        .route("/api/clear-session", post(handle_clear_session))
        .route("/api/tools", get(handle_tools))
        .route("/health", get(handle_health))
        .with_state(rag);

    if let Some(dir) = static_dir.filter(|d| d.is_dir()) {
        let index_file = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index_file)));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

/// Bind `server.bind` and serve until the process is stopped.
pub async fn run_server(config: &Config, rag: Arc<RagSystem>) -> anyhow::Result<()> {
    let static_dir = config.server.static_dir.as_path();
    if static_dir.is_dir() {
        tracing::info!(dir = %static_dir.display(), "serving frontend");
    } else {
        tracing::warn!(dir = %static_dir.display(), "frontend directory not found, serving API only");
    }

    let app = router(rag, Some(static_dir));
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            rejection.body_text(),
        )
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::Retrieval(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "retrieval_failed", message)
            }
            QueryError::Generation(GeneratorError::RateLimited(_)) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "rate_limited", message)
            }
            QueryError::Generation(GeneratorError::Timeout) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            QueryError::Generation(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "generation_failed", message)
            }
        }
    }
}

fn retrieval_failed(err: anyhow::Error) -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "retrieval_failed",
        format!("{:#}", err),
    )
}

// ============ POST /api/query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

async fn handle_query(
    State(rag): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutcome>, AppError> {
    let Json(request) = body?;
    let outcome = rag
        .query(&request.query, request.session_id.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "query failed");
            AppError::from(e)
        })?;
    Ok(Json(outcome))
}

// ============ GET /api/courses ============

async fn handle_courses(State(rag): State<AppState>) -> Result<Json<CourseAnalytics>, AppError> {
    let analytics = rag.course_analytics().await.map_err(retrieval_failed)?;
    Ok(Json(analytics))
}

// ============ POST /api/clear-session ============

#[derive(Debug, Default, Deserialize)]
pub struct ClearSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
struct ClearSessionResponse {
    session_id: String,
}

async fn handle_clear_session(
    State(rag): State<AppState>,
    body: Result<Json<ClearSessionRequest>, JsonRejection>,
) -> Result<Json<ClearSessionResponse>, AppError> {
    let Json(request) = body?;
    if let Some(old) = request.session_id.as_deref() {
        rag.sessions().clear(old);
    }
    Ok(Json(ClearSessionResponse {
        session_id: rag.sessions().create_session(),
    }))
}

// ============ GET /api/tools ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDefinition>,
}

async fn handle_tools(State(rag): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: rag.tools().definitions(),
    })
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
