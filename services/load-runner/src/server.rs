//! HTTP front-end for running sweeps.
//!
//! Provides endpoints for:
//! - Running a sweep from a JSON configuration document
//! - Downloading the latest comparison table of a session
//! - Health checks
//!
//! Clients identify their session with the `x-session-id` header; every
//! sweep writes its artifacts into that session's directory only.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use load_engine::report::COMPARISON_PREFIX;
use load_engine::{
    ComparisonReport, EngineError, LoadConfig, RunOrchestrator, RunSummary, SeriesView,
    UnreachableTarget,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::session::SessionManager;

/// Header carrying the session id, in both directions.
pub const SESSION_HEADER: &str = "x-session-id";

/// How often expired sessions are swept.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct ServerState {
    pub sessions: Arc<SessionManager>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TestRunResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub series: SeriesView,
    pub unreachable: Vec<UnreachableTarget>,
    pub summaries: Vec<RunSummary>,
    pub results_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub session_id: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/api/test", post(run_test_handler))
        .route("/api/download-results", get(download_results_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/test - Run a full sweep and return per-service series
async fn run_test_handler(
    Extension(state): Extension<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let config: LoadConfig = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid configuration: {}", e)),
    };
    let orchestrator = match RunOrchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return engine_error_response(e),
    };

    let session = match state.sessions.get_or_create(session_id(&headers)).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to create session");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    info!(
        session_id = %session.id,
        services = config.services.len(),
        levels = ?config.concurrent_users,
        "Starting sweep"
    );

    let report = match orchestrator.execute_config(&config, &session.context).await {
        Ok(report) => report,
        Err(e) => return engine_error_response(e),
    };

    let results_file = if report.summaries.is_empty() {
        None
    } else {
        match ComparisonReport::write_csv(&session.context, &report.summaries) {
            Ok(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            Err(e) => return engine_error_response(e),
        }
    };

    let response = TestRunResponse {
        session_id: session.id.clone(),
        series: ComparisonReport::series(&report.summaries, &config.concurrent_users),
        unreachable: report.unreachable,
        summaries: report.summaries,
        results_file,
    };

    let mut http = Json(response).into_response();
    if let Ok(value) = HeaderValue::from_str(&session.id) {
        http.headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    http
}

/// GET /api/download-results - Latest comparison CSV of the session
async fn download_results_handler(
    Extension(state): Extension<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let id = session_id(&headers).or(query.session_id.as_deref());
    let session = match id {
        Some(id) => state.sessions.get_session(id).await,
        None => None,
    };
    let Some(session) = session else {
        return error_response(StatusCode::NOT_FOUND, "No results available".to_string());
    };

    let Some(path) = session.context.latest_artifact(COMPARISON_PREFIX, ".csv") else {
        return error_response(StatusCode::NOT_FOUND, "No results available".to_string());
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "results.csv".to_string());
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read results file");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /health - Health check
async fn health_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.sessions.len().await,
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn engine_error_response(e: EngineError) -> Response {
    let status = match &e {
        EngineError::Config(_) => StatusCode::BAD_REQUEST,
        EngineError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Sweep failed");
    }
    error_response(status, e.to_string())
}

// ============================================================================
// Server
// ============================================================================

/// Serve the front-end on `port` and sweep expired sessions in the
/// background.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let cleanup = state.sessions.clone().spawn_cleanup_task(CLEANUP_INTERVAL);
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting load runner server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app).await;
    cleanup.abort();
    result?;

    Ok(())
}
