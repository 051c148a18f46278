use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use gumshoe_core::fetcher::FetchPoolStatus;
use gumshoe_core::{FetchSummary, PipelineStatus, SanitizedConfig, SessionState};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Response for the pipeline status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session: SessionState,
    /// Whether the supervisor keeps the session connected
    pub session_wanted: bool,
    pub pipeline: PipelineStatus,
    pub fetches: FetchSummary,
    pub fetch_queue: FetchPoolStatus,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let coordinator = state.coordinator();
    Json(StatusResponse {
        session: coordinator.session().state(),
        session_wanted: state.supervisor().is_wanted(),
        pipeline: coordinator.events().status(),
        fetches: state.fetch_stats().snapshot(),
        fetch_queue: coordinator.fetcher().status(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Re-read the config file, same as SIGHUP.
pub async fn reload_config(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReloadResponse>) {
    match state.reload().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReloadResponse {
                reloaded: true,
                error: None,
            }),
        ),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Config reload rejected");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ReloadResponse {
                    reloaded: false,
                    error: Some(format!("{:#}", e)),
                }),
            )
        }
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics().collect_dynamic(&state);
    match state.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}
