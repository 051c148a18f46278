//! Operator control of the IRC session.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use gumshoe_core::SessionState;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: SessionState,
    pub wanted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn response(state: &AppState, error: Option<String>) -> Json<SessionResponse> {
    Json(SessionResponse {
        state: state.coordinator().session().state(),
        wanted: state.supervisor().is_wanted(),
        error,
    })
}

/// Start the session. A failed connect is reported but keeps being retried.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionResponse>) {
    match state.supervisor().start().await {
        Ok(()) => (StatusCode::ACCEPTED, response(&state, None)),
        Err(e) => (StatusCode::BAD_GATEWAY, response(&state, Some(e.to_string()))),
    }
}

#[derive(Debug, Serialize)]
pub struct SessionLogsResponse {
    /// Oldest first, at most [`gumshoe_core::session::MAX_LOG_LINES`].
    pub lines: Vec<String>,
}

pub async fn stop_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    state.supervisor().stop().await;
    response(&state, None)
}

/// Recent protocol lines and state changes.
pub async fn session_logs(State(state): State<Arc<AppState>>) -> Json<SessionLogsResponse> {
    Json(SessionLogsResponse {
        lines: state.coordinator().session().recent_lines(),
    })
}
