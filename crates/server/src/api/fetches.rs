//! Fetch statistics API.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use gumshoe_core::fetcher::FetchPoolStatus;
use gumshoe_core::FetchSummary;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FetchesResponse {
    /// Completed fetches by HTTP status, plus last successful fetch time
    #[serde(flatten)]
    pub summary: FetchSummary,
    pub queue: FetchPoolStatus,
}

pub async fn get_fetches(State(state): State<Arc<AppState>>) -> Json<FetchesResponse> {
    Json(FetchesResponse {
        summary: state.fetch_stats().snapshot(),
        queue: state.coordinator().fetcher().status(),
    })
}
