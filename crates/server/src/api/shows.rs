//! Tracked show API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use gumshoe_core::catalog::Episode;
use gumshoe_core::{CatalogError, NewShow, Show};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for tracking or updating a show
#[derive(Debug, Deserialize)]
pub struct CreateShowBody {
    pub title: String,
    /// Wanted quality token, e.g. "720p". Empty or "420" means SD only.
    #[serde(default)]
    pub quality: String,
    /// false for daily shows keyed by air date
    #[serde(default = "default_episodal")]
    pub episodal: bool,
}

fn default_episodal() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ShowResponse {
    pub id: i64,
    pub title: String,
    pub quality: String,
    pub episodal: bool,
    pub last_update: Option<String>,
}

impl From<Show> for ShowResponse {
    fn from(show: Show) -> Self {
        Self {
            id: show.id,
            title: show.title,
            quality: show.quality,
            episodal: show.episodal,
            last_update: show.last_update.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListShowsResponse {
    pub shows: Vec<ShowResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct EpisodeResponse {
    pub id: i64,
    /// "S01E02" or the air date
    pub label: String,
    pub season: u32,
    pub episode: u32,
    pub air_date: String,
    pub added_at: String,
}

impl From<Episode> for EpisodeResponse {
    fn from(episode: Episode) -> Self {
        let label = if episode.air_date.is_empty() {
            format!("S{:02}E{:02}", episode.season, episode.episode)
        } else {
            episode.air_date.clone()
        };
        Self {
            id: episode.id,
            label,
            season: episode.season,
            episode: episode.episode,
            air_date: episode.air_date,
            added_at: episode.added_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListEpisodesResponse {
    pub show_id: i64,
    pub episodes: Vec<EpisodeResponse>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ShowErrorResponse {
    pub error: String,
}

type ShowError = (StatusCode, Json<ShowErrorResponse>);

fn catalog_error(e: CatalogError) -> ShowError {
    let status = match &e {
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::AlreadyExists(_) => StatusCode::CONFLICT,
        CatalogError::InvalidShow(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ShowErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_shows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListShowsResponse>, ShowError> {
    let shows = state
        .coordinator()
        .catalog()
        .list_shows()
        .map_err(catalog_error)?;
    Ok(Json(ListShowsResponse {
        total: shows.len(),
        shows: shows.into_iter().map(ShowResponse::from).collect(),
    }))
}

/// Start tracking a show
pub async fn create_show(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateShowBody>,
) -> Result<(StatusCode, Json<ShowResponse>), ShowError> {
    let show = state
        .coordinator()
        .catalog()
        .add_show(&NewShow {
            title: body.title,
            quality: body.quality,
            episodal: body.episodal,
        })
        .map_err(catalog_error)?;
    info!(show = %show.title, id = show.id, "Show tracked");
    Ok((StatusCode::CREATED, Json(ShowResponse::from(show))))
}

pub async fn get_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ShowResponse>, ShowError> {
    let show = state
        .coordinator()
        .catalog()
        .get_show(id)
        .map_err(catalog_error)?;
    Ok(Json(ShowResponse::from(show)))
}

/// Replace title, quality and numbering of a tracked show
pub async fn update_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<CreateShowBody>,
) -> Result<Json<ShowResponse>, ShowError> {
    let show = state
        .coordinator()
        .catalog()
        .update_show(
            id,
            &NewShow {
                title: body.title,
                quality: body.quality,
                episodal: body.episodal,
            },
        )
        .map_err(catalog_error)?;
    info!(show = %show.title, id, "Show updated");
    Ok(Json(ShowResponse::from(show)))
}

/// Stop tracking a show and forget its episodes
pub async fn delete_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ShowError> {
    state
        .coordinator()
        .catalog()
        .remove_show(id)
        .map_err(catalog_error)?;
    info!(id, "Show removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_episodes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ListEpisodesResponse>, ShowError> {
    let episodes = state
        .coordinator()
        .catalog()
        .list_episodes(id)
        .map_err(catalog_error)?;
    Ok(Json(ListEpisodesResponse {
        show_id: id,
        episodes: episodes.into_iter().map(EpisodeResponse::from).collect(),
    }))
}
