//! Types for the show catalog (tracked shows and seen episodes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::{EpisodeIdentity, EpisodeNumbering};

/// Quality value meaning "standard definition only".
pub const SD_ONLY_QUALITY: &str = "420";

/// A tracked show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Show {
    pub id: i64,
    /// Canonical title (see [`crate::matcher::canonicalize_title`]).
    pub title: String,
    /// Wanted quality token. Empty or "420" means standard definition only.
    pub quality: String,
    /// Numbered by season/episode (`true`) or by air date (`false`).
    pub episodal: bool,
    /// When an episode of this show was last accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Request to start tracking a show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShow {
    pub title: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default = "default_episodal")]
    pub episodal: bool,
}

fn default_episodal() -> bool {
    true
}

/// A release that has been fetched and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub show_id: i64,
    /// 0 for daily shows.
    pub season: u32,
    /// 0 for daily shows.
    pub episode: u32,
    /// Empty for episodal shows.
    pub air_date: String,
    pub added_at: DateTime<Utc>,
}

/// Dedup key of an episode.
///
/// Episodal shows key on `(show_id, season, episode)` with an empty air date;
/// daily shows key on `(show_id, air_date)` with season and episode at 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeKey {
    pub show_id: i64,
    pub season: u32,
    pub episode: u32,
    pub air_date: String,
}

impl EpisodeKey {
    /// Key for `identity` as an episode of `show`.
    ///
    /// `None` when the release numbering does not fit the show, e.g. a dated
    /// release for a season/episode show.
    pub fn for_show(show: &Show, identity: &EpisodeIdentity) -> Option<Self> {
        match (&identity.numbering, show.episodal) {
            (EpisodeNumbering::Numbered { season, episode }, true) => Some(Self {
                show_id: show.id,
                season: *season,
                episode: *episode,
                air_date: String::new(),
            }),
            (EpisodeNumbering::Dated { air_date }, false) => Some(Self {
                show_id: show.id,
                season: 0,
                episode: 0,
                air_date: air_date.clone(),
            }),
            _ => None,
        }
    }
}

/// Result of [`super::ShowStore::insert_episode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Episode),
    AlreadyPresent(Episode),
}

/// Result of [`super::Catalog::record_episode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "episode", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// A new row was written and the show's last update refreshed.
    Recorded(Episode),
    /// The dedup key was already present; nothing changed.
    AlreadyRecorded(Episode),
}

impl RecordOutcome {
    pub fn episode(&self) -> &Episode {
        match self {
            Self::Recorded(e) | Self::AlreadyRecorded(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

/// Errors for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid show: {0}")]
    InvalidShow(String),

    #[error("Release {label} does not fit show '{show}'")]
    NumberingMismatch { show: String, label: String },
}
