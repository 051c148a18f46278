use thiserror::Error;

use crate::catalog::{CatalogError, Show};
use crate::fetcher::FetchError;
use crate::matcher::{EpisodeIdentity, PatternError};
use crate::session::SessionError;

/// A release that passed every check and was handed to the fetch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRelease {
    pub show: Show,
    pub identity: EpisodeIdentity,
    pub url: String,
}

/// What the pipeline did with one channel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDecision {
    /// Not an announcement.
    NotAnnouncement,
    /// Announcement whose title has no season/episode or air date.
    NotEpisode,
    /// Show is not tracked.
    Untracked,
    /// Numbered release for a daily show or the other way around.
    WrongNumbering,
    /// Episode already recorded or being fetched.
    AlreadySeen,
    WrongQuality,
    Accepted(Box<AcceptedRelease>),
}

impl LineDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LineDecision::Accepted(_))
    }
}

/// Errors for coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid patterns: {0}")]
    Patterns(#[from] PatternError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
