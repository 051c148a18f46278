//! Show catalog: tracked shows, seen episodes and the "should this release be
//! fetched" policy.
//!
//! [`ShowStore`] is the persistence collaborator; [`Catalog`] layers title
//! canonicalisation, the quality policy and per-show serialisation of the
//! dedup check on top of it.

mod service;
mod sqlite;
mod types;

pub use service::{Catalog, EpisodeClaim};
pub use sqlite::SqliteShowStore;
pub use types::*;

use chrono::{DateTime, Utc};

/// Trait for show/episode storage.
pub trait ShowStore: Send + Sync {
    /// Look up a show by its canonical title.
    fn find_show_by_title(&self, title: &str) -> Result<Option<Show>, CatalogError>;

    /// Insert an episode row for `key`.
    ///
    /// Never creates a second row for the same key; an existing row is
    /// returned as [`InsertOutcome::AlreadyPresent`].
    fn insert_episode(&self, key: &EpisodeKey) -> Result<InsertOutcome, CatalogError>;

    /// Check if an episode with this dedup key has been recorded.
    fn episode_exists(&self, key: &EpisodeKey) -> Result<bool, CatalogError>;

    /// Refresh the show's last update time.
    fn update_show_last_seen(&self, show_id: i64, at: DateTime<Utc>) -> Result<(), CatalogError>;

    /// All tracked shows, ordered by title.
    fn list_shows(&self) -> Result<Vec<Show>, CatalogError>;

    fn get_show(&self, id: i64) -> Result<Show, CatalogError>;

    /// Start tracking a show. The title is stored as given.
    fn add_show(&self, show: &NewShow) -> Result<Show, CatalogError>;

    /// Replace title, quality and episodal of a tracked show. Recorded
    /// episodes and `last_update` are kept.
    fn update_show(&self, id: i64, show: &NewShow) -> Result<Show, CatalogError>;

    /// Stop tracking a show, dropping its episodes.
    fn remove_show(&self, id: i64) -> Result<(), CatalogError>;

    /// Recorded episodes of a show, newest first.
    fn list_episodes(&self, show_id: i64) -> Result<Vec<Episode>, CatalogError>;
}
