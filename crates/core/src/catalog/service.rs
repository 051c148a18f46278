use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use super::{
    CatalogError, Episode, EpisodeKey, InsertOutcome, NewShow, RecordOutcome, Show, ShowStore,
    SD_ONLY_QUALITY,
};
use crate::matcher::{canonicalize_title, is_high_definition, EpisodeIdentity};

/// Policy layer over a [`ShowStore`].
///
/// The dedup check and the record step take a per-show lock, so two
/// announcements of the same episode are serialised while different shows
/// proceed independently. Episodes whose fetch is still running are tracked
/// as claims and count as "not new".
pub struct Catalog {
    store: Arc<dyn ShowStore>,
    show_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    in_flight: Arc<Mutex<HashSet<EpisodeKey>>>,
}

/// Marks an episode as being fetched. Dropping the claim releases it, so an
/// episode whose fetch failed becomes eligible again.
#[derive(Debug)]
pub struct EpisodeClaim {
    key: EpisodeKey,
    in_flight: Arc<Mutex<HashSet<EpisodeKey>>>,
}

impl EpisodeClaim {
    pub fn key(&self) -> &EpisodeKey {
        &self.key
    }
}

impl Drop for EpisodeClaim {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.key);
        }
    }
}

impl Catalog {
    pub fn new(store: Arc<dyn ShowStore>) -> Self {
        Self {
            store,
            show_locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn show_lock(&self, show_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.show_locks.lock().unwrap();
        locks.entry(show_id).or_default().clone()
    }

    /// Look up a tracked show by a free-text title. `Ok(None)` for untracked.
    pub fn find_tracked_show(&self, title: &str) -> Result<Option<Show>, CatalogError> {
        let canonical = canonicalize_title(title);
        if canonical.is_empty() {
            return Ok(None);
        }
        self.store.find_show_by_title(&canonical)
    }

    /// Whether `identity` is an episode of `show` that has neither been
    /// recorded nor claimed by a running fetch.
    ///
    /// A release whose numbering does not fit the show is never new.
    pub fn is_new_episode(&self, show: &Show, identity: &EpisodeIdentity) -> Result<bool, CatalogError> {
        let Some(key) = EpisodeKey::for_show(show, identity) else {
            return Ok(false);
        };
        let lock = self.show_lock(show.id);
        let _guard = lock.lock().unwrap();
        self.is_new_locked(&key)
    }

    fn is_new_locked(&self, key: &EpisodeKey) -> Result<bool, CatalogError> {
        if self.in_flight.lock().unwrap().contains(key) {
            return Ok(false);
        }
        Ok(!self.store.episode_exists(key)?)
    }

    /// Quality policy.
    ///
    /// A show without a wanted quality (empty or "420") takes only
    /// non-high-definition releases; otherwise the token must equal the
    /// show's quality.
    pub fn quality_acceptable(show: &Show, token: &str) -> bool {
        if show.quality.is_empty() || show.quality == SD_ONLY_QUALITY {
            !is_high_definition(token)
        } else {
            token == show.quality
        }
    }

    /// Atomically check that the episode is new and mark it as being fetched.
    ///
    /// Returns `None` when the episode is already recorded or another fetch
    /// holds it.
    pub fn claim_episode(
        &self,
        show: &Show,
        identity: &EpisodeIdentity,
    ) -> Result<Option<EpisodeClaim>, CatalogError> {
        let Some(key) = EpisodeKey::for_show(show, identity) else {
            return Ok(None);
        };
        let lock = self.show_lock(show.id);
        let _guard = lock.lock().unwrap();

        if !self.is_new_locked(&key)? {
            return Ok(None);
        }
        self.in_flight.lock().unwrap().insert(key.clone());
        Ok(Some(EpisodeClaim {
            key,
            in_flight: self.in_flight.clone(),
        }))
    }

    /// Persist the episode and refresh the show's last update time.
    ///
    /// Calling this again for the same dedup key returns
    /// [`RecordOutcome::AlreadyRecorded`] with the existing row.
    pub fn record_episode(
        &self,
        show: &Show,
        identity: &EpisodeIdentity,
    ) -> Result<RecordOutcome, CatalogError> {
        let key = EpisodeKey::for_show(show, identity).ok_or_else(|| {
            CatalogError::NumberingMismatch {
                show: show.title.clone(),
                label: identity.label(),
            }
        })?;
        let lock = self.show_lock(show.id);
        let _guard = lock.lock().unwrap();

        match self.store.insert_episode(&key)? {
            InsertOutcome::Inserted(episode) => {
                self.store.update_show_last_seen(show.id, Utc::now())?;
                info!(show = %show.title, episode = %identity.label(), "Recorded episode");
                Ok(RecordOutcome::Recorded(episode))
            }
            InsertOutcome::AlreadyPresent(episode) => {
                debug!(show = %show.title, episode = %identity.label(), "Episode already recorded");
                Ok(RecordOutcome::AlreadyRecorded(episode))
            }
        }
    }

    pub fn list_shows(&self) -> Result<Vec<Show>, CatalogError> {
        self.store.list_shows()
    }

    pub fn get_show(&self, id: i64) -> Result<Show, CatalogError> {
        self.store.get_show(id)
    }

    /// Start tracking a show. The title is canonicalised and the quality
    /// token lowercased before storage.
    pub fn add_show(&self, show: &NewShow) -> Result<Show, CatalogError> {
        let title = canonicalize_title(&show.title);
        if title.is_empty() {
            return Err(CatalogError::InvalidShow("title cannot be empty".to_string()));
        }
        let show = self.store.add_show(&NewShow {
            title,
            quality: show.quality.trim().to_ascii_lowercase(),
            episodal: show.episodal,
        })?;
        info!(id = show.id, title = %show.title, "Tracking show");
        Ok(show)
    }

    /// Replace a show's title, quality and numbering scheme, normalised the
    /// same way as [`Catalog::add_show`].
    pub fn update_show(&self, id: i64, show: &NewShow) -> Result<Show, CatalogError> {
        let title = canonicalize_title(&show.title);
        if title.is_empty() {
            return Err(CatalogError::InvalidShow("title cannot be empty".to_string()));
        }
        let show = self.store.update_show(
            id,
            &NewShow {
                title,
                quality: show.quality.trim().to_ascii_lowercase(),
                episodal: show.episodal,
            },
        )?;
        info!(id = show.id, title = %show.title, "Updated show");
        Ok(show)
    }

    pub fn remove_show(&self, id: i64) -> Result<(), CatalogError> {
        self.store.remove_show(id)?;
        self.show_locks.lock().unwrap().remove(&id);
        info!(id, "Stopped tracking show");
        Ok(())
    }

    pub fn list_episodes(&self, show_id: i64) -> Result<Vec<Episode>, CatalogError> {
        self.store.get_show(show_id)?;
        self.store.list_episodes(show_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteShowStore;
    use crate::matcher::EpisodeNumbering;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(SqliteShowStore::in_memory().unwrap()))
    }

    fn numbered(season: u32, episode: u32, quality: &str) -> EpisodeIdentity {
        EpisodeIdentity {
            show_title: "Some.Show".to_string(),
            numbering: EpisodeNumbering::Numbered { season, episode },
            quality: quality.to_string(),
        }
    }

    fn show_with_quality(quality: &str) -> Show {
        Show {
            id: 1,
            title: "Some Show".to_string(),
            quality: quality.to_string(),
            episodal: true,
            last_update: None,
        }
    }

    fn add(catalog: &Catalog, title: &str, quality: &str, episodal: bool) -> Show {
        catalog
            .add_show(&NewShow {
                title: title.to_string(),
                quality: quality.to_string(),
                episodal,
            })
            .unwrap()
    }

    #[test]
    fn test_find_tracked_show_canonicalises() {
        let catalog = catalog();
        let show = add(&catalog, "some.show", "720p", true);
        assert_eq!(show.title, "Some Show");

        let found = catalog.find_tracked_show("Some.Show").unwrap().unwrap();
        assert_eq!(found.id, show.id);
        assert!(catalog.find_tracked_show("Other.Show").unwrap().is_none());
        assert!(catalog.find_tracked_show("...").unwrap().is_none());
    }

    #[test]
    fn test_quality_policy_sd_only() {
        for quality in ["", "420"] {
            let show = show_with_quality(quality);
            assert!(!Catalog::quality_acceptable(&show, "1080p"));
            assert!(!Catalog::quality_acceptable(&show, "720p"));
            assert!(Catalog::quality_acceptable(&show, ""));
            assert!(Catalog::quality_acceptable(&show, "480p"));
        }
    }

    #[test]
    fn test_quality_policy_exact_match() {
        let show = show_with_quality("720p");
        assert!(Catalog::quality_acceptable(&show, "720p"));
        assert!(!Catalog::quality_acceptable(&show, "1080p"));
        assert!(!Catalog::quality_acceptable(&show, ""));
    }

    #[test]
    fn test_record_then_not_new() {
        let catalog = catalog();
        let show = add(&catalog, "Some Show", "720p", true);
        let identity = numbered(1, 2, "720p");

        assert!(catalog.is_new_episode(&show, &identity).unwrap());
        let outcome = catalog.record_episode(&show, &identity).unwrap();
        assert!(outcome.is_new());
        assert!(!catalog.is_new_episode(&show, &identity).unwrap());

        let refreshed = catalog.get_show(show.id).unwrap();
        assert!(refreshed.last_update.is_some());
    }

    #[test]
    fn test_record_twice_is_idempotent() {
        let catalog = catalog();
        let show = add(&catalog, "Some Show", "720p", true);
        let identity = numbered(1, 2, "720p");

        let first = catalog.record_episode(&show, &identity).unwrap();
        let second = catalog.record_episode(&show, &identity).unwrap();

        assert!(matches!(second, RecordOutcome::AlreadyRecorded(_)));
        assert_eq!(first.episode(), second.episode());
        assert_eq!(catalog.list_episodes(show.id).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_blocks_second_claim_until_dropped() {
        let catalog = catalog();
        let show = add(&catalog, "Some Show", "720p", true);
        let identity = numbered(1, 2, "720p");

        let claim = catalog.claim_episode(&show, &identity).unwrap().unwrap();
        assert_eq!(claim.key().season, 1);
        assert!(catalog.claim_episode(&show, &identity).unwrap().is_none());
        assert!(!catalog.is_new_episode(&show, &identity).unwrap());

        drop(claim);
        assert!(catalog.is_new_episode(&show, &identity).unwrap());
    }

    #[test]
    fn test_claim_after_record_is_refused() {
        let catalog = catalog();
        let show = add(&catalog, "Some Show", "720p", true);
        let identity = numbered(3, 4, "720p");

        catalog.record_episode(&show, &identity).unwrap();
        assert!(catalog.claim_episode(&show, &identity).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let catalog = Arc::new(catalog());
        let show = add(&catalog, "Some Show", "720p", true);
        let identity = numbered(1, 2, "720p");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                let show = show.clone();
                let identity = identity.clone();
                std::thread::spawn(move || {
                    if let Some(claim) = catalog.claim_episode(&show, &identity).unwrap() {
                        catalog.record_episode(&show, &identity).unwrap();
                        drop(claim);
                        1
                    } else {
                        0
                    }
                })
            })
            .collect();

        let winners: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(winners, 1);
        assert_eq!(catalog.list_episodes(show.id).unwrap().len(), 1);
    }

    #[test]
    fn test_numbering_mismatch() {
        let catalog = catalog();
        let daily = add(&catalog, "Daily Shown", "", false);
        let identity = numbered(1, 2, "");

        assert!(!catalog.is_new_episode(&daily, &identity).unwrap());
        assert!(catalog.claim_episode(&daily, &identity).unwrap().is_none());
        assert!(matches!(
            catalog.record_episode(&daily, &identity),
            Err(CatalogError::NumberingMismatch { .. })
        ));
    }

    #[test]
    fn test_add_show_rejects_empty_title() {
        let catalog = catalog();
        let result = catalog.add_show(&NewShow {
            title: " . ".to_string(),
            quality: String::new(),
            episodal: true,
        });
        assert!(matches!(result, Err(CatalogError::InvalidShow(_))));
    }

    #[test]
    fn test_update_show_normalises_and_applies_to_lookups() {
        let catalog = catalog();
        let show = add(&catalog, "some show", "", true);

        let updated = catalog
            .update_show(
                show.id,
                &NewShow {
                    title: "some.show.us".to_string(),
                    quality: " 720P ".to_string(),
                    episodal: false,
                },
            )
            .unwrap();

        assert_eq!(updated.title, "Some Show Us");
        assert_eq!(updated.quality, "720p");
        assert!(!updated.episodal);
        assert!(catalog.find_tracked_show("Some.Show").unwrap().is_none());
        let found = catalog.find_tracked_show("Some.Show.US").unwrap().unwrap();
        assert_eq!(found.id, show.id);

        assert!(matches!(
            catalog.update_show(
                show.id,
                &NewShow {
                    title: " . ".to_string(),
                    quality: String::new(),
                    episodal: true,
                },
            ),
            Err(CatalogError::InvalidShow(_))
        ));
    }

    #[test]
    fn test_list_episodes_unknown_show() {
        let catalog = catalog();
        assert!(matches!(
            catalog.list_episodes(42),
            Err(CatalogError::NotFound(_))
        ));
    }
}
