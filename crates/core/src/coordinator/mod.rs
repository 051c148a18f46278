//! Pipeline coordinator.
//!
//! Takes channel lines in receipt order and runs them through the matcher
//! and the catalog. Accepted releases are handed to the fetch queue; a
//! completion task records the episode only after its fetch succeeded, so a
//! failed download leaves the episode eligible for the next announcement.

mod types;

pub use types::{AcceptedRelease, CoordinatorError, LineDecision};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, EpisodeClaim, EpisodeKey, RecordOutcome};
use crate::config::{CookieConfig, PipelineConfig};
use crate::events::{Component, EventHub, PipelineEvent};
use crate::fetcher::{FetchError, FetchHandle, FetchQueue, FetchRequest};
use crate::matcher::PatternSet;
use crate::session::ConnectionSession;

/// Configuration the coordinator swaps as one unit.
struct Snapshot {
    patterns: PatternSet,
    cookies: Vec<CookieConfig>,
}

/// Wires session lines through matcher, catalog and fetch queue.
pub struct Coordinator {
    snapshot: RwLock<Arc<Snapshot>>,
    catalog: Arc<Catalog>,
    fetcher: Arc<FetchQueue>,
    session: Arc<ConnectionSession>,
    events: EventHub,
    completions: Mutex<JoinSet<()>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Coordinator {
    /// Build a coordinator. Fails only if the configured patterns are unusable.
    pub fn new(
        config: &PipelineConfig,
        catalog: Arc<Catalog>,
        fetcher: Arc<FetchQueue>,
        session: Arc<ConnectionSession>,
        events: EventHub,
    ) -> Result<Self, CoordinatorError> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                patterns: PatternSet::new(&config.matcher)?,
                cookies: config.cookies.clone(),
            })),
            catalog,
            fetcher,
            session,
            events,
            completions: Mutex::new(JoinSet::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn fetcher(&self) -> &Arc<FetchQueue> {
        &self.fetcher
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Spawn the line loop. Lines are handled one at a time in the order
    /// received; fetches run on the queue's workers.
    pub fn spawn(self: &Arc<Self>, mut lines: mpsc::Receiver<String>) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Coordinator already running");
        }
        let coordinator = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Coordinator started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    line = lines.recv() => match line {
                        Some(line) => {
                            if let Err(e) = coordinator.handle_line(&line).await {
                                warn!(error = %e, "Failed to handle announcement");
                            }
                        }
                        None => break,
                    },
                }
            }
            coordinator.running.store(false, Ordering::SeqCst);
            info!("Coordinator stopped");
        })
    }

    /// Run one line through the decision steps, short-circuiting on the
    /// first negative answer.
    ///
    /// Component errors are published on the event hub and also returned.
    pub async fn handle_line(&self, line: &str) -> Result<LineDecision, CoordinatorError> {
        let decision = self.evaluate(line).await;
        if let Err(e) = &decision {
            let component = match e {
                CoordinatorError::Catalog(_) => Component::Catalog,
                CoordinatorError::Fetch(_) => Component::Fetch,
                CoordinatorError::Session(_) => Component::Session,
                CoordinatorError::Patterns(_) => Component::Matcher,
            };
            self.events
                .publish(PipelineEvent::error(component, e.to_string()));
        }
        decision
    }

    async fn evaluate(&self, line: &str) -> Result<LineDecision, CoordinatorError> {
        let snapshot = self.snapshot();

        let Some(announce) = snapshot.patterns.match_announce(line) else {
            return Ok(LineDecision::NotAnnouncement);
        };
        let Some(identity) = snapshot.patterns.match_episode(&announce.title) else {
            debug!(title = %announce.title, "Announcement is not an episode");
            return Ok(LineDecision::NotEpisode);
        };
        let Some(show) = self.catalog.find_tracked_show(&identity.show_title)? else {
            debug!(show = %identity.show_title, "Show not tracked");
            return Ok(LineDecision::Untracked);
        };
        if EpisodeKey::for_show(&show, &identity).is_none() {
            debug!(show = %show.title, episode = %identity.label(), "Numbering does not fit show");
            return Ok(LineDecision::WrongNumbering);
        }
        if !self.catalog.is_new_episode(&show, &identity)? {
            debug!(show = %show.title, episode = %identity.label(), "Episode already seen");
            return Ok(LineDecision::AlreadySeen);
        }
        if !Catalog::quality_acceptable(&show, &identity.quality) {
            debug!(
                show = %show.title,
                wanted = %show.quality,
                found = %identity.quality,
                "Quality rejected"
            );
            return Ok(LineDecision::WrongQuality);
        }
        let Some(claim) = self.catalog.claim_episode(&show, &identity)? else {
            debug!(show = %show.title, episode = %identity.label(), "Episode claimed concurrently");
            return Ok(LineDecision::AlreadySeen);
        };

        let handle = self.fetcher.enqueue(FetchRequest {
            url: announce.url.clone(),
            cookies: snapshot.cookies.clone(),
        })?;

        let release = AcceptedRelease {
            show,
            identity,
            url: announce.url,
        };
        info!(
            show = %release.show.title,
            episode = %release.identity.label(),
            url = %release.url,
            "Accepted release"
        );
        self.track_completion(release.clone(), handle, claim).await;

        Ok(LineDecision::Accepted(Box::new(release)))
    }

    /// Record the episode once its fetch succeeds. The claim is held until
    /// then, so concurrent announcements of the same episode stay rejected.
    async fn track_completion(&self, release: AcceptedRelease, handle: FetchHandle, claim: EpisodeClaim) {
        let catalog = self.catalog.clone();
        let events = self.events.clone();

        let mut completions = self.completions.lock().await;
        while completions.try_join_next().is_some() {}

        completions.spawn(async move {
            let _claim = claim;
            let AcceptedRelease { show, identity, url } = release;

            match handle.wait().await {
                Ok(file) => {
                    events.publish(PipelineEvent::FetchResult {
                        url: url.clone(),
                        status_code: file.status_code,
                        at: Utc::now(),
                    });
                    match catalog.record_episode(&show, &identity) {
                        Ok(RecordOutcome::Recorded(_)) => {
                            events.publish(PipelineEvent::EpisodeFetched {
                                show: show.title.clone(),
                                episode: identity.label(),
                                path: file.path,
                                at: Utc::now(),
                            });
                        }
                        Ok(RecordOutcome::AlreadyRecorded(_)) => {
                            debug!(show = %show.title, episode = %identity.label(), "Duplicate download discarded");
                        }
                        Err(e) => {
                            error!(show = %show.title, error = %e, "Failed to record fetched episode");
                            events.publish(PipelineEvent::error(Component::Catalog, e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    if let FetchError::Status { status_code, .. } = &e {
                        events.publish(PipelineEvent::FetchResult {
                            url: url.clone(),
                            status_code: *status_code,
                            at: Utc::now(),
                        });
                    }
                    events.publish(PipelineEvent::error(
                        Component::Fetch,
                        format!("{} {}: {}", show.title, identity.label(), e),
                    ));
                }
            }
        });
    }

    /// Swap in new patterns, cookies and session settings.
    ///
    /// Patterns are compiled first; if any is invalid nothing changes and the
    /// previous configuration keeps running.
    ///
    /// Once the patterns compile, the new patterns, cookies and IRC settings
    /// all take effect. A [`CoordinatorError::Session`] only means the
    /// reconnect with the new settings failed; the session keeps them and the
    /// next start uses them.
    pub async fn reconfigure(&self, config: &PipelineConfig) -> Result<(), CoordinatorError> {
        let patterns = match PatternSet::new(&config.matcher) {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(error = %e, "Rejected reconfiguration");
                self.events
                    .publish(PipelineEvent::error(Component::Matcher, e.to_string()));
                return Err(e.into());
            }
        };

        *self.snapshot.write().unwrap() = Arc::new(Snapshot {
            patterns,
            cookies: config.cookies.clone(),
        });
        info!("Matcher configuration swapped");

        if let Err(e) = self.session.reconfigure(config.irc.clone()).await {
            self.events
                .publish(PipelineEvent::error(Component::Session, e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop the session and the line loop, then let in-flight fetches finish
    /// and get recorded.
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline");
        self.session.stop().await;
        let _ = self.shutdown_tx.send(());

        self.fetcher.close();
        self.settle().await;
        info!("Pipeline drained");
    }

    /// Wait until every accepted release has been fetched and recorded (or
    /// has failed).
    pub async fn settle(&self) {
        self.fetcher.drain().await;
        let mut completions = std::mem::take(&mut *self.completions.lock().await);
        while completions.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewShow, Show, SqliteShowStore};
    use crate::config::{IrcConfig, MatcherConfig};
    use crate::fetcher::FetchQueueConfig;
    use crate::metrics::FetchStats;
    use std::path::Path;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            irc: IrcConfig {
                server: "127.0.0.1".to_string(),
                port: 6667,
                nickname: "gumshoe".to_string(),
                key: String::new(),
                registered: false,
                email: String::new(),
                invite_template: None,
                channel_owner: None,
                watch_channel: "#announce".to_string(),
                connect_timeout_secs: 1,
                auth_timeout_secs: 1,
                reconnect_delay_secs: 1,
                enabled: false,
            },
            matcher: MatcherConfig::default(),
            cookies: Vec::new(),
        }
    }

    fn coordinator(dir: &Path) -> (Coordinator, Arc<FetchStats>) {
        let config = pipeline_config();
        let events = EventHub::default();
        let catalog = Arc::new(Catalog::new(Arc::new(SqliteShowStore::in_memory().unwrap())));
        let stats = Arc::new(FetchStats::new());
        let fetcher = Arc::new(
            FetchQueue::new(
                FetchQueueConfig {
                    download_dir: dir.to_path_buf(),
                    workers: 4,
                    download_rate: Duration::ZERO,
                    requests_per_minute: 0,
                    request_timeout: Duration::from_secs(5),
                },
                stats.clone(),
            )
            .unwrap(),
        );
        let (tx, _rx) = mpsc::channel(8);
        let session = Arc::new(ConnectionSession::new(config.irc.clone(), events.clone(), tx));
        let coordinator = Coordinator::new(&config, catalog, fetcher, session, events).unwrap();
        (coordinator, stats)
    }

    fn track(coordinator: &Coordinator, title: &str, quality: &str, episodal: bool) -> Show {
        coordinator
            .catalog()
            .add_show(&NewShow {
                title: title.to_string(),
                quality: quality.to_string(),
                episodal,
            })
            .unwrap()
    }

    fn announce(title: &str, url: &str) -> String {
        format!("BitMeTV-IRC2RSS: {} : {}", title, url)
    }

    #[tokio::test]
    async fn test_rejections_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, stats) = coordinator(dir.path());
        track(&coordinator, "Show Name", "", true);
        track(&coordinator, "Daily Show", "", false);

        let url = "http://127.0.0.1:9/x.torrent";
        let cases = [
            ("hello there".to_string(), LineDecision::NotAnnouncement),
            (announce("Some.Movie.2010.720p", url), LineDecision::NotEpisode),
            (announce("Other.Show.S01E02.HDTV", url), LineDecision::Untracked),
            (announce("Daily.Show.S01E02.HDTV", url), LineDecision::WrongNumbering),
            (announce("Show.Name.S01E02.720p.HDTV", url), LineDecision::WrongQuality),
        ];
        for (line, expected) in cases {
            assert_eq!(coordinator.handle_line(&line).await.unwrap(), expected, "{}", line);
        }
        assert_eq!(stats.snapshot().total, 0);
    }

    #[tokio::test]
    async fn test_recorded_episode_is_already_seen() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());
        let show = track(&coordinator, "Show Name", "", true);

        let identity = PatternSet::new(&MatcherConfig::default())
            .unwrap()
            .match_episode("Show.Name.S01E02.HDTV")
            .unwrap();
        coordinator.catalog().record_episode(&show, &identity).unwrap();

        let decision = coordinator
            .handle_line(&announce("Show.Name.S01E02.HDTV", "http://127.0.0.1:9/x.torrent"))
            .await
            .unwrap();
        assert_eq!(decision, LineDecision::AlreadySeen);
    }

    #[tokio::test]
    async fn test_accepted_release_is_recorded_after_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/show.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"d8:announce".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (coordinator, stats) = coordinator(dir.path());
        let show = track(&coordinator, "Show Name", "", true);
        let mut events = coordinator.events().subscribe();

        let line = announce(
            "Show.Name.S01E02.HDTV",
            &format!("{}/dl/show.torrent", server.uri()),
        );
        let decision = coordinator.handle_line(&line).await.unwrap();
        match &decision {
            LineDecision::Accepted(release) => {
                assert_eq!(release.show.id, show.id);
                assert_eq!(release.identity.label(), "S01E02");
            }
            other => panic!("expected accepted, got {:?}", other),
        }

        coordinator.settle().await;

        let episodes = coordinator.catalog().list_episodes(show.id).unwrap();
        assert_eq!(episodes.len(), 1);
        assert!(dir.path().join("show.torrent").exists());
        assert_eq!(stats.snapshot().results.get("200"), Some(&1));
        assert!(coordinator.catalog().get_show(show.id).unwrap().last_update.is_some());

        let mut fetched = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::EpisodeFetched { show, episode, .. } = event {
                assert_eq!(show, "Show Name");
                assert_eq!(episode, "S01E02");
                fetched = true;
            }
        }
        assert!(fetched);

        let again = coordinator.handle_line(&line).await.unwrap();
        assert_eq!(again, LineDecision::AlreadySeen);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_episode_new() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (coordinator, stats) = coordinator(dir.path());
        let show = track(&coordinator, "Show Name", "", true);

        let line = announce("Show.Name.S01E02.HDTV", &format!("{}/dl/x.torrent", server.uri()));
        assert!(coordinator.handle_line(&line).await.unwrap().is_accepted());
        coordinator.settle().await;

        assert!(coordinator.catalog().list_episodes(show.id).unwrap().is_empty());
        assert_eq!(stats.snapshot().results.get("404"), Some(&1));
        assert!(coordinator.events().status().last_error.is_some());

        // A later announcement may retry
        assert!(coordinator.handle_line(&line).await.unwrap().is_accepted());
        coordinator.settle().await;
    }

    #[tokio::test]
    async fn test_concurrent_announcements_fetch_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"d8:announce".to_vec())
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());
        let show = track(&coordinator, "Show Name", "", true);

        let line = announce("Show.Name.S01E02.HDTV", &format!("{}/dl/x.torrent", server.uri()));
        let decisions =
            futures::future::join_all((0..5).map(|_| coordinator.handle_line(&line))).await;
        let accepted = decisions
            .iter()
            .filter(|d| d.as_ref().unwrap().is_accepted())
            .count();
        assert_eq!(accepted, 1);

        coordinator.settle().await;
        assert_eq!(coordinator.catalog().list_episodes(show.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_reconfigure_keeps_previous_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        let mut config = pipeline_config();
        config.matcher.announce_pattern = "(?P<title>.*)".to_string();
        assert!(matches!(
            coordinator.reconfigure(&config).await,
            Err(CoordinatorError::Patterns(_))
        ));

        let decision = coordinator
            .handle_line(&announce("Untracked.S01E01", "http://127.0.0.1:9/x.torrent"))
            .await
            .unwrap();
        assert_eq!(decision, LineDecision::Untracked);
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        let mut config = pipeline_config();
        config.matcher.announce_pattern = r"NEW: (?P<title>\S+) (?P<url>\S+)".to_string();
        coordinator.reconfigure(&config).await.unwrap();

        let old = announce("Show.S01E01", "http://127.0.0.1:9/x.torrent");
        assert_eq!(coordinator.handle_line(&old).await.unwrap(), LineDecision::NotAnnouncement);
        let new = "NEW: Show.S01E01 http://127.0.0.1:9/x.torrent";
        assert_eq!(coordinator.handle_line(new).await.unwrap(), LineDecision::Untracked);
    }

    #[tokio::test]
    async fn test_session_failure_keeps_new_settings_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = pipeline_config();
        config.irc.port = listener.local_addr().unwrap().port();
        coordinator.session().reconfigure(config.irc.clone()).await.unwrap();
        coordinator.session().start().await.unwrap();
        let (_socket, _) = listener.accept().await.unwrap();

        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        config.irc.port = closed.local_addr().unwrap().port();
        drop(closed);
        config.matcher.announce_pattern = r"NEW: (?P<title>\S+) (?P<url>\S+)".to_string();

        assert!(matches!(
            coordinator.reconfigure(&config).await,
            Err(CoordinatorError::Session(_))
        ));
        assert_eq!(coordinator.session().config().port, config.irc.port);
        let new = "NEW: Show.S01E01 http://127.0.0.1:9/x.torrent";
        assert_eq!(coordinator.handle_line(new).await.unwrap(), LineDecision::Untracked);
        coordinator.session().stop().await;
    }
}
