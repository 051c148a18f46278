use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tracing::info;

use gumshoe_core::{
    load_config, validate_config, Config, Coordinator, CoordinatorError, FetchStats,
    SanitizedConfig,
};

use crate::metrics::ServerMetrics;
use crate::supervisor::SessionSupervisor;

/// Shared application state
pub struct AppState {
    config: RwLock<Config>,
    config_path: PathBuf,
    coordinator: Arc<Coordinator>,
    supervisor: Arc<SessionSupervisor>,
    fetch_stats: Arc<FetchStats>,
    metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        coordinator: Arc<Coordinator>,
        supervisor: Arc<SessionSupervisor>,
        fetch_stats: Arc<FetchStats>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            coordinator,
            supervisor,
            fetch_stats,
            metrics,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&*self.config.read().unwrap())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    pub fn fetch_stats(&self) -> &FetchStats {
        &self.fetch_stats
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Re-read the config file and hand the new snapshot to the pipeline.
    ///
    /// Nothing changes if the file fails to load or validate. Admin server
    /// and fetch pool settings only take effect on restart.
    pub async fn reload(&self) -> Result<()> {
        let config = load_config(&self.config_path)
            .with_context(|| format!("Failed to load config from {:?}", self.config_path))?;
        validate_config(&config).context("Configuration validation failed")?;
        let pipeline = config.pipeline().context("Failed to read cookie file")?;

        // A session that fails to reconnect still runs with the new settings
        let applied = self.coordinator.reconfigure(&pipeline).await;
        if !matches!(applied, Err(CoordinatorError::Patterns(_))) {
            *self.config.write().unwrap() = config;
            info!(path = ?self.config_path, "Configuration reloaded");
        }
        applied.context("Failed to apply configuration")
    }
}

/// App state over an in-memory catalog and a session that is never started.
#[cfg(test)]
pub fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    use gumshoe_core::config::IrcConfig;
    use gumshoe_core::{
        Catalog, ConnectionSession, EventHub, FetchQueue, FetchQueueConfig, SqliteShowStore,
    };

    let dir = tempfile::tempdir().unwrap();
    let config: Config = gumshoe_core::load_config_from_str(
        r##"
[irc]
server = "127.0.0.1"
nickname = "gumshoe"
watch_channel = "#announce"
key = "s3cret"
"##,
    )
    .unwrap();
    let pipeline = config.pipeline().unwrap();

    let metrics = Arc::new(ServerMetrics::new().unwrap());
    let fetch_stats = Arc::new(FetchStats::with_registry(metrics.registry()).unwrap());
    let events = EventHub::default();
    let catalog = Arc::new(Catalog::new(Arc::new(SqliteShowStore::in_memory().unwrap())));
    let mut fetch_config = FetchQueueConfig::from(&config.fetch);
    fetch_config.download_dir = dir.path().to_path_buf();
    let fetcher = Arc::new(FetchQueue::new(fetch_config, fetch_stats.clone()).unwrap());
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    let irc: IrcConfig = pipeline.irc.clone();
    let session = Arc::new(ConnectionSession::new(irc, events.clone(), tx));
    let coordinator = Arc::new(
        Coordinator::new(&pipeline, catalog, fetcher, session.clone(), events.clone()).unwrap(),
    );
    let supervisor = Arc::new(SessionSupervisor::new(session, events));

    let state = Arc::new(AppState::new(
        config,
        dir.path().join("gumshoe.toml"),
        coordinator,
        supervisor,
        fetch_stats,
        metrics,
    ));
    (state, dir)
}
