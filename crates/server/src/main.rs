mod api;
mod metrics;
mod state;
mod supervisor;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gumshoe_core::{
    load_config, validate_config, Catalog, ConnectionSession, Coordinator, EventHub, FetchQueue,
    FetchQueueConfig, FetchStats, ShowStore, SqliteShowStore,
};

use api::create_router;
use metrics::ServerMetrics;
use state::AppState;
use supervisor::SessionSupervisor;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Channel lines buffered between the session and the coordinator
const LINE_BUFFER_SIZE: usize = 1024;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("GUMSHOE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("gumshoe.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;
    let pipeline = config.pipeline().context("Failed to read cookie file")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Database path: {:?}", config.database.path);

    // Create SQLite show store
    let store: Arc<dyn ShowStore> = Arc::new(
        SqliteShowStore::new(&config.database.path).context("Failed to open show database")?,
    );
    let catalog = Arc::new(Catalog::new(store));
    info!("Show catalog initialized");

    // Metrics registry shared by the admin server and the fetch queue
    let metrics = Arc::new(ServerMetrics::new().context("Failed to create metrics registry")?);
    let fetch_stats = Arc::new(
        FetchStats::with_registry(metrics.registry())
            .context("Failed to register fetch metrics")?,
    );

    let fetcher = Arc::new(
        FetchQueue::new(FetchQueueConfig::from(&config.fetch), fetch_stats.clone())
            .context("Failed to create fetch queue")?,
    );
    info!(
        workers = config.fetch.workers,
        download_dir = ?config.fetch.download_dir,
        "Fetch queue initialized"
    );

    // Session -> coordinator line channel
    let events = EventHub::default();
    let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER_SIZE);
    let session = Arc::new(ConnectionSession::new(
        pipeline.irc.clone(),
        events.clone(),
        lines_tx,
    ));

    let coordinator = Arc::new(
        Coordinator::new(&pipeline, catalog, fetcher, session.clone(), events.clone())
            .context("Failed to create pipeline coordinator")?,
    );
    coordinator.spawn(lines_rx);

    // Session supervisor reconnects with backoff
    let (shutdown_tx, _) = broadcast::channel(1);
    let supervisor = Arc::new(SessionSupervisor::new(session, events));
    let supervisor_handle = supervisor.spawn(shutdown_tx.subscribe());

    if config.irc.enabled {
        info!(
            server = %config.irc.server,
            channel = %config.irc.watch_channel,
            "Starting IRC session"
        );
        if let Err(e) = supervisor.start().await {
            warn!(error = %e, "Initial IRC connect failed, will retry");
        }
    } else {
        info!("IRC session disabled in config");
    }

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        config_path,
        coordinator.clone(),
        supervisor,
        fetch_stats,
        metrics,
    ));

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(state.clone()));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop reconnecting before the session goes down
    info!("Server shutting down...");
    let _ = shutdown_tx.send(());
    let _ = supervisor_handle.await;

    coordinator.shutdown().await;
    info!("Pipeline stopped");

    Ok(())
}

/// Reload the config file on SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(state: Arc<AppState>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler, config reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!(path = ?state.config_path(), "SIGHUP received, reloading configuration");
        if let Err(e) = state.reload().await {
            warn!("Config reload rejected, keeping previous configuration: {:#}", e);
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
