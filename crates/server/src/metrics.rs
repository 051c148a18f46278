//! Prometheus metrics for the admin server.
//!
//! All collectors live on one [`ServerMetrics`] registry owned by the app
//! state; the fetch counters from the core crate are registered on the same
//! registry at startup.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::state::AppState;

pub struct ServerMetrics {
    registry: Registry,
    pub http_request_duration: HistogramVec,
    pub http_requests_total: IntCounterVec,
    pub http_requests_in_flight: IntGauge,
    pub ws_connections_active: IntGauge,
    pub ws_connections_total: IntCounter,
    pub ws_messages_sent: IntCounterVec,
    pub ws_lag_events: IntCounter,
    session_connected: IntGauge,
    fetch_queue_active: IntGauge,
    fetch_queue_queued: IntGauge,
    tracked_shows: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gumshoe_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path", "status"],
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("gumshoe_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_requests_in_flight = IntGauge::new(
            "gumshoe_http_requests_in_flight",
            "Number of HTTP requests currently being processed",
        )?;
        let ws_connections_active = IntGauge::new(
            "gumshoe_ws_connections_active",
            "Number of active WebSocket connections",
        )?;
        let ws_connections_total = IntCounter::new(
            "gumshoe_ws_connections_total",
            "Total WebSocket connections since startup",
        )?;
        let ws_messages_sent = IntCounterVec::new(
            Opts::new("gumshoe_ws_messages_sent_total", "WebSocket messages sent"),
            &["type"],
        )?;
        let ws_lag_events = IntCounter::new(
            "gumshoe_ws_lag_events_total",
            "WebSocket lag events (client fell behind)",
        )?;
        let session_connected = IntGauge::new(
            "gumshoe_session_connected",
            "Whether the IRC session holds a live connection (1) or not (0)",
        )?;
        let fetch_queue_active = IntGauge::new(
            "gumshoe_fetch_queue_active",
            "Fetches currently downloading",
        )?;
        let fetch_queue_queued = IntGauge::new(
            "gumshoe_fetch_queue_queued",
            "Fetches waiting for a worker",
        )?;
        let tracked_shows = IntGauge::new("gumshoe_tracked_shows", "Number of tracked shows")?;

        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(ws_connections_active.clone()))?;
        registry.register(Box::new(ws_connections_total.clone()))?;
        registry.register(Box::new(ws_messages_sent.clone()))?;
        registry.register(Box::new(ws_lag_events.clone()))?;
        registry.register(Box::new(session_connected.clone()))?;
        registry.register(Box::new(fetch_queue_active.clone()))?;
        registry.register(Box::new(fetch_queue_queued.clone()))?;
        registry.register(Box::new(tracked_shows.clone()))?;

        Ok(Self {
            registry,
            http_request_duration,
            http_requests_total,
            http_requests_in_flight,
            ws_connections_active,
            ws_connections_total,
            ws_messages_sent,
            ws_lag_events,
            session_connected,
            fetch_queue_active,
            fetch_queue_queued,
            tracked_shows,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Refresh gauges that mirror live component state.
    pub fn collect_dynamic(&self, state: &AppState) {
        let coordinator = state.coordinator();
        self.session_connected
            .set(i64::from(coordinator.session().state().is_connected()));

        let queue = coordinator.fetcher().status();
        self.fetch_queue_active.set(queue.active as i64);
        self.fetch_queue_queued.set(queue.queued as i64);

        if let Ok(shows) = coordinator.catalog().list_shows() {
            self.tracked_shows.set(shows.len() as i64);
        }
    }
}

/// Normalize a path for metric labels (replace numeric IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
