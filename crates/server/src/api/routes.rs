use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{fetches, handlers, middleware::metrics_middleware, session, shows, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/config/reload", post(handlers::reload_config))
        .route("/status", get(handlers::get_status))
        // Tracked shows
        .route("/shows", get(shows::list_shows).post(shows::create_show))
        .route(
            "/shows/{id}",
            get(shows::get_show)
                .put(shows::update_show)
                .delete(shows::delete_show),
        )
        .route("/shows/{id}/episodes", get(shows::list_episodes))
        // Fetch statistics
        .route("/fetches", get(fetches::get_fetches))
        // Session control
        .route("/session/start", post(session::start_session))
        .route("/session/stop", post(session::stop_session))
        .route("/session/logs", get(session::session_logs))
        // Event stream
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(from_fn_with_state(state.clone(), metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
