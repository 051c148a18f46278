//! WebSocket stream of pipeline events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gumshoe_core::PipelineEvent;

use crate::state::AppState;

fn event_type(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::SessionState { .. } => "session_state",
        PipelineEvent::FetchResult { .. } => "fetch_result",
        PipelineEvent::EpisodeFetched { .. } => "episode_fetched",
        PipelineEvent::Error { .. } => "error",
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Forward every pipeline event to one client until it disconnects.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.coordinator().events().subscribe();

    let metrics = state.metrics();
    metrics.ws_connections_total.inc();
    metrics.ws_connections_active.inc();
    info!("WebSocket client connected");

    let send_state = state.clone();
    let send_task = tokio::spawn(async move {
        let metrics = send_state.metrics();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    metrics
                        .ws_messages_sent
                        .with_label_values(&[event_type(&event)])
                        .inc();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                        }
                        Err(e) => error!("Failed to serialize PipelineEvent: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} events", n);
                    metrics.ws_lag_events.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }
    });

    // Clients only send control frames
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    metrics.ws_connections_active.dec();
    info!("WebSocket client disconnected");
}
