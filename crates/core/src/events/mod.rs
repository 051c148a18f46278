//! Pipeline event stream and status snapshot.

mod types;

pub use types::{Component, ErrorRecord, PipelineEvent, PipelineStatus};

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

/// Fan-out of [`PipelineEvent`]s plus the status derived from them.
///
/// Cheaply cloneable; every component publishes through its own clone.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<PipelineEvent>,
    status: Arc<RwLock<PipelineStatus>>,
}

impl EventHub {
    /// Create a hub whose subscribers may lag by up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            status: Arc::new(RwLock::new(PipelineStatus::default())),
        }
    }

    /// Update the status snapshot and broadcast the event.
    pub fn publish(&self, event: PipelineEvent) {
        self.apply(&event);
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.read().unwrap().clone()
    }

    fn apply(&self, event: &PipelineEvent) {
        let mut status = self.status.write().unwrap();
        match event {
            PipelineEvent::SessionState { state, detail, at } => {
                status.session_state = *state;
                status.session_since = *at;
                status.session_detail = detail.clone();
            }
            PipelineEvent::EpisodeFetched {
                show, episode, at, ..
            } => {
                status.last_episode = Some(format!("{} {}", show, episode));
                status.last_episode_at = Some(*at);
            }
            PipelineEvent::Error {
                component,
                message,
                at,
            } => {
                status.last_error = Some(ErrorRecord {
                    component: *component,
                    message: message.clone(),
                    at: *at,
                });
            }
            PipelineEvent::FetchResult { .. } => {}
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
