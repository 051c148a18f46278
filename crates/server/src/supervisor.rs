//! Keeps the IRC session up while the operator wants it running.
//!
//! A failed connect or a dropped session is retried after the configured
//! reconnect delay, doubling up to [`MAX_BACKOFF`]. Reaching `Watching`
//! resets the delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gumshoe_core::{ConnectionSession, EventHub, PipelineEvent, SessionError, SessionState};

pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

pub struct SessionSupervisor {
    session: Arc<ConnectionSession>,
    events: EventHub,
    wanted: AtomicBool,
}

impl SessionSupervisor {
    pub fn new(session: Arc<ConnectionSession>, events: EventHub) -> Self {
        Self {
            session,
            events,
            wanted: AtomicBool::new(false),
        }
    }

    pub fn is_wanted(&self) -> bool {
        self.wanted.load(Ordering::SeqCst)
    }

    /// Mark the session as wanted and try to connect now. A failure is
    /// returned but still retried in the background.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.wanted.store(true, Ordering::SeqCst);
        match self.session.start().await {
            Err(SessionError::AlreadyRunning) => Ok(()),
            other => other,
        }
    }

    pub async fn stop(&self) {
        self.wanted.store(false, Ordering::SeqCst);
        self.session.stop().await;
    }

    fn base_delay(&self) -> Duration {
        Duration::from_secs(self.session.config().reconnect_delay_secs.max(1))
    }

    /// Spawn the reconnect loop. Subscribes before returning so no state
    /// change published afterwards is missed.
    pub fn spawn(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let events = self.events.subscribe();
        tokio::spawn(self.clone().run(events, shutdown))
    }

    async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<PipelineEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut delay = self.base_delay();

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => event,
            };
            let state = match event {
                Ok(PipelineEvent::SessionState { state, .. }) => state,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Supervisor lagged behind session events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match state {
                SessionState::Watching => delay = self.base_delay(),
                SessionState::Stopped | SessionState::Disconnected if self.is_wanted() => {
                    info!(delay_secs = delay.as_secs(), "Reconnecting IRC session after delay");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay);

                    let current = self.session.state();
                    if !self.is_wanted() || current.is_connected() || current == SessionState::Connecting {
                        continue;
                    }
                    match self.session.start().await {
                        Ok(()) | Err(SessionError::AlreadyRunning) => {}
                        Err(e) => warn!(error = %e, "IRC reconnect failed"),
                    }
                }
                _ => {}
            }
        }
        debug!("Session supervisor stopped");
    }
}

/// Double the delay, capped at [`MAX_BACKOFF`].
pub fn next_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
