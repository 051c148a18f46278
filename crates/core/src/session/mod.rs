//! Persistent, authenticated connection to the announcement channel.
//!
//! [`ConnectionSession`] owns the lifecycle (start, stop, reconfigure). The
//! TCP connect happens inside `start`, so an unreachable server is reported
//! to the caller directly; everything after that (registration, NickServ,
//! invite, join and the receive loop) runs in a spawned task that publishes
//! state changes on the [`EventHub`] and forwards channel lines over an mpsc
//! channel. Failures are never retried here.

mod connection;
mod driver;
mod message;
mod protocol_log;
mod state;

pub use driver::{classify_nickserv_reply, render_invite};
pub use message::IrcMessage;
pub use protocol_log::MAX_LOG_LINES;
pub use state::SessionState;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::IrcConfig;
use crate::events::{Component, EventHub, PipelineEvent};
use connection::IrcConnection;
use driver::SessionDriver;
use protocol_log::ProtocolLog;

/// Errors for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to {server}: {message}")]
    Connect { server: String, message: String },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("NickServ authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Nickname {nick} rejected: {reason}")]
    NicknameRejected { nick: String, reason: String },

    #[error("Cannot join {channel}: {reason}")]
    JoinRejected { channel: String, reason: String },

    #[error("Kicked from {channel}: {reason}")]
    Kicked { channel: String, reason: String },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Session cancelled")]
    Cancelled,
}

/// State shared between the session handle and its driver task.
#[derive(Clone)]
pub(crate) struct SessionContext {
    state: Arc<RwLock<SessionState>>,
    events: EventHub,
    lines: mpsc::Sender<String>,
    log: ProtocolLog,
}

impl SessionContext {
    fn transition(&self, state: SessionState, detail: Option<String>) {
        {
            let mut current = self.state.write().unwrap();
            if *current == state {
                return;
            }
            *current = state;
        }
        info!(state = %state, detail = detail.as_deref().unwrap_or(""), "IRC session state");
        self.log.push(match &detail {
            Some(detail) => format!("** {} ({})", state, detail),
            None => format!("** {}", state),
        });
        self.events
            .publish(PipelineEvent::session_state(state, detail));
    }
}

struct RunningSession {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Handle to the connection session.
pub struct ConnectionSession {
    config: RwLock<Arc<IrcConfig>>,
    ctx: SessionContext,
    /// Held for the whole of start/stop/reconfigure so they never overlap.
    lifecycle: Mutex<Option<RunningSession>>,
}

impl ConnectionSession {
    /// Create a stopped session. Channel lines are sent to `lines` while the
    /// session is watching.
    pub fn new(config: IrcConfig, events: EventHub, lines: mpsc::Sender<String>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            ctx: SessionContext {
                state: Arc::new(RwLock::new(SessionState::Stopped)),
                events,
                lines,
                log: ProtocolLog::default(),
            },
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.ctx.state.read().unwrap()
    }

    /// The last [`MAX_LOG_LINES`] protocol lines and state changes, oldest
    /// first. Kept across reconnects.
    pub fn recent_lines(&self) -> Vec<String> {
        self.ctx.log.snapshot()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<IrcConfig> {
        self.config.read().unwrap().clone()
    }

    /// Connect and begin the handshake.
    ///
    /// Returns once the TCP connection is up; the rest of the handshake is
    /// observable through state events. A failed connect returns the error
    /// and leaves the session `Stopped`.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut running = self.lifecycle.lock().await;
        self.start_locked(&mut running).await
    }

    /// Disconnect. Idempotent; waits for the receive loop to finish.
    pub async fn stop(&self) {
        let mut running = self.lifecycle.lock().await;
        self.stop_locked(&mut running).await;
    }

    /// Replace the connection parameters.
    ///
    /// A running session is disconnected and reconnected with the new
    /// settings; a stopped one just keeps them for the next start. Identical
    /// settings leave a running session untouched.
    pub async fn reconfigure(&self, config: IrcConfig) -> Result<(), SessionError> {
        let mut running = self.lifecycle.lock().await;
        if *self.config() == config {
            return Ok(());
        }

        let was_running = running.as_ref().is_some_and(|r| !r.task.is_finished());
        self.stop_locked(&mut running).await;
        *self.config.write().unwrap() = Arc::new(config);
        info!(was_running, "IRC session reconfigured");

        if was_running {
            self.start_locked(&mut running).await
        } else {
            Ok(())
        }
    }

    async fn start_locked(&self, running: &mut Option<RunningSession>) -> Result<(), SessionError> {
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(SessionError::AlreadyRunning);
        }

        let config = self.config();
        self.ctx.transition(
            SessionState::Connecting,
            Some(format!("{}:{}", config.server, config.port)),
        );

        let conn = match IrcConnection::connect(
            &config.server,
            config.port,
            Duration::from_secs(config.connect_timeout_secs),
            self.ctx.log.clone(),
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "IRC connect failed");
                self.ctx
                    .events
                    .publish(PipelineEvent::error(Component::Session, e.to_string()));
                self.ctx.transition(SessionState::Stopped, Some(e.to_string()));
                return Err(e);
            }
        };
        self.ctx.transition(SessionState::Connected, None);

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let driver = SessionDriver::new(conn, config, self.ctx.clone(), shutdown_rx);
        let task = tokio::spawn(driver.run());
        *running = Some(RunningSession { shutdown, task });
        Ok(())
    }

    async fn stop_locked(&self, running: &mut Option<RunningSession>) {
        let Some(session) = running.take() else {
            return;
        };
        let _ = session.shutdown.send(());
        if let Err(e) = session.task.await {
            warn!(error = %e, "IRC session task ended abnormally");
            self.ctx.transition(SessionState::Disconnected, None);
        }
    }
}
