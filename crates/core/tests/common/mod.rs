//! Scripted IRC server for session tests.
#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use gumshoe_core::config::{IrcConfig, MatcherConfig, PipelineConfig};
use gumshoe_core::{PipelineEvent, SessionState};

pub const NICK: &str = "gumshoe";
pub const CHANNEL: &str = "#announce";

/// One-connection IRC server. Every client line is recorded and answered by
/// the responder; `push` writes unsolicited lines.
pub struct FakeIrc {
    pub port: u16,
    received: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<String>,
}

impl FakeIrc {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        for reply in respond(&line) {
                            if write.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        let _ = received_tx.send(line);
                    }
                    Some(line) = push_rx.recv() => {
                        if write.write_all(format!("{}\r\n", line).as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            port,
            received,
            push,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        self.push.send(line.into()).unwrap();
    }

    /// Wait for a client line starting with `prefix`.
    pub async fn expect_line(&mut self, prefix: &str) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let line = self.received.recv().await.expect("client went away");
                if line.starts_with(prefix) {
                    return line;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no client line starting with {:?}", prefix))
    }
}

/// Answers registration and JOIN like a plain server.
pub fn welcoming(line: &str) -> Vec<String> {
    if line.starts_with("USER ") {
        return vec![format!(":irc.test 001 {} :Welcome to the test network", NICK)];
    }
    if let Some(channel) = line.strip_prefix("JOIN ") {
        return vec![format!(":{}!bot@test JOIN {}", NICK, channel)];
    }
    Vec::new()
}

pub fn irc_config(port: u16) -> IrcConfig {
    IrcConfig {
        server: "127.0.0.1".to_string(),
        port,
        nickname: NICK.to_string(),
        key: String::new(),
        registered: false,
        email: String::new(),
        invite_template: None,
        channel_owner: None,
        watch_channel: CHANNEL.to_string(),
        connect_timeout_secs: 2,
        auth_timeout_secs: 1,
        reconnect_delay_secs: 1,
        enabled: true,
    }
}

pub fn pipeline_config(port: u16) -> PipelineConfig {
    PipelineConfig {
        irc: irc_config(port),
        matcher: MatcherConfig::default(),
        cookies: Vec::new(),
    }
}

/// Collect session states from the event stream until `last` shows up.
pub async fn states_until(
    events: &mut broadcast::Receiver<PipelineEvent>,
    last: SessionState,
) -> Vec<SessionState> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut states = Vec::new();
        loop {
            if let PipelineEvent::SessionState { state, .. } = events.recv().await.unwrap() {
                states.push(state);
                if state == last {
                    return states;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", last))
}
