//! Protocol side of a session: registration, NickServ, invite, join, watch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection::IrcConnection;
use super::message::IrcMessage;
use super::{SessionContext, SessionError, SessionState};
use crate::config::IrcConfig;
use crate::events::{Component, PipelineEvent};

/// Numerics that refuse a JOIN.
const JOIN_ERRORS: &[&str] = &["403", "405", "471", "473", "474", "475", "477"];

/// Numerics that refuse a nickname.
const NICK_ERRORS: &[&str] = &["431", "432", "433", "436", "437"];

/// Expand `%n%` (nickname) and `%k%` (key) in an invite template.
pub fn render_invite(template: &str, nickname: &str, key: &str) -> String {
    template.replace("%n%", nickname).replace("%k%", key)
}

/// Classify a NickServ reply: `Some(Ok)` confirms, `Some(Err)` rejects,
/// `None` is unrelated chatter (including the "nick is registered" prompt).
pub fn classify_nickserv_reply(text: &str) -> Option<Result<(), SessionError>> {
    let lower = text.to_ascii_lowercase();
    const FAILURES: &[&str] = &["incorrect", "isn't registered", "is not registered", "denied"];
    const CONFIRMATIONS: &[&str] = &["registered", "accepted", "identified"];

    if FAILURES.iter().any(|f| lower.contains(f)) {
        return Some(Err(SessionError::AuthenticationFailed(text.to_string())));
    }
    if lower.contains("is registered") || lower.contains("registered and protected") {
        return None;
    }
    if CONFIRMATIONS.iter().any(|c| lower.contains(c)) {
        return Some(Ok(()));
    }
    None
}

pub(super) struct SessionDriver {
    conn: IrcConnection,
    config: Arc<IrcConfig>,
    ctx: SessionContext,
    shutdown: broadcast::Receiver<()>,
}

impl SessionDriver {
    pub(super) fn new(
        conn: IrcConnection,
        config: Arc<IrcConfig>,
        ctx: SessionContext,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            conn,
            config,
            ctx,
            shutdown,
        }
    }

    /// Drive the session until shutdown or failure, then disconnect.
    pub(super) async fn run(mut self) {
        match self.drive().await {
            Ok(()) | Err(SessionError::Cancelled) => {
                let _ = self.conn.send("QUIT :gumshoe signing off").await;
                self.conn.shutdown().await;
                info!(server = %self.config.server, "IRC session stopped");
                self.ctx.transition(SessionState::Disconnected, None);
            }
            Err(e) => {
                warn!(server = %self.config.server, error = %e, "IRC session failed");
                self.ctx
                    .events
                    .publish(PipelineEvent::error(Component::Session, e.to_string()));
                self.ctx.transition(SessionState::Error, Some(e.to_string()));
                self.conn.shutdown().await;
                self.ctx.transition(SessionState::Disconnected, None);
            }
        }
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        self.register().await?;
        self.authenticate().await?;
        self.enter_channel().await?;
        self.watch().await
    }

    /// Wait for a message `handle` resolves, bounded by `within`.
    async fn expect<T>(
        &mut self,
        stage: &'static str,
        within: Duration,
        mut handle: impl FnMut(&IrcMessage) -> Option<Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        let deadline = Instant::now() + within;
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return Err(SessionError::Cancelled),
                next = tokio::time::timeout_at(deadline, self.conn.next_message()) => next,
            };
            let msg = next.map_err(|_| SessionError::Timeout(stage))??.ok_or_else(|| {
                SessionError::ConnectionClosed(format!("server closed the connection during {}", stage))
            })?;

            if msg.command == "ERROR" {
                return Err(SessionError::ConnectionClosed(
                    msg.trailing().unwrap_or("ERROR").to_string(),
                ));
            }
            if let Some(outcome) = handle(&msg) {
                return outcome;
            }
        }
    }

    async fn register(&mut self) -> Result<(), SessionError> {
        let config = self.config.clone();
        let nick = config.nickname.as_str();
        self.conn.send(&format!("NICK {}", nick)).await?;
        self.conn.send(&format!("USER {} 0 * :{}", nick, nick)).await?;

        self.expect(
            "server registration",
            Duration::from_secs(config.connect_timeout_secs),
            |msg| match msg.command.as_str() {
                "001" => Some(Ok(())),
                code if NICK_ERRORS.contains(&code) => Some(Err(SessionError::NicknameRejected {
                    nick: nick.to_string(),
                    reason: msg.trailing().unwrap_or(code).to_string(),
                })),
                _ => None,
            },
        )
        .await?;
        debug!(nick, "Registered with server");
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), SessionError> {
        let config = self.config.clone();
        if config.key.is_empty() {
            debug!("No NickServ key configured, skipping authentication");
            return Ok(());
        }

        let request = if config.registered {
            format!("PRIVMSG NickServ :IDENTIFY {}", config.key)
        } else {
            format!("PRIVMSG NickServ :REGISTER {} {}", config.key, config.email)
        };
        self.conn.send(&request).await?;

        self.expect(
            "nickname authentication",
            Duration::from_secs(config.auth_timeout_secs),
            |msg| {
                if !matches!(msg.command.as_str(), "NOTICE" | "PRIVMSG") || !msg.is_from("NickServ") {
                    return None;
                }
                classify_nickserv_reply(msg.trailing()?)
            },
        )
        .await?;
        info!(nick = %config.nickname, registered = config.registered, "Nickname authenticated");
        Ok(())
    }

    async fn enter_channel(&mut self) -> Result<(), SessionError> {
        let config = self.config.clone();
        let channel = config.watch_channel.as_str();
        let within = Duration::from_secs(config.auth_timeout_secs);

        if let (Some(template), Some(owner)) = (&config.invite_template, &config.channel_owner) {
            self.ctx
                .transition(SessionState::RequestingInvite, Some(owner.clone()));
            let invite = render_invite(template, &config.nickname, &config.key);
            self.conn.send(&format!("PRIVMSG {} :{}", owner, invite)).await?;

            self.expect("channel invite", within, |msg| {
                let invited = msg.command == "INVITE"
                    && msg.trailing().is_some_and(|c| c.eq_ignore_ascii_case(channel));
                invited.then_some(Ok(()))
            })
            .await?;
            debug!(channel, "Invite received");
        }

        self.conn.send(&format!("JOIN {}", channel)).await?;
        let nick = config.nickname.as_str();
        self.expect("channel join", within, |msg| match msg.command.as_str() {
            "JOIN" if msg.is_from(nick)
                && msg.param(0).is_some_and(|c| c.eq_ignore_ascii_case(channel)) =>
            {
                Some(Ok(()))
            }
            code if JOIN_ERRORS.contains(&code)
                && msg.param(1).is_some_and(|c| c.eq_ignore_ascii_case(channel)) =>
            {
                Some(Err(SessionError::JoinRejected {
                    channel: channel.to_string(),
                    reason: msg.trailing().unwrap_or(code).to_string(),
                }))
            }
            _ => None,
        })
        .await?;

        self.ctx
            .transition(SessionState::Watching, Some(channel.to_string()));
        Ok(())
    }

    /// Forward channel messages until shutdown (`Ok`) or connection loss.
    async fn watch(&mut self) -> Result<(), SessionError> {
        let config = self.config.clone();
        let channel = config.watch_channel.as_str();

        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return Ok(()),
                next = self.conn.next_message() => next?,
            };
            let Some(msg) = next else {
                return Err(SessionError::ConnectionClosed(
                    "server closed the connection".to_string(),
                ));
            };

            match msg.command.as_str() {
                "PRIVMSG" | "NOTICE"
                    if msg.params.len() >= 2
                        && msg.param(0).is_some_and(|c| c.eq_ignore_ascii_case(channel)) =>
                {
                    let text = msg.trailing().unwrap_or_default().to_string();
                    if self.ctx.lines.send(text).await.is_err() {
                        return Err(SessionError::ConnectionClosed(
                            "line consumer went away".to_string(),
                        ));
                    }
                }
                "KICK"
                    if msg.param(0).is_some_and(|c| c.eq_ignore_ascii_case(channel))
                        && msg.param(1).is_some_and(|n| n.eq_ignore_ascii_case(&config.nickname)) =>
                {
                    return Err(SessionError::Kicked {
                        channel: channel.to_string(),
                        reason: msg.trailing().unwrap_or_default().to_string(),
                    });
                }
                "ERROR" => {
                    return Err(SessionError::ConnectionClosed(
                        msg.trailing().unwrap_or("ERROR").to_string(),
                    ));
                }
                _ => {}
            }
        }
    }
}
