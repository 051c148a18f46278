use serde::{Deserialize, Serialize};

/// Connection session state.
///
/// `Stopped -> Connecting -> Connected -> (RequestingInvite ->) Watching`,
/// ending in `Disconnected`. `Error` is transient and always followed by
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Connecting,
    Connected,
    RequestingInvite,
    Watching,
    Disconnected,
    Error,
}

impl SessionState {
    /// Whether a live connection exists in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::RequestingInvite | SessionState::Watching
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::RequestingInvite => "requesting_invite",
            SessionState::Watching => "watching",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
