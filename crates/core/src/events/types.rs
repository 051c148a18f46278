use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Pipeline component that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Session,
    Matcher,
    Catalog,
    Fetch,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Session => "session",
            Component::Matcher => "matcher",
            Component::Catalog => "catalog",
            Component::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

/// Observable pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Connection session moved to a new state.
    SessionState {
        state: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        at: DateTime<Utc>,
    },
    /// A fetch got an HTTP response.
    FetchResult {
        url: String,
        status_code: u16,
        at: DateTime<Utc>,
    },
    /// An accepted release was downloaded and recorded.
    EpisodeFetched {
        show: String,
        episode: String,
        path: PathBuf,
        at: DateTime<Utc>,
    },
    /// A component failed. Never fatal to the pipeline.
    Error {
        component: Component,
        message: String,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn session_state(state: SessionState, detail: Option<String>) -> Self {
        Self::SessionState {
            state,
            detail,
            at: Utc::now(),
        }
    }

    pub fn error(component: Component, message: impl Into<String>) -> Self {
        Self::Error {
            component,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Last error seen by the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub component: Component,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Polled view of the pipeline, maintained from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub session_state: SessionState,
    pub session_since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_detail: Option<String>,
    /// "Show S01E02" style description of the last fetched release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_episode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_episode_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            session_state: SessionState::Stopped,
            session_since: Utc::now(),
            session_detail: None,
            last_episode: None,
            last_episode_at: None,
            last_error: None,
        }
    }
}
