//! Transient values produced by matching an announcement line.

use serde::{Deserialize, Serialize};

/// First-stage match: an announcement line split into title and link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMatch {
    pub raw_line: String,
    pub title: String,
    pub url: String,
}

/// How a release identifies its episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpisodeNumbering {
    /// `S01E02` style.
    Numbered { season: u32, episode: u32 },
    /// Daily release, air date normalised to `YYYY.MM.DD`.
    Dated { air_date: String },
}

/// Second-stage match: structured identity extracted from a release title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeIdentity {
    /// Show name as it appeared in the title (not canonicalised).
    pub show_title: String,
    pub numbering: EpisodeNumbering,
    /// Normalised quality token, empty when none was found.
    pub quality: String,
}

impl EpisodeIdentity {
    pub fn season(&self) -> Option<u32> {
        match self.numbering {
            EpisodeNumbering::Numbered { season, .. } => Some(season),
            EpisodeNumbering::Dated { .. } => None,
        }
    }

    pub fn episode(&self) -> Option<u32> {
        match self.numbering {
            EpisodeNumbering::Numbered { episode, .. } => Some(episode),
            EpisodeNumbering::Dated { .. } => None,
        }
    }

    pub fn air_date(&self) -> Option<&str> {
        match &self.numbering {
            EpisodeNumbering::Dated { air_date } => Some(air_date),
            EpisodeNumbering::Numbered { .. } => None,
        }
    }

    /// Human-readable label, e.g. "S01E02" or "2015.03.26".
    pub fn label(&self) -> String {
        match &self.numbering {
            EpisodeNumbering::Numbered { season, episode } => {
                format!("S{:02}E{:02}", season, episode)
            }
            EpisodeNumbering::Dated { air_date } => air_date.clone(),
        }
    }
}
