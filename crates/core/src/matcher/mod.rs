//! Two-stage announcement matching.
//!
//! The announce pattern splits a channel line into a release title and a
//! download link; the episode pattern then pulls the show name and its
//! season/episode or air date out of that title. A third pattern finds the
//! quality token. Patterns are compiled once per configuration and never
//! mutated; a reconfiguration builds a new [`PatternSet`].

mod title;
mod types;

pub use title::canonicalize_title;
pub use types::{AnnounceMatch, EpisodeIdentity, EpisodeNumbering};

use regex_lite::Regex;
use thiserror::Error;

use crate::config::MatcherConfig;

/// Errors raised while compiling a [`PatternSet`].
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid {which} pattern: {source}")]
    Invalid {
        which: &'static str,
        #[source]
        source: regex_lite::Error,
    },

    #[error("{which} pattern must define the named group `{group}`")]
    MissingGroup {
        which: &'static str,
        group: &'static str,
    },
}

/// Compiled matching rules.
#[derive(Debug, Clone)]
pub struct PatternSet {
    announce: Regex,
    episode: Regex,
    quality: Regex,
}

impl PatternSet {
    /// Compile and check all three patterns. Nothing is returned unless every
    /// pattern is usable.
    pub fn new(config: &MatcherConfig) -> Result<Self, PatternError> {
        let announce = compile("announce", &config.announce_pattern)?;
        require_group(&announce, "announce", "title")?;
        require_group(&announce, "announce", "url")?;

        let episode = compile("episode", &config.episode_pattern)?;
        require_group(&episode, "episode", "show")?;
        let numbered = has_group(&episode, "season") && has_group(&episode, "episode");
        if !numbered && !has_group(&episode, "airdate") {
            return Err(PatternError::MissingGroup {
                which: "episode",
                group: "season/episode or airdate",
            });
        }

        let quality = compile("quality", &config.quality_pattern)?;

        Ok(Self {
            announce,
            episode,
            quality,
        })
    }

    /// Match a raw channel line against the announce pattern.
    ///
    /// Most lines on a busy channel are not announcements, so `None` is the
    /// usual answer.
    pub fn match_announce(&self, line: &str) -> Option<AnnounceMatch> {
        let caps = self.announce.captures(line)?;
        let title = caps.name("title")?.as_str().trim();
        let url = caps.name("url")?.as_str().trim();
        if title.is_empty() || url.is_empty() {
            return None;
        }
        Some(AnnounceMatch {
            raw_line: line.to_string(),
            title: title.to_string(),
            url: url.to_string(),
        })
    }

    /// Extract the show name and episode numbering from a release title.
    pub fn match_episode(&self, title: &str) -> Option<EpisodeIdentity> {
        let caps = self.episode.captures(title)?;
        let show_title = caps.name("show")?.as_str().trim_matches(separator);
        if show_title.is_empty() {
            return None;
        }

        let season = caps.name("season").and_then(|m| m.as_str().parse().ok());
        let episode = caps.name("episode").and_then(|m| m.as_str().parse().ok());
        let numbering = match (season, episode) {
            (Some(season), Some(episode)) => EpisodeNumbering::Numbered { season, episode },
            _ => {
                let air_date = caps.name("airdate")?.as_str();
                EpisodeNumbering::Dated {
                    air_date: normalize_air_date(air_date),
                }
            }
        };

        Some(EpisodeIdentity {
            show_title: show_title.to_string(),
            numbering,
            quality: self.classify_quality(title),
        })
    }

    /// Find the quality token in `text`, lowercased. Empty when absent.
    pub fn classify_quality(&self, text: &str) -> String {
        self.quality
            .find(text)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Whether a normalised quality token denotes a high-definition release
/// (vertical resolution of 720 lines or more).
pub fn is_high_definition(token: &str) -> bool {
    let digits: String = token.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<u32>().map(|lines| lines >= 720).unwrap_or(false)
}

fn compile(which: &'static str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError::Invalid { which, source })
}

fn has_group(re: &Regex, group: &str) -> bool {
    re.capture_names().flatten().any(|name| name == group)
}

fn require_group(re: &Regex, which: &'static str, group: &'static str) -> Result<(), PatternError> {
    if has_group(re, group) {
        Ok(())
    } else {
        Err(PatternError::MissingGroup { which, group })
    }
}

fn separator(c: char) -> bool {
    matches!(c, '.' | '_' | '-' | ' ')
}

fn normalize_air_date(raw: &str) -> String {
    raw.replace(['-', '/', ' '], ".")
}
