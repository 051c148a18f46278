use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use super::cookies::load_cookie_file;
use super::ConfigError;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub irc: IrcConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Build the immutable snapshot handed to the pipeline components.
    ///
    /// Reads the cookie file when one is configured, so a missing or malformed
    /// jar is reported here rather than on the first fetch.
    pub fn pipeline(&self) -> Result<PipelineConfig, ConfigError> {
        let mut cookies = self.fetch.cookies.clone();
        if let Some(path) = &self.fetch.cookie_file {
            cookies.extend(load_cookie_file(path)?);
        }
        Ok(PipelineConfig {
            irc: self.irc.clone(),
            matcher: self.matcher.clone(),
            cookies,
        })
    }
}

/// Admin HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    9119
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gumshoe.db")
}

/// Connection to the announcement channel.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IrcConfig {
    /// IRC server hostname.
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub nickname: String,
    /// NickServ password. Empty skips nickname authentication.
    #[serde(default)]
    pub key: String,
    /// Whether the nickname is already registered with NickServ.
    #[serde(default)]
    pub registered: bool,
    /// Email sent along with a NickServ registration request.
    #[serde(default)]
    pub email: String,
    /// Message sent to the channel owner to request an invite.
    /// `%n%` expands to the nickname and `%k%` to the key.
    #[serde(default)]
    pub invite_template: Option<String>,
    /// Recipient of the invite request (usually the tracker's bot).
    #[serde(default)]
    pub channel_owner: Option<String>,
    /// Channel carrying the announcements, e.g. "#announce".
    pub watch_channel: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on nickname registration/identification and invite waits.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// Delay before the supervisor restarts a failed session.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Start the session together with the service.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_irc_port() -> u16 {
    6667
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_auth_timeout() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Patterns used to pick releases out of announcement lines.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Must expose `title` and `url` named groups.
    #[serde(default = "default_announce_pattern")]
    pub announce_pattern: String,
    /// Must expose `show` plus `season`/`episode` and/or `airdate` named groups.
    #[serde(default = "default_episode_pattern")]
    pub episode_pattern: String,
    #[serde(default = "default_quality_pattern")]
    pub quality_pattern: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            announce_pattern: default_announce_pattern(),
            episode_pattern: default_episode_pattern(),
            quality_pattern: default_quality_pattern(),
        }
    }
}

fn default_announce_pattern() -> String {
    r"BitMeTV-IRC2RSS: (?P<title>.*?) : (?P<url>\S+)".to_string()
}

fn default_episode_pattern() -> String {
    r"(?i)^(?P<show>.+?)[. _]+(?:s(?P<season>\d{1,2})e(?P<episode>\d{1,3})|(?P<airdate>\d{4}[.-]\d{2}[.-]\d{2}))(?:[. _-]|$)"
        .to_string()
}

fn default_quality_pattern() -> String {
    r"(?i)\b(?:720|1080|2160)[pi]\b".to_string()
}

/// A cookie sent with every fetch to a matching domain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CookieConfig {
    pub name: String,
    pub value: String,
    /// Empty matches every host.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

/// Download queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Maximum concurrent fetches.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound (seconds) of the random delay before each fetch. 0 disables it.
    #[serde(default = "default_download_rate")]
    pub download_rate_secs: u64,
    /// Per tracker host. 0 = unlimited.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cookies: Vec<CookieConfig>,
    /// JSON cookie jar exported from a browser session.
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            workers: default_workers(),
            download_rate_secs: default_download_rate(),
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout(),
            cookies: Vec::new(),
            cookie_file: None,
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_workers() -> usize {
    10
}

fn default_download_rate() -> u64 {
    5
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

/// Immutable configuration snapshot shared by the session, the matcher and
/// the fetch path. Replaced wholesale on reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub irc: IrcConfig,
    pub matcher: MatcherConfig,
    pub cookies: Vec<CookieConfig>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub irc: SanitizedIrcConfig,
    pub matcher: MatcherConfig,
    pub fetch: SanitizedFetchConfig,
}

/// IRC config with the NickServ key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedIrcConfig {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub key_configured: bool,
    pub registered: bool,
    pub invite_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_owner: Option<String>,
    pub watch_channel: String,
    pub auth_timeout_secs: u64,
    pub enabled: bool,
}

/// Fetch config with cookie values hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedFetchConfig {
    pub download_dir: PathBuf,
    pub workers: usize,
    pub download_rate_secs: u64,
    pub requests_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cookies_configured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_file: Option<PathBuf>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            irc: SanitizedIrcConfig {
                server: config.irc.server.clone(),
                port: config.irc.port,
                nickname: config.irc.nickname.clone(),
                key_configured: !config.irc.key.is_empty(),
                registered: config.irc.registered,
                invite_configured: config.irc.invite_template.is_some(),
                channel_owner: config.irc.channel_owner.clone(),
                watch_channel: config.irc.watch_channel.clone(),
                auth_timeout_secs: config.irc.auth_timeout_secs,
                enabled: config.irc.enabled,
            },
            matcher: config.matcher.clone(),
            fetch: SanitizedFetchConfig {
                download_dir: config.fetch.download_dir.clone(),
                workers: config.fetch.workers,
                download_rate_secs: config.fetch.download_rate_secs,
                requests_per_minute: config.fetch.requests_per_minute,
                request_timeout_secs: config.fetch.request_timeout_secs,
                cookies_configured: config.fetch.cookies.len(),
                cookie_file: config.fetch.cookie_file.clone(),
            },
        }
    }
}
