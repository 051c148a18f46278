use super::{types::Config, ConfigError};
use crate::matcher::PatternSet;

/// Validate configuration
/// Currently validates:
/// - IRC section exists (enforced by serde)
/// - Ports are not 0
/// - IRC identity and channel are usable
/// - Invite settings are complete
/// - All three matcher patterns compile and expose their named groups
/// - Fetch pool has at least one worker
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let irc = &config.irc;
    if irc.server.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "irc.server cannot be empty".to_string(),
        ));
    }
    if irc.port == 0 {
        return Err(ConfigError::ValidationError(
            "irc.port cannot be 0".to_string(),
        ));
    }
    if irc.nickname.is_empty() || irc.nickname.contains(char::is_whitespace) {
        return Err(ConfigError::ValidationError(
            "irc.nickname must be a single non-empty word".to_string(),
        ));
    }
    if !irc.watch_channel.starts_with(['#', '&']) {
        return Err(ConfigError::ValidationError(format!(
            "irc.watch_channel must start with '#' or '&', got '{}'",
            irc.watch_channel
        )));
    }
    if !irc.key.is_empty() && !irc.registered && irc.email.is_empty() {
        return Err(ConfigError::ValidationError(
            "irc.email is required to register an unregistered nickname".to_string(),
        ));
    }
    if irc.invite_template.is_some() && irc.channel_owner.as_deref().unwrap_or("").is_empty() {
        return Err(ConfigError::ValidationError(
            "irc.channel_owner is required when irc.invite_template is set".to_string(),
        ));
    }
    if irc.auth_timeout_secs == 0 || irc.connect_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "irc timeouts cannot be 0".to_string(),
        ));
    }

    PatternSet::new(&config.matcher).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    if config.fetch.workers == 0 {
        return Err(ConfigError::ValidationError(
            "fetch.workers must be at least 1".to_string(),
        ));
    }
    if config.fetch.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "fetch.request_timeout_secs cannot be 0".to_string(),
        ));
    }

    Ok(())
}
