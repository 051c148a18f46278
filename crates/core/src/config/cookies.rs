//! JSON cookie jars as exported by browser extensions:
//! `{"cookies": [{"Name": "uid", "Value": "1", "Domain": ".tracker", "Path": "/", "Expires": "1700000000"}]}`

use serde::Deserialize;
use std::path::Path;

use super::{types::CookieConfig, ConfigError};

#[derive(Debug, Deserialize)]
struct CookieJar {
    #[serde(default)]
    cookies: Vec<JarCookie>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JarCookie {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: String,
    /// Unix seconds, as a string. Missing or unparseable means session cookie.
    #[serde(default)]
    expires: Option<String>,
}

impl JarCookie {
    fn expired(&self, now: i64) -> bool {
        match self.expires.as_deref().map(str::parse::<i64>) {
            Some(Ok(ts)) if ts > 0 => ts <= now,
            _ => false,
        }
    }
}

/// Parse a JSON cookie jar. Expired cookies are dropped.
pub fn parse_cookie_jar(json: &str) -> Result<Vec<CookieConfig>, ConfigError> {
    let jar: CookieJar = serde_json::from_str(json)
        .map_err(|e| ConfigError::ParseError(format!("cookie jar: {}", e)))?;

    let now = chrono::Utc::now().timestamp();
    Ok(jar
        .cookies
        .into_iter()
        .filter(|c| !c.expired(now))
        .map(|c| CookieConfig {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
        })
        .collect())
}

/// Read and parse a JSON cookie jar from disk.
pub fn load_cookie_file(path: &Path) -> Result<Vec<CookieConfig>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.display().to_string()),
        _ => ConfigError::ParseError(format!("cookie jar {}: {}", path.display(), e)),
    })?;
    parse_cookie_jar(&contents)
}
