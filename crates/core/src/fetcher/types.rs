use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::{CookieConfig, FetchConfig};

/// One download to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Candidate cookies; only those matching the URL's host and path are sent.
    pub cookies: Vec<CookieConfig>,
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedFile {
    pub url: String,
    pub path: PathBuf,
    pub status_code: u16,
    pub bytes: u64,
}

/// Worker pool settings, fixed for the lifetime of a queue.
#[derive(Debug, Clone)]
pub struct FetchQueueConfig {
    pub download_dir: PathBuf,
    pub workers: usize,
    /// Upper bound of the random pre-fetch delay. Zero disables it.
    pub download_rate: Duration,
    /// Per-host request budget. Zero disables throttling.
    pub requests_per_minute: u32,
    pub request_timeout: Duration,
}

impl From<&FetchConfig> for FetchQueueConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            download_dir: config.download_dir.clone(),
            workers: config.workers.max(1),
            download_rate: Duration::from_secs(config.download_rate_secs),
            requests_per_minute: config.requests_per_minute,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Errors for fetch operations. None of them stop the queue.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status_code}")]
    Status { url: String, status_code: u16 },

    #[error("Failed to write {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Fetch queue is closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}
