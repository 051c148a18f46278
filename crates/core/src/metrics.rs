//! Fetch outcome metrics.
//!
//! The fetch queue reports through the [`FetchMetrics`] trait; [`FetchStats`]
//! keeps the counters in memory for the admin surface and optionally mirrors
//! them into Prometheus collectors registered on a caller-supplied registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use serde::Serialize;

/// Sink for fetch outcomes.
pub trait FetchMetrics: Send + Sync {
    /// Count one completed fetch with the given HTTP status.
    fn increment_fetch_result(&self, status_code: u16);

    /// Record the time of the last successful (2xx) fetch.
    fn set_last_fetch_time(&self, at: DateTime<Utc>);
}

/// Point-in-time view of [`FetchStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    /// Completed fetches keyed by status code string ("200", "404", ...).
    pub results: BTreeMap<String, u64>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<DateTime<Utc>>,
}

struct PromFetchMetrics {
    results: IntCounterVec,
    last_fetch: IntGauge,
}

/// In-memory fetch result histogram.
#[derive(Default)]
pub struct FetchStats {
    summary: Mutex<FetchSummary>,
    prom: Option<PromFetchMetrics>,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also export the counters as `gumshoe_fetch_results_total{code}` and
    /// `gumshoe_last_fetch_timestamp_seconds` on `registry`.
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let results = IntCounterVec::new(
            Opts::new("gumshoe_fetch_results_total", "Completed fetches by HTTP status"),
            &["code"],
        )?;
        let last_fetch = IntGauge::new(
            "gumshoe_last_fetch_timestamp_seconds",
            "Unix time of the last successful fetch",
        )?;
        registry.register(Box::new(results.clone()))?;
        registry.register(Box::new(last_fetch.clone()))?;

        Ok(Self {
            summary: Mutex::new(FetchSummary::default()),
            prom: Some(PromFetchMetrics {
                results,
                last_fetch,
            }),
        })
    }

    pub fn snapshot(&self) -> FetchSummary {
        self.summary.lock().unwrap().clone()
    }
}

impl FetchMetrics for FetchStats {
    fn increment_fetch_result(&self, status_code: u16) {
        let code = status_code.to_string();
        if let Some(prom) = &self.prom {
            prom.results.with_label_values(&[code.as_str()]).inc();
        }
        let mut summary = self.summary.lock().unwrap();
        *summary.results.entry(code).or_insert(0) += 1;
        summary.total += 1;
    }

    fn set_last_fetch_time(&self, at: DateTime<Utc>) {
        if let Some(prom) = &self.prom {
            prom.last_fetch.set(at.timestamp());
        }
        self.summary.lock().unwrap().last_fetch = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_histogram_keyed_by_status() {
        let stats = FetchStats::new();
        stats.increment_fetch_result(200);
        stats.increment_fetch_result(200);
        stats.increment_fetch_result(404);

        let summary = stats.snapshot();
        assert_eq!(summary.results.get("200"), Some(&2));
        assert_eq!(summary.results.get("404"), Some(&1));
        assert_eq!(summary.total, 3);
        assert!(summary.last_fetch.is_none());
    }

    #[test]
    fn test_last_fetch_time() {
        let stats = FetchStats::new();
        let at = Utc::now();
        stats.set_last_fetch_time(at);
        assert_eq!(stats.snapshot().last_fetch, Some(at));
    }

    #[test]
    fn test_prometheus_export() {
        let registry = Registry::new();
        let stats = FetchStats::with_registry(&registry).unwrap();
        stats.increment_fetch_result(200);
        stats.set_last_fetch_time(Utc::now());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("gumshoe_fetch_results_total{code=\"200\"} 1"));
        assert!(text.contains("gumshoe_last_fetch_timestamp_seconds"));
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        FetchStats::with_registry(&registry).unwrap();
        assert!(FetchStats::with_registry(&registry).is_err());
    }
}
