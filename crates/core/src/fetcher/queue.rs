//! Bounded download pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::http::{download, parse_target};
use super::throttle::HostThrottle;
use super::{FetchError, FetchQueueConfig, FetchRequest, FetchedFile};
use crate::metrics::FetchMetrics;

/// Pool counters.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
}

/// Snapshot of the pool for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct FetchPoolStatus {
    pub active: u64,
    pub queued: u64,
    pub workers: usize,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// Awaitable result of one enqueued fetch.
#[derive(Debug)]
pub struct FetchHandle {
    inner: JoinHandle<Result<FetchedFile, FetchError>>,
}

impl FetchHandle {
    /// Wait for the fetch to finish.
    pub async fn wait(self) -> Result<FetchedFile, FetchError> {
        self.inner
            .await
            .map_err(|e| FetchError::Internal(format!("fetch task failed: {}", e)))?
    }
}

/// Counts a spawned fetch until it finishes and wakes [`FetchQueue::drain`]
/// when the last one does.
struct InFlight {
    count: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Worker pool that downloads accepted releases.
///
/// `enqueue` never waits: each request becomes a task that queues on a fair
/// semaphore, so saturated pools serve waiters in FIFO order. Every task
/// sleeps a random courtesy delay and passes the per-host throttle before
/// its request goes out.
pub struct FetchQueue {
    client: Client,
    config: Arc<FetchQueueConfig>,
    permits: Arc<Semaphore>,
    throttle: Arc<HostThrottle>,
    metrics: Arc<dyn FetchMetrics>,
    stats: Arc<PoolStats>,
    in_flight: Arc<AtomicU64>,
    idle: Arc<Notify>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FetchQueue {
    pub fn new(config: FetchQueueConfig, metrics: Arc<dyn FetchMetrics>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.workers)),
            throttle: Arc::new(HostThrottle::new(config.requests_per_minute)),
            config: Arc::new(config),
            metrics,
            stats: Arc::new(PoolStats::default()),
            in_flight: Arc::new(AtomicU64::new(0)),
            idle: Arc::new(Notify::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Accept a download. Returns immediately; the handle resolves when the
    /// file is on disk or the fetch failed.
    ///
    /// Only an unusable URL or a closed queue is reported here.
    pub fn enqueue(&self, request: FetchRequest) -> Result<FetchHandle, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::Closed);
        }
        let (url, name) = parse_target(&request.url)?;
        let fetch_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = InFlight {
            count: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        self.stats.queued.fetch_add(1, Ordering::Relaxed);

        let client = self.client.clone();
        let config = self.config.clone();
        let permits = self.permits.clone();
        let throttle = self.throttle.clone();
        let metrics = self.metrics.clone();
        let stats = self.stats.clone();

        debug!(url = %url, "Fetch enqueued");

        let inner = tokio::spawn(async move {
            let _in_flight = in_flight;

            let permit = permits.acquire_owned().await;
            stats.queued.fetch_sub(1, Ordering::Relaxed);
            let _permit = permit.map_err(|_| FetchError::Closed)?;
            stats.active.fetch_add(1, Ordering::Relaxed);

            let delay = courtesy_delay(config.download_rate);
            if !delay.is_zero() {
                debug!(url = %url, delay_ms = delay.as_millis() as u64, "Courtesy delay");
                tokio::time::sleep(delay).await;
            }
            throttle.acquire(url.host_str().unwrap_or_default()).await;

            let result = download(
                &client,
                &url,
                &name,
                fetch_id,
                &request.cookies,
                &config.download_dir,
            )
            .await;
            stats.active.fetch_sub(1, Ordering::Relaxed);

            match &result {
                Ok(file) => {
                    metrics.increment_fetch_result(file.status_code);
                    metrics.set_last_fetch_time(Utc::now());
                    stats.total_completed.fetch_add(1, Ordering::Relaxed);
                    info!(url = %file.url, path = %file.path.display(), bytes = file.bytes, "Fetched");
                }
                Err(e) => {
                    if let FetchError::Status { status_code, .. } = e {
                        metrics.increment_fetch_result(*status_code);
                    }
                    stats.total_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %url, error = %e, "Fetch failed");
                }
            }
            result
        });

        Ok(FetchHandle { inner })
    }

    /// Stop accepting new fetches. Already enqueued ones still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Wait until every enqueued fetch has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn status(&self) -> FetchPoolStatus {
        FetchPoolStatus {
            active: self.stats.active.load(Ordering::Relaxed),
            queued: self.stats.queued.load(Ordering::Relaxed),
            workers: self.config.workers,
            total_completed: self.stats.total_completed.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// Uniform random delay in `[0, max)`.
fn courtesy_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
