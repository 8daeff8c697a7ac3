//! TTL-bounded, request-coalescing cache over the InSight feed.
//!
//! Architecture:
//! - One live `CacheEntry` per fetcher, holding the snapshot and the history
//!   window folded from it. Replacing the `Arc` is the only mutation, so
//!   readers always see a complete `(snapshot, history)` pair.
//! - At most one upstream request is in flight. It is stored as a
//!   `Shared` future; every caller that arrives meanwhile awaits the same
//!   result instead of issuing its own request.
//! - The fetch runs on its own task, so it completes and installs even when
//!   every caller waiting on it has gone away.
//! - Failures never clear the cache: with a prior entry, callers get it back
//!   inside `FetchError::Stale`.
//! - After a 429 with `Retry-After`, upstream is left alone until that time
//!   and callers are answered from the cache.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::errors::{FetchError, UpstreamError};
use crate::models::WeatherSnapshot;
use crate::services::history::HistoryWindow;
use crate::services::insight::parse_payload;
use crate::services::normalizer::normalize;

/// Anything that can produce a raw InSight payload.
pub trait WeatherSource: Send + Sync + 'static {
    fn fetch_payload(
        &self,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;
}

/// One successful fetch, immutable once installed.
#[derive(Debug)]
pub struct CacheEntry {
    pub snapshot: Arc<WeatherSnapshot>,
    /// Rolling history including this snapshot's sols.
    pub history: Arc<HistoryWindow>,
    pub fetched_at: Instant,
    /// Wall-clock time of the fetch, for reporting.
    pub fetched_at_utc: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Why a shared fetch produced no entry.
#[derive(Debug, Clone)]
enum FetchFailure {
    Upstream(UpstreamError),
    TornDown,
}

type InFlight = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, FetchFailure>>>;

struct FetcherInner {
    entry: Option<Arc<CacheEntry>>,
    in_flight: Option<InFlight>,
    /// Set from the provider's `Retry-After`; no upstream call before this.
    retry_not_before: Option<Instant>,
    torn_down: bool,
}

impl FetcherInner {
    /// The rate-limit error to answer with instead of calling upstream.
    fn backing_off(&self, now: Instant) -> Option<UpstreamError> {
        let until = self.retry_not_before.filter(|until| now < *until)?;
        let remaining = until.saturating_duration_since(now);
        Some(UpstreamError::RateLimited {
            retry_after_secs: Some(remaining.as_secs_f64().ceil() as u64),
        })
    }
}

pub struct Fetcher<S> {
    source: Arc<S>,
    ttl: Duration,
    history_depth: usize,
    inner: Arc<Mutex<FetcherInner>>,
}

impl<S: WeatherSource> Fetcher<S> {
    pub fn new(source: S, ttl: Duration, history_depth: usize) -> Self {
        Self {
            source: Arc::new(source),
            ttl,
            history_depth,
            inner: Arc::new(Mutex::new(FetcherInner {
                entry: None,
                in_flight: None,
                retry_not_before: None,
                torn_down: false,
            })),
        }
    }

    /// Latest snapshot, hitting upstream only when the cached one has expired.
    pub async fn fetch_latest(&self) -> Result<Arc<WeatherSnapshot>, FetchError> {
        let pending = {
            let mut inner = lock(&self.inner);
            if inner.torn_down {
                return Err(FetchError::ShutDown);
            }
            let now = Instant::now();
            if let Some(entry) = inner.entry.as_ref().filter(|e| e.is_fresh(now)) {
                tracing::debug!("Telemetry cache hit (fetched at {})", entry.fetched_at_utc);
                return Ok(Arc::clone(&entry.snapshot));
            }
            if let Some(cause) = inner.backing_off(now) {
                return Err(served_from_cache(&inner, cause));
            }
            self.attach_or_start(&mut inner)
        };

        self.settle(pending.await)
    }

    /// Fetch regardless of TTL. Joins a fetch already in flight.
    pub async fn refresh(&self) -> Result<Arc<WeatherSnapshot>, FetchError> {
        let pending = {
            let mut inner = lock(&self.inner);
            if inner.torn_down {
                return Err(FetchError::ShutDown);
            }
            if let Some(cause) = inner.backing_off(Instant::now()) {
                return Err(served_from_cache(&inner, cause));
            }
            self.attach_or_start(&mut inner)
        };

        self.settle(pending.await)
    }

    /// The live entry, or `None` before the first successful fetch.
    pub fn current(&self) -> Option<Arc<CacheEntry>> {
        lock(&self.inner).entry.clone()
    }

    /// Stop installing fetch results. Pending and future callers get
    /// `FetchError::ShutDown`.
    pub fn shut_down(&self) {
        let mut inner = lock(&self.inner);
        if !inner.torn_down {
            inner.torn_down = true;
            inner.in_flight = None;
            tracing::info!("Telemetry cache shut down");
        }
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    fn attach_or_start(&self, inner: &mut FetcherInner) -> InFlight {
        if let Some(pending) = &inner.in_flight {
            tracing::debug!("Joining in-flight InSight fetch");
            return pending.clone();
        }

        tracing::debug!("Starting InSight fetch");
        let source = Arc::clone(&self.source);
        let shared_inner = Arc::clone(&self.inner);
        let ttl = self.ttl;
        let history_depth = self.history_depth;

        let task = tokio::spawn({
            let shared_inner = Arc::clone(&shared_inner);
            async move {
                let outcome = load_snapshot(source.as_ref()).await;
                install(&shared_inner, outcome, ttl, history_depth)
            }
        });
        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("InSight fetch task failed: {}", e);
                    lock(&shared_inner).in_flight = None;
                    Err(FetchFailure::Upstream(UpstreamError::Transport(format!(
                        "fetch task failed: {}",
                        e
                    ))))
                }
            }
        }
        .boxed()
        .shared();

        inner.in_flight = Some(pending.clone());
        pending
    }

    fn settle(
        &self,
        result: Result<Arc<CacheEntry>, FetchFailure>,
    ) -> Result<Arc<WeatherSnapshot>, FetchError> {
        match result {
            Ok(entry) => Ok(Arc::clone(&entry.snapshot)),
            Err(FetchFailure::TornDown) => Err(FetchError::ShutDown),
            Err(FetchFailure::Upstream(cause)) => Err(served_from_cache(&lock(&self.inner), cause)),
        }
    }
}

/// Wrap an upstream failure with whatever the cache still holds.
fn served_from_cache(inner: &FetcherInner, cause: UpstreamError) -> FetchError {
    match &inner.entry {
        Some(entry) => FetchError::Stale {
            snapshot: Arc::clone(&entry.snapshot),
            cause,
        },
        None => FetchError::Unavailable(cause),
    }
}

/// Fetch, parse and normalize one payload. The only suspending step is the
/// upstream call.
async fn load_snapshot<S: WeatherSource>(source: &S) -> Result<WeatherSnapshot, UpstreamError> {
    let payload = source.fetch_payload().await?;
    let raw_records = parse_payload(&payload)?;
    Ok(WeatherSnapshot::from_records(raw_records.iter().map(normalize)))
}

/// Publish the outcome of a fetch. Runs once per shared fetch.
fn install(
    inner: &Mutex<FetcherInner>,
    outcome: Result<WeatherSnapshot, UpstreamError>,
    ttl: Duration,
    history_depth: usize,
) -> Result<Arc<CacheEntry>, FetchFailure> {
    let mut inner = lock(inner);
    inner.in_flight = None;

    if inner.torn_down {
        tracing::debug!("Discarding InSight fetch result after shutdown");
        return Err(FetchFailure::TornDown);
    }

    let snapshot = match outcome {
        Ok(snapshot) => snapshot,
        Err(cause) => {
            if let UpstreamError::RateLimited {
                retry_after_secs: Some(secs),
            } = &cause
            {
                inner.retry_not_before = Some(Instant::now() + Duration::from_secs(*secs));
            }
            if let Some(entry) = &inner.entry {
                tracing::warn!(
                    "InSight fetch failed, keeping snapshot from {}: {}",
                    entry.fetched_at_utc,
                    cause
                );
            } else {
                tracing::warn!("InSight fetch failed with nothing cached: {}", cause);
            }
            return Err(FetchFailure::Upstream(cause));
        }
    };

    let mut history = match &inner.entry {
        Some(entry) => HistoryWindow::clone(&entry.history),
        None => HistoryWindow::new(history_depth),
    };
    for record in snapshot.iter() {
        history.append(record.clone());
    }

    let entry = Arc::new(CacheEntry {
        snapshot: Arc::new(snapshot),
        history: Arc::new(history),
        fetched_at: Instant::now(),
        fetched_at_utc: Utc::now(),
        ttl,
    });
    tracing::info!(
        "Telemetry cache updated: sols {:?}, {} retained",
        entry.snapshot.sol_keys(),
        entry.history.len()
    );
    inner.entry = Some(Arc::clone(&entry));
    inner.retry_not_before = None;
    Ok(entry)
}

fn lock(inner: &Mutex<FetcherInner>) -> MutexGuard<'_, FetcherInner> {
    // Critical sections never panic mid-update, so a poisoned lock is still
    // consistent
    inner.lock().unwrap_or_else(|e| e.into_inner())
}
