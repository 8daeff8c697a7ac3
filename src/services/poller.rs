//! Background poller that keeps the telemetry cache warm.
//!
//! Refreshes the cache on a fixed interval regardless of whether anyone is
//! reading, so views are served from memory.
//!
//! Architecture:
//! - One tokio task per cache instance; the first poll runs immediately
//! - Each cycle moves `Idle → Fetching → {Ready, Failed}`; a failed cycle
//!   keeps serving the previous snapshot
//! - A manual refresh (`Notify`) cuts the current sleep short
//! - A 429 with `Retry-After` stretches the next sleep to at least that long
//! - `PollerHandle::stop` signals the task over a watch channel, shuts the
//!   cache down and waits for the task to exit
//! - State is in-memory (`Arc<RwLock<PollerState>>`) and read by the status
//!   endpoint

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::errors::{FetchError, UpstreamError};
use crate::services::fetcher::{Fetcher, WeatherSource};

// ---------------------------------------------------------------------------
// Poller state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Where the current polling cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Ready,
    Failed,
}

/// Global poller state, exposed via the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PollerState {
    pub active: bool,
    pub phase: CyclePhase,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub last_poll_completed_at: Option<DateTime<Utc>>,
    pub last_poll_duration_ms: Option<u64>,
    pub total_polls: u64,
    pub consecutive_failures: u32,
    /// Message of the most recent failed poll, cleared on success
    pub last_error: Option<String>,
    /// Newest sol in the cache after the last successful poll
    pub latest_sol: Option<String>,
    /// Whether the last poll failed while an older snapshot is still served
    pub serving_stale: bool,
}

impl PollerState {
    pub fn new() -> Self {
        Self {
            active: true,
            phase: CyclePhase::Idle,
            next_wakeup_at: None,
            last_poll_completed_at: None,
            last_poll_duration_ms: None,
            total_polls: 0,
            consecutive_failures: 0,
            last_error: None,
            latest_sol: None,
            serving_stale: false,
        }
    }
}

/// Shared poller state handle.
pub type SharedPollerState = Arc<RwLock<PollerState>>;

/// What the HTTP layer needs from a running poller.
#[derive(Clone)]
pub struct PollerControl {
    pub state: SharedPollerState,
    refresh: Arc<Notify>,
}

impl PollerControl {
    /// Wake the poller now instead of at its next scheduled tick.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }
}

/// Owner of a running poller task.
pub struct PollerHandle<S> {
    control: PollerControl,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    fetcher: Arc<Fetcher<S>>,
}

impl<S: WeatherSource> PollerHandle<S> {
    pub fn control(&self) -> PollerControl {
        self.control.clone()
    }

    /// Stop polling and tear the cache down. Returns once the task has exited.
    pub async fn stop(self) {
        self.fetcher.shut_down();
        // The task may already be gone; nothing to signal then
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Poller task ended abnormally: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Main poller loop
// ---------------------------------------------------------------------------

/// Spawn the poller for `fetcher`, polling every `interval`.
pub fn start_poller<S: WeatherSource>(
    fetcher: Arc<Fetcher<S>>,
    interval: Duration,
) -> PollerHandle<S> {
    let state: SharedPollerState = Arc::new(RwLock::new(PollerState::new()));
    let refresh = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(run_poller(
        Arc::clone(&fetcher),
        interval,
        Arc::clone(&state),
        Arc::clone(&refresh),
        shutdown_rx,
    ));

    PollerHandle {
        control: PollerControl { state, refresh },
        shutdown: shutdown_tx,
        task,
        fetcher,
    }
}

async fn run_poller<S: WeatherSource>(
    fetcher: Arc<Fetcher<S>>,
    interval: Duration,
    state: SharedPollerState,
    refresh: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "Telemetry poller started (interval {} seconds)",
        interval.as_secs()
    );

    loop {
        let sleep_for = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            sleep_for = poll_once(&fetcher, &state, interval) => sleep_for,
        };

        {
            let mut s = state.write().await;
            s.next_wakeup_at = chrono::Duration::from_std(sleep_for)
                .ok()
                .map(|d| Utc::now() + d);
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = refresh.notified() => {
                tracing::info!("Poller: manual refresh requested");
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    let mut s = state.write().await;
    s.active = false;
    s.phase = CyclePhase::Idle;
    s.next_wakeup_at = None;
    tracing::info!("Telemetry poller stopped");
}

/// Run one cycle and return how long to sleep before the next one.
async fn poll_once<S: WeatherSource>(
    fetcher: &Fetcher<S>,
    state: &SharedPollerState,
    interval: Duration,
) -> Duration {
    state.write().await.phase = CyclePhase::Fetching;
    let started = Instant::now();

    let result = fetcher.refresh().await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let mut s = state.write().await;
    s.total_polls += 1;
    s.last_poll_completed_at = Some(Utc::now());
    s.last_poll_duration_ms = Some(elapsed_ms);

    match result {
        Ok(snapshot) => {
            s.phase = CyclePhase::Ready;
            s.consecutive_failures = 0;
            s.last_error = None;
            s.serving_stale = false;
            s.latest_sol = snapshot.latest().map(|r| r.sol.clone());
            tracing::info!(
                "Poller: cycle complete in {}ms, latest sol {:?}",
                elapsed_ms,
                s.latest_sol
            );
            interval
        }
        Err(err) => {
            s.phase = CyclePhase::Failed;
            s.consecutive_failures += 1;
            s.last_error = Some(err.to_string());
            s.serving_stale = err.stale_snapshot().is_some();
            tracing::warn!(
                "Poller: cycle failed ({} in a row): {}",
                s.consecutive_failures,
                err
            );
            next_sleep_after_failure(&err, interval)
        }
    }
}

/// Honour the provider's `Retry-After` when it asks for more than the interval.
fn next_sleep_after_failure(err: &FetchError, interval: Duration) -> Duration {
    let cause = match err {
        FetchError::Stale { cause, .. } | FetchError::Unavailable(cause) => cause,
        FetchError::ShutDown => return interval,
    };
    match cause {
        UpstreamError::RateLimited {
            retry_after_secs: Some(secs),
        } => {
            let retry_after = Duration::from_secs(*secs);
            if retry_after > interval {
                tracing::info!(
                    "Poller: rate limited, backing off {} seconds",
                    retry_after.as_secs()
                );
            }
            interval.max(retry_after)
        }
        _ => interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::insight::fixtures::sample_payload;
    use crate::services::test_support::ScriptedSource;

    const INTERVAL: Duration = Duration::from_secs(60);
    const TTL: Duration = Duration::from_secs(3600);

    fn fetcher_with(source: ScriptedSource) -> Arc<Fetcher<ScriptedSource>> {
        Arc::new(Fetcher::new(source, TTL, 10))
    }

    async fn snapshot_of(control: &PollerControl) -> PollerState {
        control.state.read().await.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_runs_immediately() {
        let fetcher = fetcher_with(ScriptedSource::ok(sample_payload()));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let s = snapshot_of(&handle.control()).await;
        assert!(s.active);
        assert_eq!(s.phase, CyclePhase::Ready);
        assert_eq!(s.total_polls, 1);
        assert_eq!(s.latest_sol.as_deref(), Some("677"));
        assert!(s.next_wakeup_at.is_some());
        assert!(fetcher.current().is_some());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let fetcher = fetcher_with(ScriptedSource::ok(sample_payload()));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);

        // Polls at t=0, 60 and 120
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(snapshot_of(&handle.control()).await.total_polls, 3);
        // Scheduled ticks bypass the cache TTL
        assert_eq!(fetcher.source().calls(), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_cuts_sleep_short() {
        let fetcher = fetcher_with(ScriptedSource::ok(sample_payload()));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let control = handle.control();
        control.request_refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(snapshot_of(&control).await.total_polls, 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_recorded() {
        let fetcher = fetcher_with(ScriptedSource::failing(UpstreamError::Status(500)));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);
        tokio::time::sleep(Duration::from_secs(61)).await;

        let s = snapshot_of(&handle.control()).await;
        assert_eq!(s.phase, CyclePhase::Failed);
        assert_eq!(s.consecutive_failures, 2);
        assert!(s.last_error.as_deref().unwrap().contains("500"));
        assert!(!s.serving_stale);
        assert!(s.latest_sol.is_none());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_success_serves_stale_then_recovers() {
        let source = ScriptedSource::ok(sample_payload())
            .then(Ok(sample_payload()))
            .then(Err(UpstreamError::Transport("timeout".to_string())));
        let fetcher = fetcher_with(source);
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let s = snapshot_of(&handle.control()).await;
        assert_eq!(s.phase, CyclePhase::Failed);
        assert!(s.serving_stale);
        assert_eq!(s.latest_sol.as_deref(), Some("677"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let s = snapshot_of(&handle.control()).await;
        assert_eq!(s.phase, CyclePhase::Ready);
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_error.is_none());
        assert!(!s.serving_stale);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_extends_sleep() {
        let fetcher = fetcher_with(ScriptedSource::failing(UpstreamError::RateLimited {
            retry_after_secs: Some(300),
        }));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(snapshot_of(&handle.control()).await.total_polls, 1);

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(snapshot_of(&handle.control()).await.total_polls, 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling_and_shuts_cache() {
        let fetcher = fetcher_with(ScriptedSource::ok(sample_payload()));
        let handle = start_poller(Arc::clone(&fetcher), INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let control = handle.control();
        handle.stop().await;

        let s = snapshot_of(&control).await;
        assert!(!s.active);
        assert_eq!(s.phase, CyclePhase::Idle);
        assert!(s.next_wakeup_at.is_none());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fetcher.source().calls(), 1);
        assert!(matches!(fetcher.fetch_latest().await, Err(FetchError::ShutDown)));
    }

    #[test]
    fn test_retry_after_shorter_than_interval_is_ignored() {
        let err = FetchError::Unavailable(UpstreamError::RateLimited {
            retry_after_secs: Some(5),
        });
        assert_eq!(next_sleep_after_failure(&err, INTERVAL), INTERVAL);
    }

    #[test]
    fn test_rate_limit_without_retry_after_uses_interval() {
        let err = FetchError::Unavailable(UpstreamError::RateLimited {
            retry_after_secs: None,
        });
        assert_eq!(next_sleep_after_failure(&err, INTERVAL), INTERVAL);
    }
}
