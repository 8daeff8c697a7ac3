//! In-memory `WeatherSource` for fetcher and poller tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::errors::UpstreamError;
use crate::services::fetcher::WeatherSource;

type Response = Result<serde_json::Value, UpstreamError>;

/// Replays queued responses, then repeats a fallback forever.
///
/// When gated, each call waits for a semaphore permit before answering, which
/// lets a test hold a fetch "in flight".
pub(crate) struct ScriptedSource {
    calls: AtomicUsize,
    queued: Mutex<VecDeque<Response>>,
    fallback: Response,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    pub(crate) fn ok(payload: serde_json::Value) -> Self {
        Self::with_fallback(Ok(payload))
    }

    pub(crate) fn failing(err: UpstreamError) -> Self {
        Self::with_fallback(Err(err))
    }

    fn with_fallback(fallback: Response) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            queued: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
        }
    }

    /// Queue a response served before the fallback.
    pub(crate) fn then(self, response: Response) -> Self {
        self.queued.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WeatherSource for ScriptedSource {
    fn fetch_payload(&self) -> impl Future<Output = Response> + Send {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            let next = self.queued.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }
}
