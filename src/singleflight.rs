//! Coalescing of concurrent identical requests.
//!
//! `run(key, f)` guarantees that for any set of concurrent callers sharing a
//! key, `f` executes at most once; every caller observes the same outcome.
//! The engine uses two key shapes: `cell:{row}:{field}` around whole cell
//! enrichments and `provider:{row}:{provider}` around individual provider
//! calls. If the executing caller is cancelled mid-flight, joiners observe
//! the cancellation and abort rather than waiting out the timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::SingleflightConfig;
use crate::error::{Error, Result};

type SharedOutcome<T> = std::result::Result<T, String>;

/// String-keyed request coalescer.
pub struct Singleflight<T: Clone + Send + 'static> {
    enabled: bool,
    timeout: Duration,
    inflight: Arc<Mutex<HashMap<String, broadcast::Sender<SharedOutcome<T>>>>>,
    coalesced: AtomicU64,
}

impl<T: Clone + Send + 'static> Singleflight<T> {
    pub fn new(config: &SingleflightConfig) -> Self {
        Self {
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Number of callers that joined an already in-flight call.
    pub fn coalesced_requests(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Execute `f`, coalescing with any in-flight call under the same key.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.enabled {
            return f().await;
        }

        let mut receiver = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|e| Error::Internal(format!("singleflight lock poisoned: {e}")))?;
            match inflight.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), sender);
                    None
                }
            }
        };

        if let Some(rx) = receiver.as_mut() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return match tokio::time::timeout(self.timeout, rx.recv()).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(message))) => Err(Error::Internal(message)),
                // Sender dropped without a result: the shared call was cancelled.
                Ok(Err(_)) => Err(Error::Cancelled(format!("shared call aborted: {key}"))),
                Err(_) => Err(Error::timeout(self.timeout.as_millis() as u64)),
            };
        }

        // Leader path. The guard removes the in-flight marker even if this
        // future is dropped mid-execution, which is what signals joiners.
        let guard = InflightGuard {
            inflight: Arc::clone(&self.inflight),
            key: key.to_string(),
        };

        let outcome = f().await;

        let shared: SharedOutcome<T> = match &outcome {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(e.to_string()),
        };
        if let Ok(mut inflight) = guard.inflight.lock() {
            if let Some(sender) = inflight.remove(&guard.key) {
                let _ = sender.send(shared);
            }
        }
        std::mem::forget(guard);

        outcome
    }
}

struct InflightGuard<T> {
    inflight: Arc<Mutex<HashMap<String, broadcast::Sender<SharedOutcome<T>>>>>,
    key: String,
}

impl<T> Drop for InflightGuard<T> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.key);
        }
    }
}
