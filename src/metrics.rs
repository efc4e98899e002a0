//! Engine-wide counters.
//!
//! Cheap atomic counters that tests and operators read to observe engine
//! behavior: how many provider calls actually went out, how often the cache
//! and singleflight absorbed work, and how rows ended up.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::MetricsConfig;

/// Live counters. Shared process-wide via the engine context.
pub struct EngineMetrics {
    config: MetricsConfig,
    pub provider_calls: AtomicU64,
    pub provider_errors: AtomicU64,
    pub rows_processed: AtomicU64,
    pub rows_failed: AtomicU64,
    pub fields_accepted: AtomicU64,
    pub fields_escalated: AtomicU64,
    pub fields_missing: AtomicU64,
    row_durations_ms: Mutex<VecDeque<u64>>,
}

impl EngineMetrics {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            provider_calls: AtomicU64::new(0),
            provider_errors: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            fields_accepted: AtomicU64::new(0),
            fields_escalated: AtomicU64::new(0),
            fields_missing: AtomicU64::new(0),
            row_durations_ms: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record one outbound provider invocation.
    pub fn record_provider_call(&self) {
        if !self.config.enabled {
            return;
        }
        let count = self.provider_calls.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = self.config.log_interval_requests;
        if interval > 0 && count % interval == 0 {
            tracing::info!(provider_calls = count, "enrichment request volume");
        }
    }

    pub fn record_provider_error(&self) {
        if self.config.enabled {
            self.provider_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_row(&self, duration_ms: u64, failed: bool) {
        if !self.config.enabled {
            return;
        }
        self.rows_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.rows_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut samples) = self.row_durations_ms.lock() {
            samples.push_back(duration_ms);
            while samples.len() > self.config.max_latency_samples {
                samples.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let p50_row_duration_ms = self
            .row_durations_ms
            .lock()
            .map(|samples| {
                let mut sorted: Vec<u64> = samples.iter().copied().collect();
                sorted.sort_unstable();
                if sorted.is_empty() {
                    0
                } else {
                    sorted[sorted.len() / 2]
                }
            })
            .unwrap_or(0);

        MetricsSnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            fields_accepted: self.fields_accepted.load(Ordering::Relaxed),
            fields_escalated: self.fields_escalated.load(Ordering::Relaxed),
            fields_missing: self.fields_missing.load(Ordering::Relaxed),
            p50_row_duration_ms,
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub provider_calls: u64,
    pub provider_errors: u64,
    pub rows_processed: u64,
    pub rows_failed: u64,
    pub fields_accepted: u64,
    pub fields_escalated: u64,
    pub fields_missing: u64,
    pub p50_row_duration_ms: u64,
}
