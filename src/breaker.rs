//! Per-provider circuit breaking with health metrics.
//!
//! A breaker is closed (normal), open (all calls rejected), or half-open
//! (exactly one probe allowed at a time). Failures are HTTP 5xx, timeouts,
//! and transport errors; a provider answering "not found" for a valid query
//! and budget rejections are not failures. The retained metrics (error
//! rate, p50 latency) feed health-sorted provider selection.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitStatus,
    /// (when, was_success) events inside the rolling window.
    window: VecDeque<(Instant, bool)>,
    consecutive_probe_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    total_failures: u64,
    total_successes: u64,
    latencies_ms: VecDeque<u64>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            window: VecDeque::new(),
            consecutive_probe_successes: 0,
            opened_at: None,
            probe_in_flight: false,
            total_failures: 0,
            total_successes: 0,
            latencies_ms: VecDeque::new(),
        }
    }
}

/// Health snapshot for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub status: CircuitStatus,
    pub error_rate: f64,
    pub p50_latency_ms: u64,
    pub failure_count: u64,
    pub success_count: u64,
}

impl BreakerMetrics {
    /// Composite health score in [0,1]; higher is healthier.
    pub fn score(&self) -> f64 {
        let latency_factor = 1.0 / (1.0 + self.p50_latency_ms as f64 / 1000.0);
        (1.0 - self.error_rate) * 0.8 + latency_factor * 0.2
    }
}

/// Circuit breaker for a single provider.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    /// Latency samples retained for the p50 estimate.
    max_latency_samples: usize,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            max_latency_samples: 256,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.state
            .lock()
            .map(|s| s.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    /// Whether a call may proceed right now.
    ///
    /// Open breakers reject until the reset timeout, then move to half-open.
    /// Half-open breakers admit one probe at a time; the answer reserves the
    /// probe slot until `record_success`/`record_failure` releases it.
    pub fn is_available(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let rested = state
                    .opened_at
                    .map(|at| at.elapsed() >= Duration::from_millis(self.config.reset_timeout_ms))
                    .unwrap_or(true);
                if rested {
                    tracing::debug!(provider = %self.name, "breaker half-open, admitting probe");
                    state.status = CircuitStatus::HalfOpen;
                    state.consecutive_probe_successes = 0;
                    state.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, latency_ms: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.total_successes += 1;
        push_capped(&mut state.latencies_ms, latency_ms, self.max_latency_samples);

        match state.status {
            CircuitStatus::HalfOpen => {
                state.probe_in_flight = false;
                state.consecutive_probe_successes += 1;
                if state.consecutive_probe_successes >= self.config.success_threshold {
                    tracing::info!(provider = %self.name, "breaker closed");
                    state.status = CircuitStatus::Closed;
                    state.window.clear();
                    state.opened_at = None;
                }
            }
            _ => {
                let now = Instant::now();
                state.window.push_back((now, true));
                self.prune_window(&mut state, now);
            }
        }
    }

    pub fn record_failure(&self, latency_ms: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.total_failures += 1;
        push_capped(&mut state.latencies_ms, latency_ms, self.max_latency_samples);

        match state.status {
            CircuitStatus::HalfOpen => {
                tracing::warn!(provider = %self.name, "probe failed, breaker re-opened");
                state.status = CircuitStatus::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
                state.consecutive_probe_successes = 0;
            }
            CircuitStatus::Closed => {
                let now = Instant::now();
                state.window.push_back((now, false));
                self.prune_window(&mut state, now);

                let total = state.window.len() as u32;
                let failures = state.window.iter().filter(|(_, ok)| !ok).count() as u32;
                if total >= self.config.minimum_requests && failures >= self.config.failure_threshold
                {
                    tracing::warn!(provider = %self.name, failures, "breaker opened");
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitStatus::Open => {}
        }
    }

    fn prune_window(&self, state: &mut BreakerState, now: Instant) {
        let window = Duration::from_millis(self.config.window_ms);
        while state
            .window
            .front()
            .map(|(at, _)| now.duration_since(*at) > window)
            .unwrap_or(false)
        {
            state.window.pop_front();
        }
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let Ok(state) = self.state.lock() else {
            return BreakerMetrics {
                status: CircuitStatus::Closed,
                error_rate: 0.0,
                p50_latency_ms: 0,
                failure_count: 0,
                success_count: 0,
            };
        };
        let total = state.total_failures + state.total_successes;
        let error_rate = if total == 0 {
            0.0
        } else {
            state.total_failures as f64 / total as f64
        };
        let mut sorted: Vec<u64> = state.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        let p50 = if sorted.is_empty() {
            0
        } else {
            sorted[sorted.len() / 2]
        };
        BreakerMetrics {
            status: state.status,
            error_rate,
            p50_latency_ms: p50,
            failure_count: state.total_failures,
            success_count: state.total_successes,
        }
    }
}

fn push_capped(samples: &mut VecDeque<u64>, value: u64, cap: usize) {
    samples.push_back(value);
    while samples.len() > cap {
        samples.pop_front();
    }
}

/// One breaker per provider name, created on first use.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = match self.breakers.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            breakers
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config.clone()))),
        )
    }

    pub fn is_provider_available(&self, provider: &str) -> bool {
        self.breaker(provider).is_available()
    }

    /// Health score used for tie-breaking and premium ordering.
    pub fn health_score(&self, provider: &str) -> f64 {
        self.breaker(provider).metrics().score()
    }

    /// Sort provider names healthiest-first.
    pub fn sort_by_health(&self, providers: &mut [String]) {
        providers.sort_by(|a, b| {
            self.health_score(b)
                .partial_cmp(&self.health_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}
