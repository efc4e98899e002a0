//! Engine configuration.
//!
//! One serde-friendly struct tree covering every tunable the engine
//! recognizes. Tests and embedders construct it in code; deployments may
//! deserialize it from JSON.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Swap the registry between the mock set and the real driver set.
    pub use_mock_providers: bool,
    /// Default per-row budget in cents.
    pub max_cost_per_cell_cents: u32,
    /// Total budget across a governor's lifetime, in cents.
    pub total_budget_cents: u32,
    /// Default per-field acceptance threshold.
    pub confidence_threshold: f64,
    /// Row deadline in milliseconds.
    pub row_deadline_ms: u64,
    /// Batch deadline in milliseconds.
    pub batch_deadline_ms: u64,
    /// Rows processed concurrently by `enrich_many`.
    pub max_concurrent_rows: usize,
    pub cache: CacheConfig,
    pub singleflight: SingleflightConfig,
    pub parallel_probes: ParallelProbesConfig,
    pub ensemble_fusion: EnsembleFusionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_mock_providers: false,
            max_cost_per_cell_cents: 50,
            total_budget_cents: 10_000,
            confidence_threshold: 0.7,
            row_deadline_ms: 5 * 60 * 1000,
            batch_deadline_ms: 30 * 60 * 1000,
            max_concurrent_rows: 10,
            cache: CacheConfig::default(),
            singleflight: SingleflightConfig::default(),
            parallel_probes: ParallelProbesConfig::default(),
            ensemble_fusion: EnsembleFusionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration suitable for tests: mocks on, tight budgets.
    pub fn mock() -> Self {
        Self {
            use_mock_providers: true,
            ..Default::default()
        }
    }
}

/// Cache layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for positive entries, seconds.
    pub default_ttl_seconds: u64,
    /// TTL for negative ("known unenrichable") entries, seconds.
    pub negative_ttl_seconds: u64,
    /// Version prefix; bumping invalidates all prior entries.
    pub version: u32,
    /// Entry cap for the in-memory L1.
    pub max_memory_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 3600,
            negative_ttl_seconds: 300,
            version: 1,
            max_memory_entries: 10_000,
        }
    }
}

/// Singleflight coalescing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleflightConfig {
    pub enabled: bool,
    /// How long a joiner waits on the shared call before giving up.
    pub timeout_ms: u64,
}

impl Default for SingleflightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 30_000,
        }
    }
}

/// Free/cheap probe fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelProbesConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
    pub probe_timeout_ms: u64,
}

impl Default for ParallelProbesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 5,
            probe_timeout_ms: 10_000,
        }
    }
}

/// Switch between first-good-enough and weighted ensemble fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleFusionConfig {
    pub enabled: bool,
    /// Similarity at or above which two values agree.
    pub agreement_threshold: f64,
}

impl Default for EnsembleFusionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agreement_threshold: 0.85,
        }
    }
}

/// Circuit breaker parameters, shared by every per-provider breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before allowing a probe, ms.
    pub reset_timeout_ms: u64,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// Rolling window length, ms.
    pub window_ms: u64,
    /// Minimum requests in the window before the breaker may trip.
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            window_ms: 60_000,
            minimum_requests: 5,
        }
    }
}

/// Metrics collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Per-provider latency samples retained for percentile estimates.
    pub max_latency_samples: usize,
    /// Emit a summary log line every N requests (0 disables).
    pub log_interval_requests: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_latency_samples: 256,
            log_interval_requests: 100,
        }
    }
}
