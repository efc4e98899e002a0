//! # enrich-core
//!
//! A waterfall enrichment engine for tabular rows describing people and
//! companies. For each row the engine decides which external data providers
//! to consult, in what order, under a cost budget, and reconciles the
//! evidence into one canonical value per field with full provenance and a
//! confidence score.
//!
//! ## Core Components
//!
//! - **Normalizer / Identity Resolver**: canonicalize inputs and decide how
//!   strongly they pin down one real-world entity
//! - **Planner**: turn missing fields into an ordered, budgeted plan
//! - **Executor**: the cache → free → cheap → premium waterfall with
//!   parallel probes, circuit breaking, and singleflight coalescing
//! - **Aggregator / Verifier**: multi-source confidence fusion and
//!   per-field accept / escalate / require-more decisions
//! - **Synthesizer**: constrained text fusion over verified facts
//!
//! ## Example
//!
//! ```rust,ignore
//! use enrich_core::{EngineConfig, EnrichmentEngine, EnrichmentRequest, Field};
//!
//! let engine = EnrichmentEngine::builder(EngineConfig::default()).build()?;
//! let outcome = engine
//!     .enrich(
//!         EnrichmentRequest::new("accounts", "row-17")
//!             .with_raw("company", "Reddit")
//!             .with_fields(&[Field::Website, Field::Industry]),
//!     )
//!     .await?;
//! println!("{}: {}", outcome.status, outcome.summary);
//! ```

pub mod aggregate;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod executor;
pub mod identity;
pub mod keys;
pub mod metrics;
pub mod normalize;
pub mod planner;
pub mod provenance;
pub mod provider;
pub mod singleflight;
pub mod smart;
pub mod store;
pub mod synthesize;
pub mod types;
pub mod verify;

// Re-exports for convenience
pub use aggregate::{aggregate, aggregate_with_threshold, source_weight, AggregatedField};
pub use breaker::{BreakerMetrics, BreakerRegistry, CircuitBreaker, CircuitStatus};
pub use cache::{CacheLookup, CacheStatsSnapshot, EnrichmentCache};
pub use config::{
    CacheConfig, CircuitBreakerConfig, EngineConfig, EnsembleFusionConfig, MetricsConfig,
    ParallelProbesConfig, SingleflightConfig,
};
pub use cost::{BudgetPartition, CostGovernor, CostLedger, GovernorConfig, LedgerEntry};
pub use engine::{
    EngineBuilder, EngineContext, EnrichmentEngine, EnrichmentOptions, EnrichmentOutcome,
    EnrichmentRequest,
};
pub use error::{Error, Result};
pub use executor::{Executor, TierGate};
pub use identity::{
    AmbiguityRisk, EntityIdentity, EntityType, IdentityResolver, IdentityStrength, InputSignature,
    LookupStrategy, SensitivityLevel,
};
pub use keys::{ApiKeyManager, KeyManagerConfig, KeyState, KeyStatus};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use normalize::{
    extract_domain_from_email, is_free_email_domain, map_column_key, normalize_domain,
    normalize_row, NormalizeOptions,
};
pub use planner::{EnrichmentPlan, PlanStep, Planner, StepKind, StepPriority};
pub use provenance::{ProvenanceRecord, ProvenanceRecorder};
pub use provider::{
    drivers::{
        GithubDriver, HunterDriver, LinkedinDriver, OpenCorporatesDriver,
        PatternInferenceProvider, SerperDriver, WhoisDriver,
    },
    mock::{standard_mock_set, MockBehavior, MockProvider},
    Provider, ProviderCapability, ProviderRegistry,
};
pub use singleflight::Singleflight;
pub use smart::{
    FetchedPage, PageFetcher, ReqwestPageFetcher, SerpClient, SerpHit, SmartDecision,
    SmartEnrichmentEngine, SmartEnrichmentProvider,
};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use synthesize::{AnthropicGenerator, Synthesizer, TextGenerator};
pub use types::{
    CanonicalData, CanonicalField, Field, FieldValue, NormalizedInput, ProviderResult,
    ProviderTier, RowStatus,
};
pub use verify::{
    FieldDecision, FieldVerdict, VerificationMode, VerificationReport, VerificationStatus,
    Verifier,
};
