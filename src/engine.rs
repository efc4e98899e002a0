//! The enrichment engine: end-to-end pipeline wiring.
//!
//! One engine owns the long-lived shared state (registry, cache, breakers,
//! key state, singleflight tables, metrics, cost governor) and exposes a
//! single entry point per row. The pipeline runs normalize → identity →
//! plan → execute → aggregate → verify, with escalation as a second
//! premium-only executor pass and synthesis after facts are accepted.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::aggregate::{self, AggregatedField};
use crate::breaker::BreakerRegistry;
use crate::cache::EnrichmentCache;
use crate::config::EngineConfig;
use crate::cost::{CostGovernor, GovernorConfig};
use crate::error::Result;
use crate::executor::{Executor, TierGate};
use crate::identity::IdentityResolver;
use crate::metrics::EngineMetrics;
use crate::normalize::normalize_row;
use crate::planner::Planner;
use crate::provenance::{ProvenanceRecord, ProvenanceRecorder};
use crate::provider::drivers::{
    GithubDriver, HunterDriver, LinkedinDriver, OpenCorporatesDriver, PatternInferenceProvider,
    SerperDriver, WhoisDriver,
};
use crate::provider::mock::standard_mock_set;
use crate::provider::{Provider, ProviderRegistry};
use crate::singleflight::Singleflight;
use crate::smart::{PageFetcher, ReqwestPageFetcher, SerpClient, SmartEnrichmentProvider};
use crate::store::{shared_store_from_env, KeyValueStore};
use crate::synthesize::{Synthesizer, TextGenerator};
use crate::types::{
    CanonicalData, CanonicalField, Field, NormalizedInput, ProviderResult, RowStatus,
};
use crate::verify::{FieldDecision, VerificationReport, VerificationMode, Verifier};

/// Options for one enrichment call.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOptions {
    /// Row budget override in cents; the configured default applies when
    /// absent.
    pub budget_cents: Option<u32>,
    pub mode: VerificationMode,
    /// Label recorded in logs and the summary; reserved for named plans.
    pub plan_name: Option<String>,
    pub skip_cache: bool,
}

/// One row to enrich.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub table_id: String,
    pub row_id: String,
    pub raw: HashMap<String, serde_json::Value>,
    pub fields: Vec<Field>,
    pub opts: EnrichmentOptions,
}

impl EnrichmentRequest {
    pub fn new(table_id: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            row_id: row_id.into(),
            raw: HashMap::new(),
            fields: Vec::new(),
            opts: EnrichmentOptions::default(),
        }
    }

    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: &[Field]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn with_opts(mut self, opts: EnrichmentOptions) -> Self {
        self.opts = opts;
        self
    }
}

/// Result of enriching one row.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub status: RowStatus,
    pub canonical: CanonicalData,
    pub provenance: Vec<ProvenanceRecord>,
    pub cost_cents: u32,
    pub duration_ms: u64,
    pub summary: String,
}

/// Long-lived shared state, constructed once and handed to the engine.
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub registry: Arc<ProviderRegistry>,
    pub cache: Arc<EnrichmentCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<EngineMetrics>,
    pub cells: Arc<Singleflight<Vec<ProviderResult>>>,
    pub calls: Arc<Singleflight<Option<ProviderResult>>>,
}

/// Builder assembling an engine from config plus optional injected
/// collaborators. Tests inject mock stores, SERP clients, and generators.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    generator: Option<Arc<dyn TextGenerator>>,
    serp: Option<Arc<dyn SerpClient>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    providers: Option<Vec<Arc<dyn Provider>>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_serp_client(mut self, serp: Arc<dyn SerpClient>) -> Self {
        self.serp = Some(serp);
        self
    }

    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the registry contents entirely.
    pub fn with_providers(mut self, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn build(self) -> Result<EnrichmentEngine> {
        let store = self.store.or_else(shared_store_from_env);

        let mut registry = ProviderRegistry::new();
        match self.providers {
            Some(providers) => {
                for provider in providers {
                    registry.register(provider);
                }
            }
            None if self.config.use_mock_providers => {
                for provider in standard_mock_set() {
                    registry.register(provider);
                }
            }
            None => {
                let serper = Arc::new(SerperDriver::new(store.clone())?);
                registry.register(Arc::new(GithubDriver::new(store.clone())?));
                registry.register(Arc::new(WhoisDriver::new()?));
                registry.register(Arc::new(PatternInferenceProvider::new()));
                registry.register(Arc::clone(&serper) as Arc<dyn Provider>);
                registry.register(Arc::new(HunterDriver::new(store.clone())?));
                registry.register(Arc::new(OpenCorporatesDriver::new(store.clone())?));
                registry.register(Arc::new(LinkedinDriver::new(store.clone())?));

                let serp: Arc<dyn SerpClient> = match self.serp {
                    Some(serp) => serp,
                    None => serper,
                };
                let fetcher: Arc<dyn PageFetcher> = match self.fetcher {
                    Some(fetcher) => fetcher,
                    None => Arc::new(ReqwestPageFetcher::new()?),
                };
                registry.register(Arc::new(SmartEnrichmentProvider::new(serp, fetcher)));
            }
        }

        let config = Arc::new(self.config);
        let governor = Arc::new(CostGovernor::new(GovernorConfig {
            total_budget_cents: config.total_budget_cents,
            row_budget_cents: config.max_cost_per_cell_cents,
            provider_caps: HashMap::new(),
        }));

        let ctx = EngineContext {
            registry: Arc::new(registry),
            cache: Arc::new(EnrichmentCache::new(config.cache.clone(), store)),
            breakers: Arc::new(BreakerRegistry::new(config.circuit_breaker.clone())),
            metrics: Arc::new(EngineMetrics::new(config.metrics.clone())),
            cells: Arc::new(Singleflight::new(&config.singleflight)),
            calls: Arc::new(Singleflight::new(&config.singleflight)),
            config,
        };

        Ok(EnrichmentEngine {
            governor,
            synthesizer: self.generator.map(Synthesizer::new),
            resolver: IdentityResolver::new(),
            planner: Planner::new(),
            ctx,
        })
    }
}

/// The enrichment engine.
pub struct EnrichmentEngine {
    ctx: EngineContext,
    governor: Arc<CostGovernor>,
    resolver: IdentityResolver,
    planner: Planner,
    synthesizer: Option<Synthesizer>,
}

impl EnrichmentEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn governor(&self) -> &Arc<CostGovernor> {
        &self.governor
    }

    /// Enrich a single row.
    pub async fn enrich(&self, request: EnrichmentRequest) -> Result<EnrichmentOutcome> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.ctx.config.row_deadline_ms);
        let row_id = request.row_id.clone();
        let table_id = request.table_id.clone();

        let input = Arc::new(normalize_row(&table_id, &row_id, &request.raw));
        let identity = self.resolver.resolve(&input, &request.fields);

        if !identity.has_minimum_identity() {
            let duration_ms = started.elapsed().as_millis() as u64;
            self.ctx.metrics.record_row(duration_ms, true);
            tracing::info!(row = %row_id, "row failed: insufficient identity");
            return Ok(EnrichmentOutcome {
                status: RowStatus::Failed,
                canonical: CanonicalData::new(),
                provenance: Vec::new(),
                cost_cents: 0,
                duration_ms,
                summary: format!(
                    "insufficient identity ({:?}); no providers consulted",
                    identity.signature
                ),
            });
        }

        let spent_before = self.governor.ledger().by_row.get(&row_id).copied().unwrap_or(0);
        let budget = request
            .opts
            .budget_cents
            .unwrap_or(self.ctx.config.max_cost_per_cell_cents)
            .min(self.governor.row_remaining_cents(&row_id));

        let plan = self.planner.plan(
            &input,
            &identity,
            &request.fields,
            budget,
            &self.ctx.registry,
            &self.ctx.breakers,
        );
        if let Some(name) = &request.opts.plan_name {
            tracing::debug!(row = %row_id, plan_name = %name, "named plan requested");
        }

        // Fields the input already carries are accepted as-is; only the
        // missing ones go through the waterfall and the verifier.
        let missing_fields: Vec<Field> = request
            .fields
            .iter()
            .copied()
            .filter(|f| !input.has_field(*f))
            .collect();

        let executor = self.executor();
        let mut evidence = executor
            .execute(&plan, &input, TierGate::All, request.opts.skip_cache, deadline)
            .await?;

        let verifier = Verifier::new(request.opts.mode);
        let mut aggregated = aggregate::aggregate(&evidence);
        let mut report = verifier.verify(&missing_fields, &aggregated);

        // Escalation: one explicit premium-only pass, never reentrant.
        let escalate = report.fields_to_escalate();
        if !escalate.is_empty() {
            tracing::debug!(row = %row_id, fields = escalate.len(), "escalating to premium pass");
            let mut escalation_plan = plan.clone();
            escalation_plan
                .steps
                .retain(|s| escalate.contains(&s.field));
            let mut more = executor
                .execute(&escalation_plan, &input, TierGate::PremiumOnly, true, deadline)
                .await?;
            evidence.append(&mut more);
            aggregated = aggregate::aggregate(&evidence);
            report = verifier.verify(&missing_fields, &aggregated);
        }

        let mut canonical = build_canonical(&input, &request.fields, &report, &aggregated);

        // Synthesis runs over accepted facts only, then the affected fields
        // are re-aggregated and re-verified.
        let synthesis_fields: Vec<Field> = plan
            .synthesis_fields()
            .into_iter()
            .filter(|f| !canonical.contains(*f))
            .collect();
        if let Some(synthesizer) = &self.synthesizer {
            let mut synthesized_any = false;
            for field in synthesis_fields {
                if let Some(result) = synthesizer.synthesize(&input, &canonical, field).await {
                    self.governor.record_cost(
                        &row_id,
                        &table_id,
                        &result.source,
                        field,
                        result.cost_cents,
                    );
                    evidence.push(result);
                    synthesized_any = true;
                }
            }
            if synthesized_any {
                aggregated = aggregate::aggregate(&evidence);
                report = verifier.verify(&missing_fields, &aggregated);
                canonical = build_canonical(&input, &request.fields, &report, &aggregated);
            }
        }

        let provenance = ProvenanceRecorder::new();
        for result in &evidence {
            provenance.record(&row_id, &table_id, result);
        }

        let cost_cents = self
            .governor
            .ledger()
            .by_row
            .get(&row_id)
            .copied()
            .unwrap_or(0)
            .saturating_sub(spent_before);
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = row_status(&request.fields, &canonical, &evidence);
        let summary = summarize(&report, &request.fields, &canonical, cost_cents, duration_ms);

        self.ctx
            .metrics
            .record_row(duration_ms, status == RowStatus::Failed);
        for verdict in &report.verdicts {
            use std::sync::atomic::Ordering;
            match verdict.decision {
                FieldDecision::Accept => {
                    self.ctx.metrics.fields_accepted.fetch_add(1, Ordering::Relaxed)
                }
                FieldDecision::Escalate => {
                    self.ctx.metrics.fields_escalated.fetch_add(1, Ordering::Relaxed)
                }
                _ => self.ctx.metrics.fields_missing.fetch_add(1, Ordering::Relaxed),
            };
        }
        tracing::info!(row = %row_id, %status, cost_cents, duration_ms, "row enriched");

        Ok(EnrichmentOutcome {
            status,
            canonical,
            provenance: provenance.export(),
            cost_cents,
            duration_ms,
            summary,
        })
    }

    /// Enrich many rows with bounded concurrency, preserving input order.
    pub async fn enrich_many(
        self: &Arc<Self>,
        requests: Vec<EnrichmentRequest>,
    ) -> Vec<Result<EnrichmentOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.max_concurrent_rows.max(1)));
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let engine = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    engine.enrich(request).await
                })
            })
            .collect();

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(crate::error::Error::Internal(format!("row task failed: {e}"))),
            })
            .collect()
    }

    fn executor(&self) -> Executor {
        Executor {
            registry: Arc::clone(&self.ctx.registry),
            cache: Arc::clone(&self.ctx.cache),
            breakers: Arc::clone(&self.ctx.breakers),
            governor: Arc::clone(&self.governor),
            metrics: Arc::clone(&self.ctx.metrics),
            cells: Arc::clone(&self.ctx.cells),
            calls: Arc::clone(&self.ctx.calls),
            config: Arc::clone(&self.ctx.config),
        }
    }
}

/// Canonical data: requested fields the input already carried, plus every
/// field the verifier accepted.
fn build_canonical(
    input: &NormalizedInput,
    requested: &[Field],
    report: &VerificationReport,
    aggregated: &[AggregatedField],
) -> CanonicalData {
    let mut canonical = CanonicalData::new();
    for field in requested {
        if let Some(value) = input.existing_value(*field).filter(|_| input.has_field(*field)) {
            canonical.insert(
                *field,
                CanonicalField {
                    value,
                    confidence: 1.0,
                    source: "input".to_string(),
                    verified: true,
                },
            );
        }
    }
    for verdict in &report.verdicts {
        if verdict.decision != FieldDecision::Accept {
            continue;
        }
        let Some(agg) = aggregated.iter().find(|a| a.field == verdict.field) else {
            continue;
        };
        canonical.insert(
            verdict.field,
            CanonicalField {
                value: agg.canonical_value.clone(),
                confidence: agg.confidence,
                source: agg.canonical_source.clone(),
                verified: true,
            },
        );
    }
    canonical
}

fn row_status(
    requested: &[Field],
    canonical: &CanonicalData,
    evidence: &[ProviderResult],
) -> RowStatus {
    if requested.is_empty() {
        return RowStatus::Success;
    }
    let resolved = requested.iter().filter(|f| canonical.contains(**f)).count();
    if resolved == requested.len() {
        RowStatus::Success
    } else if resolved > 0 || !evidence.is_empty() {
        RowStatus::Partial
    } else {
        RowStatus::Failed
    }
}

fn summarize(
    report: &VerificationReport,
    requested: &[Field],
    canonical: &CanonicalData,
    cost_cents: u32,
    duration_ms: u64,
) -> String {
    let resolved = requested.iter().filter(|f| canonical.contains(**f)).count();
    let missing: Vec<String> = report
        .verdicts
        .iter()
        .filter(|v| v.decision != FieldDecision::Accept)
        .map(|v| {
            format!(
                "{} ({})",
                v.field,
                v.reason.as_deref().unwrap_or("unresolved")
            )
        })
        .collect();
    let mut summary = format!(
        "{resolved}/{} fields resolved; cost {cost_cents}c in {duration_ms}ms",
        requested.len()
    );
    if !missing.is_empty() {
        summary.push_str("; unresolved: ");
        summary.push_str(&missing.join(", "));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockBehavior, MockProvider};
    use crate::smart::{FetchedPage, SerpHit};
    use crate::types::{FieldValue, ProviderTier};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn mock_engine() -> EnrichmentEngine {
        EnrichmentEngine::builder(EngineConfig::mock())
            .build()
            .expect("mock engine builds")
    }

    #[tokio::test]
    async fn test_identity_fail_fast_costs_nothing() {
        let engine = mock_engine();
        // A free-mail domain never identifies a company.
        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("domain", "gmail.com")
            .with_fields(&[Field::Company]);

        let outcome = engine.enrich(request).await.unwrap();
        assert_eq!(outcome.status, RowStatus::Failed);
        assert_eq!(outcome.cost_cents, 0);
        assert!(outcome.canonical.is_empty());
        assert!(outcome.provenance.is_empty());
        assert_eq!(engine.context().metrics.snapshot().provider_calls, 0);
        assert!(outcome.summary.contains("insufficient identity"));
    }

    #[tokio::test]
    async fn test_end_to_end_with_mock_providers() {
        let engine = mock_engine();
        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("name", "Ada Lovelace")
            .with_raw("company", "Example")
            .with_raw("domain", "example.com")
            .with_fields(&[Field::Email, Field::Title, Field::Location]);

        let outcome = engine.enrich(request).await.unwrap();
        assert_ne!(outcome.status, RowStatus::Failed);
        assert!(outcome.canonical.len() >= 1);
        assert!(!outcome.provenance.is_empty());
        assert!(outcome.duration_ms < 10_000);

        // Budget invariant: recorded spend stays within the row budget.
        let ledger = engine.governor().ledger();
        assert!(ledger.by_row["r1"] <= engine.context().config.max_cost_per_cell_cents);
    }

    #[tokio::test]
    async fn test_linkedin_url_short_circuits_serp() {
        let serper = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Name, FieldValue::text("A. Lovelace"), 0.7)
                .with_field(Field::Title, FieldValue::text("Engineer"), 0.7)
                .with_field(Field::Company, FieldValue::text("Example"), 0.7),
        );
        let linkedin = Arc::new(
            MockProvider::new("linkedin", ProviderTier::Premium, 10)
                .with_field(Field::Name, FieldValue::text("Ada Lovelace"), 0.95)
                .with_field(Field::Title, FieldValue::text("Director"), 0.95)
                .with_field(Field::Company, FieldValue::text("Example"), 0.95),
        );
        let engine = EnrichmentEngine::builder(EngineConfig::mock())
            .with_providers(vec![
                Arc::clone(&serper) as Arc<dyn Provider>,
                Arc::clone(&linkedin) as Arc<dyn Provider>,
            ])
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("linkedinUrl", "https://linkedin.com/in/ada-lovelace")
            .with_fields(&[Field::Name, Field::Title, Field::Company]);

        let outcome = engine.enrich(request).await.unwrap();
        assert_eq!(outcome.status, RowStatus::Success);
        // LinkedIn answered above threshold, so the SERP was never needed.
        assert_eq!(serper.calls(), 0);
        assert!(linkedin.calls() >= 3);
        assert_eq!(outcome.canonical.text(Field::Name), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn test_conflicting_evidence_leaves_field_unresolved() {
        let a = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Title, FieldValue::text("Baker"), 0.2)
                .with_field(Field::Company, FieldValue::text("Google"), 0.9),
        );
        let b = Arc::new(
            MockProvider::new("whois", ProviderTier::Free, 0)
                .with_field(Field::Title, FieldValue::text("Astronaut"), 0.2)
                .with_field(Field::Company, FieldValue::text("Google"), 0.8),
        );
        let mut config = EngineConfig::mock();
        config.ensemble_fusion.enabled = true;
        let engine = EnrichmentEngine::builder(config)
            .with_providers(vec![
                Arc::clone(&a) as Arc<dyn Provider>,
                Arc::clone(&b) as Arc<dyn Provider>,
            ])
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("name", "John Smith")
            .with_raw("company", "Google")
            .with_fields(&[Field::Title, Field::Company]);

        let outcome = engine.enrich(request).await.unwrap();
        // Title conflicts at rock-bottom confidence: require-more. Company
        // agrees across sources: accepted.
        assert_eq!(outcome.status, RowStatus::Partial);
        assert!(outcome.canonical.contains(Field::Company));
        assert!(!outcome.canonical.contains(Field::Title));
    }

    #[tokio::test]
    async fn test_escalation_second_pass_restricted_to_premium() {
        let weak = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                // In the escalation band: threshold/2 <= c < threshold.
                .with_field(Field::Title, FieldValue::text("Engineer"), 0.3),
        );
        let strong = Arc::new(
            MockProvider::new("linkedin", ProviderTier::Premium, 10)
                .with_field(Field::Title, FieldValue::text("Staff Engineer"), 0.95),
        );
        let mut config = EngineConfig::mock();
        // Premium fallback in pass one stays idle so escalation does the work.
        config.confidence_threshold = 0.2;
        let engine = EnrichmentEngine::builder(config)
            .with_providers(vec![
                Arc::clone(&weak) as Arc<dyn Provider>,
                Arc::clone(&strong) as Arc<dyn Provider>,
            ])
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("name", "Grace Hopper")
            .with_raw("company", "Eckert-Mauchly")
            .with_fields(&[Field::Title]);

        let outcome = engine.enrich(request).await.unwrap();
        assert_eq!(outcome.status, RowStatus::Success);
        assert_eq!(outcome.canonical.text(Field::Title), Some("Staff Engineer"));
        assert_eq!(strong.calls(), 1);
    }

    #[tokio::test]
    async fn test_smart_enrichment_website_scenario() {
        struct RedditSerp;

        #[async_trait]
        impl crate::smart::SerpClient for RedditSerp {
            async fn search(&self, _query: &str) -> Result<Vec<SerpHit>> {
                Ok(vec![SerpHit {
                    title: "Reddit - Dive into anything".into(),
                    link: "https://www.reddit.com/".into(),
                    snippet: "Reddit is a network of communities.".into(),
                    position: 1,
                }])
            }
        }

        struct RedditPage;

        #[async_trait]
        impl crate::smart::PageFetcher for RedditPage {
            async fn fetch(&self, _url: &str) -> Result<Option<FetchedPage>> {
                Ok(Some(FetchedPage {
                    title: Some("Reddit - Dive into anything".into()),
                    body_excerpt: "communities and media".into(),
                }))
            }
        }

        let smart = Arc::new(SmartEnrichmentProvider::new(
            Arc::new(RedditSerp),
            Arc::new(RedditPage),
        ));
        let engine = EnrichmentEngine::builder(EngineConfig::mock())
            .with_providers(vec![smart as Arc<dyn Provider>])
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("company", "Reddit")
            .with_fields(&[Field::Website])
            .with_opts(EnrichmentOptions {
                budget_cents: Some(10),
                ..Default::default()
            });

        let outcome = engine.enrich(request).await.unwrap();
        assert_eq!(outcome.status, RowStatus::Success);
        let website = outcome.canonical.get(Field::Website).unwrap();
        assert_eq!(website.value.as_text(), Some("https://reddit.com/"));
        assert!(website.confidence >= 0.8);
        assert_eq!(website.source, "smart_enrichment");
        assert!(outcome.cost_cents <= 2);
    }

    #[tokio::test]
    async fn test_synthesis_after_accepted_facts() {
        struct CannedGenerator;

        #[async_trait]
        impl TextGenerator for CannedGenerator {
            async fn generate(&self, _: &str, _: &str, _: u32, _: f64) -> Result<String> {
                Ok("Ada Lovelace is Director of Engineering at Example.".to_string())
            }
        }

        let engine = EnrichmentEngine::builder(EngineConfig::mock())
            .with_generator(Arc::new(CannedGenerator))
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("name", "Ada Lovelace")
            .with_raw("company", "Example")
            .with_raw("domain", "example.com")
            .with_fields(&[Field::Title, Field::ShortBio])
            .with_opts(EnrichmentOptions {
                mode: VerificationMode::BestEffort,
                ..Default::default()
            });

        let outcome = engine.enrich(request).await.unwrap();
        let bio = outcome.canonical.get(Field::ShortBio);
        assert!(bio.is_some(), "bio missing: {}", outcome.summary);
        assert_eq!(bio.unwrap().source, "llm");
        assert!(outcome
            .provenance
            .iter()
            .any(|p| p.source == "llm" && p.field == Field::ShortBio));
    }

    #[tokio::test]
    async fn test_enrich_many_preserves_order() {
        let engine = Arc::new(mock_engine());
        let requests: Vec<EnrichmentRequest> = (0..12)
            .map(|i| {
                EnrichmentRequest::new("t1", format!("row-{i}"))
                    .with_raw("name", "Ada Lovelace")
                    .with_raw("domain", format!("example{i}.com"))
                    .with_fields(&[Field::Email])
            })
            .collect();

        let outcomes = engine.enrich_many(requests).await;
        assert_eq!(outcomes.len(), 12);
        for (i, outcome) in outcomes.iter().enumerate() {
            let outcome = outcome.as_ref().unwrap();
            assert!(
                outcome.provenance.iter().all(|p| p.row_id == format!("row-{i}")),
                "outcome {i} mixed rows"
            );
        }
    }

    #[tokio::test]
    async fn test_provider_outage_falls_back_to_alternative() {
        let down = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Company, FieldValue::text("x"), 0.9)
                .with_behavior(MockBehavior::Fail("HTTP 500".into())),
        );
        let up = Arc::new(
            MockProvider::new("opencorporates", ProviderTier::Cheap, 2)
                .with_field(Field::Company, FieldValue::text("Example Inc"), 0.85),
        );
        let mut config = EngineConfig::mock();
        config.parallel_probes.enabled = false;
        let engine = EnrichmentEngine::builder(config)
            .with_providers(vec![
                Arc::clone(&down) as Arc<dyn Provider>,
                Arc::clone(&up) as Arc<dyn Provider>,
            ])
            .build()
            .unwrap();

        let request = EnrichmentRequest::new("t1", "r1")
            .with_raw("domain", "example.com")
            .with_fields(&[Field::Company]);

        let outcome = engine.enrich(request).await.unwrap();
        assert_eq!(outcome.status, RowStatus::Success);
        assert_eq!(outcome.canonical.text(Field::Company), Some("Example Inc"));
    }
}
