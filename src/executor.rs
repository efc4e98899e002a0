//! Plan execution: the waterfall.
//!
//! Per field: cache first (positive hits become synthetic `cache` results,
//! negative hits short-circuit), then free and cheap providers probed in
//! parallel under a bounded fan-out, then a sequential health-sorted
//! premium fallback inside the premium share of the row budget. A field
//! the full waterfall cannot enrich gets a negative cache marker. Every
//! provider call is gated by the cost governor and the circuit breaker,
//! wrapped in singleflight, and bounded by a timeout; cost is recorded
//! exactly once per successful call, inside the singleflighted closure, so
//! coalesced callers are never double-charged.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::aggregate;
use crate::breaker::BreakerRegistry;
use crate::cache::{CacheLookup, EnrichmentCache};
use crate::config::EngineConfig;
use crate::cost::CostGovernor;
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use crate::planner::{EnrichmentPlan, PlanStep, StepKind, StepPriority};
use crate::provider::{Provider, ProviderRegistry};
use crate::singleflight::Singleflight;
use crate::types::{Field, NormalizedInput, ProviderResult, ProviderTier};

/// Which plan steps an execution pass may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierGate {
    All,
    /// Escalation pass: premium steps only.
    PremiumOnly,
}

/// Serialized form of a cell-cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedCell {
    value: crate::types::FieldValue,
    confidence: f64,
    source: String,
    verified: bool,
}

/// Waterfall executor. Cheap to construct per run; every shared component
/// is an `Arc` into the engine context.
pub struct Executor {
    pub registry: Arc<ProviderRegistry>,
    pub cache: Arc<EnrichmentCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub governor: Arc<CostGovernor>,
    pub metrics: Arc<EngineMetrics>,
    pub cells: Arc<Singleflight<Vec<ProviderResult>>>,
    pub calls: Arc<Singleflight<Option<ProviderResult>>>,
    pub config: Arc<EngineConfig>,
}

impl Executor {
    /// Run the plan's lookup steps and return the collected evidence.
    ///
    /// Fields are processed in plan order; probes within a field run
    /// concurrently. When `deadline` passes, the evidence gathered so far
    /// is returned rather than discarded.
    pub async fn execute(
        &self,
        plan: &EnrichmentPlan,
        input: &Arc<NormalizedInput>,
        gate: TierGate,
        skip_cache: bool,
        deadline: Instant,
    ) -> Result<Vec<ProviderResult>> {
        let plan_spent = Arc::new(AtomicU32::new(0));
        let mut evidence = Vec::new();

        for field in plan.lookup_fields() {
            if Instant::now() >= deadline {
                tracing::warn!(row = %input.row_id, %field, "deadline reached, returning partial evidence");
                break;
            }
            let steps: Vec<PlanStep> = plan
                .lookup_steps_for(field)
                .into_iter()
                .filter(|s| gate == TierGate::All || s.tier == ProviderTier::Premium)
                .cloned()
                .collect();
            if steps.is_empty() {
                continue;
            }

            // Resolve providers up front: a plan naming an unknown provider
            // is an internal invariant violation and fails the row.
            let mut resolved = Vec::with_capacity(steps.len());
            for step in &steps {
                resolved.push((step.clone(), self.registry.by_name(&step.provider)?));
            }

            let cell_key = EnrichmentCache::cell_key(input, field);
            let read_cache = !skip_cache && gate == TierGate::All;
            let allow_negative = gate == TierGate::All;

            let field_evidence = self
                .cells
                .run(&cell_key, || {
                    self.enrich_field(
                        input,
                        field,
                        resolved,
                        plan,
                        Arc::clone(&plan_spent),
                        read_cache,
                        allow_negative,
                        deadline,
                    )
                })
                .await
                .unwrap_or_default();
            evidence.extend(field_evidence);
        }

        Ok(evidence)
    }

    #[allow(clippy::too_many_arguments)]
    async fn enrich_field(
        &self,
        input: &Arc<NormalizedInput>,
        field: Field,
        steps: Vec<(PlanStep, Arc<dyn Provider>)>,
        plan: &EnrichmentPlan,
        plan_spent: Arc<AtomicU32>,
        read_cache: bool,
        allow_negative: bool,
        deadline: Instant,
    ) -> Result<Vec<ProviderResult>> {
        let cell_key = EnrichmentCache::cell_key(input, field);

        if read_cache {
            match self.cache.get(&cell_key) {
                CacheLookup::Hit(raw) => {
                    if let Ok(cell) = serde_json::from_value::<CachedCell>(raw) {
                        let result = ProviderResult::new(field, cell.value, cell.confidence, "cache")
                            .with_verified(cell.verified)
                            .with_raw(serde_json::json!({ "origin": cell.source }));
                        return Ok(vec![result]);
                    }
                }
                CacheLookup::NegativeHit => {
                    tracing::debug!(row = %input.row_id, %field, "negative cache hit");
                    return Ok(Vec::new());
                }
                CacheLookup::Miss => {}
            }
        }

        // High-priority steps (a known LinkedIn handle) run before the tier
        // waterfall: a direct lookup beats probing around it.
        let (high, rest): (Vec<_>, Vec<_>) = steps
            .into_iter()
            .partition(|(step, _)| step.priority == StepPriority::High);
        let (probes, premium): (Vec<_>, Vec<_>) = rest
            .into_iter()
            .partition(|(step, _)| step.tier != ProviderTier::Premium);

        let mut results = Vec::new();
        for (step, provider) in high {
            if Instant::now() >= deadline {
                break;
            }
            if let Ok(Some(result)) = self
                .call_provider(input, field, &step, provider, plan, &plan_spent, deadline)
                .await
            {
                results.push(result);
            }
            if self.has_acceptable(&results) {
                break;
            }
        }

        if !self.has_acceptable(&results) {
            let mut probed = self
                .run_probes(input, field, probes, plan, &plan_spent, deadline)
                .await;
            results.append(&mut probed);
        }

        if !self.has_acceptable(&results) {
            self.run_premium(
                input,
                field,
                premium,
                plan,
                &plan_spent,
                deadline,
                &mut results,
            )
            .await;
        }

        let best = results
            .iter()
            .filter(|r| r.has_value())
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();

        match best {
            Some(best) => {
                if let Some(value) = best.value.clone() {
                    let cell = CachedCell {
                        value,
                        confidence: best.confidence,
                        source: best.source.clone(),
                        verified: best.verified,
                    };
                    if let Ok(raw) = serde_json::to_value(&cell) {
                        self.cache.set(&cell_key, raw);
                    }
                }
            }
            None if allow_negative => {
                tracing::debug!(row = %input.row_id, %field, "waterfall exhausted, caching negative");
                self.cache.set_negative(&cell_key);
            }
            None => {}
        }

        Ok(results)
    }

    /// Free and cheap probes, fanned out under the concurrency cap.
    async fn run_probes(
        &self,
        input: &Arc<NormalizedInput>,
        field: Field,
        probes: Vec<(PlanStep, Arc<dyn Provider>)>,
        plan: &EnrichmentPlan,
        plan_spent: &Arc<AtomicU32>,
        deadline: Instant,
    ) -> Vec<ProviderResult> {
        let mut results = Vec::new();
        if probes.is_empty() {
            return results;
        }

        if !self.config.parallel_probes.enabled {
            for (step, provider) in probes {
                if Instant::now() >= deadline {
                    break;
                }
                if let Ok(Some(result)) = self
                    .call_provider(input, field, &step, provider, plan, plan_spent, deadline)
                    .await
                {
                    let acceptable = self.result_acceptable(&result);
                    results.push(result);
                    if acceptable && !self.config.ensemble_fusion.enabled {
                        break;
                    }
                }
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(
            self.config.parallel_probes.max_concurrent.max(1),
        ));
        let mut set = JoinSet::new();
        for (step, provider) in probes {
            let semaphore = Arc::clone(&semaphore);
            let this = self.clone_refs();
            let input = Arc::clone(input);
            let plan_budget = plan.budget_cents;
            let plan_spent = Arc::clone(plan_spent);
            set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                this.call_provider_owned(
                    &input,
                    field,
                    &step,
                    provider,
                    plan_budget,
                    &plan_spent,
                    deadline,
                )
                .await
                .ok()
                .flatten()
            });
        }

        while let Some(joined) = set.join_next().await {
            let Ok(Some(result)) = joined else { continue };
            let acceptable = self.result_acceptable(&result);
            results.push(result);
            // First good-enough probe wins unless fusion wants them all.
            if acceptable && !self.config.ensemble_fusion.enabled {
                set.abort_all();
                break;
            }
        }
        results
    }

    /// Sequential premium fallback, healthiest provider first, inside the
    /// premium share of the row budget.
    #[allow(clippy::too_many_arguments)]
    async fn run_premium(
        &self,
        input: &Arc<NormalizedInput>,
        field: Field,
        mut premium: Vec<(PlanStep, Arc<dyn Provider>)>,
        plan: &EnrichmentPlan,
        plan_spent: &Arc<AtomicU32>,
        deadline: Instant,
        results: &mut Vec<ProviderResult>,
    ) {
        if premium.is_empty() {
            return;
        }
        premium.sort_by(|a, b| {
            self.breakers
                .health_score(&b.0.provider)
                .partial_cmp(&self.breakers.health_score(&a.0.provider))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let partition = self.governor.allocate_row_budget(&input.row_id);
        let mut premium_spent: u32 = 0;

        for (step, provider) in premium {
            if Instant::now() >= deadline {
                break;
            }
            if premium_spent + step.max_cost_cents > partition.premium_cents {
                tracing::debug!(
                    row = %input.row_id,
                    provider = %step.provider,
                    "premium budget share exhausted"
                );
                continue;
            }
            match self
                .call_provider(input, field, &step, provider, plan, plan_spent, deadline)
                .await
            {
                Ok(Some(result)) => {
                    premium_spent += result.cost_cents;
                    let acceptable = self.result_acceptable(&result);
                    results.push(result);
                    if acceptable {
                        break;
                    }
                }
                Ok(None) => {}
                Err(_) => {}
            }
        }
    }

    async fn call_provider(
        &self,
        input: &Arc<NormalizedInput>,
        field: Field,
        step: &PlanStep,
        provider: Arc<dyn Provider>,
        plan: &EnrichmentPlan,
        plan_spent: &Arc<AtomicU32>,
        deadline: Instant,
    ) -> Result<Option<ProviderResult>> {
        self.call_provider_owned(
            input,
            field,
            step,
            provider,
            plan.budget_cents,
            plan_spent,
            deadline,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_provider_owned(
        &self,
        input: &NormalizedInput,
        field: Field,
        step: &PlanStep,
        provider: Arc<dyn Provider>,
        plan_budget_cents: u32,
        plan_spent: &Arc<AtomicU32>,
        deadline: Instant,
    ) -> Result<Option<ProviderResult>> {
        let name = step.provider.clone();
        let cost = provider.cost_cents();

        // Plan budget is optimistic: a step may start while any budget
        // remains, and the governor's caps bound the overrun.
        if cost > 0 && plan_spent.load(Ordering::SeqCst) >= plan_budget_cents {
            tracing::debug!(row = %input.row_id, provider = %name, "plan budget exhausted, skipping");
            return Ok(None);
        }
        // Governor before breaker: a denied call must not consume the
        // half-open probe slot.
        if !self.governor.can_afford(&name, cost, Some(&input.row_id)) {
            tracing::debug!(row = %input.row_id, provider = %name, "cost governor rejected call");
            return Ok(None);
        }
        let breaker = self.breakers.breaker(&name);
        if !breaker.is_available() {
            tracing::debug!(row = %input.row_id, provider = %name, "circuit open, skipping");
            return Ok(None);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let timeout = Duration::from_millis(self.config.parallel_probes.probe_timeout_ms)
            .min(remaining);

        let flight_key = format!("provider:{}:{}:{}", input.row_id, name, field);
        let governor = Arc::clone(&self.governor);
        let metrics = Arc::clone(&self.metrics);
        let row_id = input.row_id.clone();
        let table_id = input.table_id.clone();

        let outcome = self
            .calls
            .run(&flight_key, || async {
                metrics.record_provider_call();
                let started = Instant::now();
                let call = tokio::time::timeout(timeout, provider.enrich(input, field)).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                match call {
                    Err(_) => {
                        breaker.record_failure(latency_ms);
                        metrics.record_provider_error();
                        Err(Error::timeout(timeout.as_millis() as u64))
                    }
                    Ok(Err(e)) => {
                        if e.is_breaker_failure() {
                            breaker.record_failure(latency_ms);
                        }
                        metrics.record_provider_error();
                        Err(e)
                    }
                    Ok(Ok(None)) => {
                        // "Not found" is a healthy answer.
                        breaker.record_success(latency_ms);
                        Ok(None)
                    }
                    Ok(Ok(Some(result))) => {
                        breaker.record_success(latency_ms);
                        if result.cost_cents > 0 {
                            governor.record_cost(
                                &row_id,
                                &table_id,
                                &result.source,
                                field,
                                result.cost_cents,
                            );
                        }
                        Ok(Some(result))
                    }
                }
            })
            .await;

        match outcome {
            Ok(Some(result)) => {
                plan_spent.fetch_add(result.cost_cents, Ordering::SeqCst);
                Ok(Some(result))
            }
            // Keep the not-found marker as negative evidence.
            Ok(None) => Ok(Some(ProviderResult::not_found(field, &name))),
            Err(e) => {
                tracing::debug!(row = %input.row_id, provider = %name, error = %e, "provider call failed");
                Ok(None)
            }
        }
    }

    fn result_acceptable(&self, result: &ProviderResult) -> bool {
        result.has_value() && result.confidence >= self.config.confidence_threshold
    }

    /// Whether the evidence so far makes the premium fallback unnecessary.
    fn has_acceptable(&self, results: &[ProviderResult]) -> bool {
        if results.is_empty() {
            return false;
        }
        if self.config.ensemble_fusion.enabled {
            // Let the fusion math decide: aggregate what we have and compare
            // the winner against the global threshold.
            return aggregate::aggregate_with_threshold(
                results,
                self.config.ensemble_fusion.agreement_threshold,
            )
            .first()
            .map(|agg| agg.confidence >= self.config.confidence_threshold)
            .unwrap_or(false);
        }
        results.iter().any(|r| self.result_acceptable(r))
    }

    fn clone_refs(&self) -> Executor {
        Executor {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            breakers: Arc::clone(&self.breakers),
            governor: Arc::clone(&self.governor),
            metrics: Arc::clone(&self.metrics),
            cells: Arc::clone(&self.cells),
            calls: Arc::clone(&self.calls),
            config: Arc::clone(&self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::cost::GovernorConfig;
    use crate::planner::StepPriority;
    use crate::provider::mock::{MockBehavior, MockProvider};
    use crate::types::FieldValue;

    fn step(index: usize, provider: &str, field: Field, tier: ProviderTier, cost: u32) -> PlanStep {
        PlanStep {
            index,
            provider: provider.to_string(),
            field,
            tier,
            priority: StepPriority::Normal,
            kind: StepKind::Lookup,
            max_cost_cents: cost,
        }
    }

    fn plan(steps: Vec<PlanStep>, budget: u32) -> EnrichmentPlan {
        EnrichmentPlan {
            steps,
            budget_cents: budget,
            note: None,
        }
    }

    fn executor(registry: ProviderRegistry, config: EngineConfig) -> Executor {
        let governor = CostGovernor::new(GovernorConfig {
            total_budget_cents: config.total_budget_cents,
            row_budget_cents: config.max_cost_per_cell_cents,
            provider_caps: Default::default(),
        });
        Executor {
            registry: Arc::new(registry),
            cache: Arc::new(EnrichmentCache::new(config.cache.clone(), None)),
            breakers: Arc::new(BreakerRegistry::new(config.circuit_breaker.clone())),
            governor: Arc::new(governor),
            metrics: Arc::new(EngineMetrics::new(MetricsConfig::default())),
            cells: Arc::new(Singleflight::new(&config.singleflight)),
            calls: Arc::new(Singleflight::new(&config.singleflight)),
            config: Arc::new(config),
        }
    }

    fn input() -> Arc<NormalizedInput> {
        let mut input = NormalizedInput::new("t1", "r1");
        input.name = Some("Ada Lovelace".into());
        input.company = Some("Analytical Engines".into());
        Arc::new(input)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_first_acceptable_probe_skips_premium() {
        let cheap = Arc::new(MockProvider::new("serper", ProviderTier::Cheap, 1).with_field(
            Field::Company,
            FieldValue::text("Analytical Engines"),
            0.9,
        ));
        let premium = Arc::new(MockProvider::new("linkedin", ProviderTier::Premium, 10)
            .with_field(Field::Company, FieldValue::text("Analytical Engines"), 0.95));
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::clone(&cheap) as _)
            .register(Arc::clone(&premium) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![
                step(0, "serper", Field::Company, ProviderTier::Cheap, 1),
                step(1, "linkedin", Field::Company, ProviderTier::Premium, 10),
            ],
            20,
        );

        let evidence = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();

        assert!(evidence.iter().any(|r| r.source == "serper"));
        assert_eq!(premium.calls(), 0);
        assert_eq!(exec.governor.ledger().total_cents, 1);
    }

    #[tokio::test]
    async fn test_premium_fallback_runs_when_probes_come_up_short() {
        let cheap = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Company, FieldValue::text("?"), 0.2),
        );
        let premium = Arc::new(MockProvider::new("linkedin", ProviderTier::Premium, 10)
            .with_field(Field::Company, FieldValue::text("Analytical Engines"), 0.95));
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::clone(&cheap) as _)
            .register(Arc::clone(&premium) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![
                step(0, "serper", Field::Company, ProviderTier::Cheap, 1),
                step(1, "linkedin", Field::Company, ProviderTier::Premium, 10),
            ],
            30,
        );

        let evidence = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();

        assert_eq!(premium.calls(), 1);
        assert!(evidence
            .iter()
            .any(|r| r.source == "linkedin" && r.confidence >= 0.9));
    }

    #[tokio::test]
    async fn test_cache_idempotence_second_run_makes_no_calls() {
        let cheap = Arc::new(MockProvider::new("serper", ProviderTier::Cheap, 1).with_field(
            Field::Company,
            FieldValue::text("Analytical Engines"),
            0.9,
        ));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&cheap) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![step(0, "serper", Field::Company, ProviderTier::Cheap, 1)],
            10,
        );

        let first = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();
        assert_eq!(cheap.calls(), 1);

        let second = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();
        // Second run is served from cache: no new provider invocations.
        assert_eq!(cheap.calls(), 1);
        assert_eq!(second[0].source, "cache");
        assert_eq!(
            second[0].value.as_ref().unwrap().as_text(),
            first[0].value.as_ref().unwrap().as_text()
        );
    }

    #[tokio::test]
    async fn test_negative_cache_after_full_miss() {
        let missing = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Email, FieldValue::text(""), 0.0)
                .with_behavior(MockBehavior::NotFound),
        );
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&missing) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![step(0, "serper", Field::Email, ProviderTier::Cheap, 1)],
            10,
        );

        let first = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();
        assert!(first.iter().all(|r| !r.has_value()));
        assert_eq!(missing.calls(), 1);

        // Negative entry short-circuits the second run entirely.
        let second = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(missing.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider_without_calls() {
        let flaky = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1)
                .with_field(Field::Company, FieldValue::text("x"), 0.9)
                .with_behavior(MockBehavior::Fail("HTTP 503".into())),
        );
        let backup = Arc::new(MockProvider::new("opencorporates", ProviderTier::Cheap, 2)
            .with_field(Field::Company, FieldValue::text("Analytical Engines"), 0.85));
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::clone(&flaky) as _)
            .register(Arc::clone(&backup) as _);

        let mut config = EngineConfig::mock();
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.minimum_requests = 2;
        config.circuit_breaker.reset_timeout_ms = 60_000;
        config.cache.enabled = false;
        // Sequential probes keep the failure ordering deterministic.
        config.parallel_probes.enabled = false;
        let exec = executor(registry, config);

        let steps = vec![
            step(0, "serper", Field::Company, ProviderTier::Cheap, 1),
            step(1, "opencorporates", Field::Company, ProviderTier::Cheap, 2),
        ];
        let plan = plan(steps, 30);

        // Trip the breaker with repeated failures.
        for _ in 0..3 {
            let _ = exec
                .execute(&plan, &input(), TierGate::All, false, deadline())
                .await
                .unwrap();
        }
        let calls_after_trip = flaky.calls();
        assert!(calls_after_trip >= 2);

        // Breaker now open: serper is skipped, the alternative still runs.
        let evidence = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();
        assert_eq!(flaky.calls(), calls_after_trip);
        assert!(evidence.iter().any(|r| r.source == "opencorporates"));
    }

    #[tokio::test]
    async fn test_plan_budget_is_optimistic_and_bounded() {
        let providers: Vec<(&str, u32)> = vec![("p_one", 1), ("p_two", 3), ("p_three", 1)];
        let mut registry = ProviderRegistry::new();
        let mut mocks = Vec::new();
        for (name, cost) in &providers {
            let mock = Arc::new(
                MockProvider::new(*name, ProviderTier::Cheap, *cost)
                    // Low confidence keeps the waterfall walking.
                    .with_field(Field::Company, FieldValue::text(format!("v-{name}")), 0.3),
            );
            registry.register(Arc::clone(&mock) as _);
            mocks.push(mock);
        }

        let mut config = EngineConfig::mock();
        config.parallel_probes.enabled = false;
        config.cache.enabled = false;
        let exec = executor(registry, config);

        let plan = plan(
            vec![
                step(0, "p_one", Field::Company, ProviderTier::Cheap, 1),
                step(1, "p_two", Field::Company, ProviderTier::Cheap, 3),
                step(2, "p_three", Field::Company, ProviderTier::Cheap, 1),
            ],
            3,
        );

        let _ = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap();

        // Steps one and two run (spend 1 then 3); step three sees the plan
        // budget gone and is skipped.
        assert_eq!(mocks[0].calls(), 1);
        assert_eq!(mocks[1].calls(), 1);
        assert_eq!(mocks[2].calls(), 0);
        assert_eq!(exec.governor.ledger().total_cents, 4);
    }

    #[tokio::test]
    async fn test_concurrent_rows_coalesce_into_one_call() {
        let slow = Arc::new(
            MockProvider::new("serper", ProviderTier::Cheap, 1).with_responder(
                &[Field::Company],
                |_input, field| {
                    Some(ProviderResult::new(
                        field,
                        FieldValue::text("Analytical Engines"),
                        0.9,
                        "serper",
                    ))
                },
            ),
        );
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&slow) as _);

        let exec = Arc::new(executor(registry, EngineConfig::mock()));
        let plan = Arc::new(plan(
            vec![step(0, "serper", Field::Company, ProviderTier::Cheap, 1)],
            10,
        ));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let exec = Arc::clone(&exec);
            let plan = Arc::clone(&plan);
            let input = input();
            handles.push(tokio::spawn(async move {
                exec.execute(&plan, &input, TierGate::All, false, deadline())
                    .await
            }));
        }
        for handle in handles {
            let evidence = handle.await.unwrap().unwrap();
            assert_eq!(
                evidence[0].value.as_ref().unwrap().as_text(),
                Some("Analytical Engines")
            );
        }

        // Cell-level singleflight plus the cache mean one underlying call
        // and one recorded charge.
        assert!(slow.calls() <= 1, "expected 1 call, saw {}", slow.calls());
        assert_eq!(exec.governor.ledger().total_cents, 1);
    }

    #[tokio::test]
    async fn test_premium_only_gate_ignores_cheap_steps() {
        let cheap = Arc::new(MockProvider::new("serper", ProviderTier::Cheap, 1).with_field(
            Field::Title,
            FieldValue::text("Engineer"),
            0.9,
        ));
        let premium = Arc::new(MockProvider::new("linkedin", ProviderTier::Premium, 10)
            .with_field(Field::Title, FieldValue::text("Director"), 0.95));
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::clone(&cheap) as _)
            .register(Arc::clone(&premium) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![
                step(0, "serper", Field::Title, ProviderTier::Cheap, 1),
                step(1, "linkedin", Field::Title, ProviderTier::Premium, 10),
            ],
            20,
        );

        let evidence = exec
            .execute(&plan, &input(), TierGate::PremiumOnly, false, deadline())
            .await
            .unwrap();
        assert_eq!(cheap.calls(), 0);
        assert_eq!(premium.calls(), 1);
        assert_eq!(evidence[0].source, "linkedin");
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_partial_evidence() {
        let cheap = Arc::new(MockProvider::new("serper", ProviderTier::Cheap, 1).with_field(
            Field::Company,
            FieldValue::text("x"),
            0.9,
        ));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&cheap) as _);

        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![step(0, "serper", Field::Company, ProviderTier::Cheap, 1)],
            10,
        );

        let expired = Instant::now() - Duration::from_millis(1);
        let evidence = exec
            .execute(&plan, &input(), TierGate::All, false, expired)
            .await
            .unwrap();
        assert!(evidence.is_empty());
        assert_eq!(cheap.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_in_plan_is_fatal() {
        let registry = ProviderRegistry::new();
        let exec = executor(registry, EngineConfig::mock());
        let plan = plan(
            vec![step(0, "ghost", Field::Company, ProviderTier::Cheap, 1)],
            10,
        );
        let err = exec
            .execute(&plan, &input(), TierGate::All, false, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound(_)));
    }
}
