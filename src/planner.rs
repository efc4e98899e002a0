//! Plan generation.
//!
//! A pure function over the input, the requested fields, and the registry:
//! no I/O, no provider calls. The plan is an ordered list of lookup steps
//! (dependency order first, static priority second, tier order within a
//! field) plus trailing synthesis steps when the budget and fact sources
//! allow them. The sum of step cost caps never exceeds the plan budget.

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerRegistry;
use crate::identity::EntityIdentity;
use crate::provider::ProviderRegistry;
use crate::types::{Field, NormalizedInput, ProviderTier};

/// Cost of one synthesis step, in cents.
const SYNTHESIS_COST_CENTS: u32 = 1;

/// Step priority, used by the executor for intra-field ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPriority {
    High,
    Normal,
    Low,
}

/// Lookup steps call providers; synthesis steps drive the text generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Lookup,
    Synthesis,
}

/// One planned step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub provider: String,
    pub field: Field,
    pub tier: ProviderTier,
    pub priority: StepPriority,
    pub kind: StepKind,
    /// Cap for this step; matches the provider's per-call cost.
    pub max_cost_cents: u32,
}

/// Ordered enrichment plan for one row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentPlan {
    pub steps: Vec<PlanStep>,
    pub budget_cents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl EnrichmentPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of step cost caps.
    pub fn total_cost_cents(&self) -> u32 {
        self.steps.iter().map(|s| s.max_cost_cents).sum()
    }

    /// Distinct fields with lookup steps, in plan order.
    pub fn lookup_fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        for step in self.steps.iter().filter(|s| s.kind == StepKind::Lookup) {
            if !fields.contains(&step.field) {
                fields.push(step.field);
            }
        }
        fields
    }

    /// Lookup steps for one field, in plan order.
    pub fn lookup_steps_for(&self, field: Field) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Lookup && s.field == field)
            .collect()
    }

    pub fn synthesis_fields(&self) -> Vec<Field> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Synthesis)
            .map(|s| s.field)
            .collect()
    }
}

/// Static priority table; lower runs earlier.
fn field_priority(field: Field) -> u8 {
    match field {
        Field::Name | Field::Company => 1,
        Field::Domain | Field::Website | Field::Title => 2,
        Field::Email | Field::LinkedinUrl => 3,
        Field::EmailCandidates | Field::Location => 4,
        Field::Industry | Field::SocialLinks => 5,
        Field::ShortBio | Field::CompanySummary => 6,
        Field::Whois => 7,
    }
}

/// Explicit dependencies: a field and the fields it derives from.
fn field_dependencies(field: Field) -> &'static [Field] {
    match field {
        Field::EmailCandidates => &[Field::Name, Field::Company],
        Field::ShortBio => &[Field::Name, Field::Title],
        Field::CompanySummary => &[Field::Company],
        _ => &[],
    }
}

/// Plan generator.
#[derive(Debug, Default, Clone)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Build a plan for the missing fields under `budget_cents`.
    pub fn plan(
        &self,
        input: &NormalizedInput,
        identity: &EntityIdentity,
        fields_to_enrich: &[Field],
        budget_cents: u32,
        registry: &ProviderRegistry,
        breakers: &BreakerRegistry,
    ) -> EnrichmentPlan {
        let missing = order_fields(
            fields_to_enrich
                .iter()
                .copied()
                .filter(|f| !input.has_field(*f))
                .collect(),
        );
        if missing.is_empty() {
            return EnrichmentPlan {
                steps: Vec::new(),
                budget_cents,
                note: Some("all requested fields already present".to_string()),
            };
        }

        let mut steps: Vec<PlanStep> = Vec::new();
        let mut committed_cents: u32 = 0;

        for field in &missing {
            if field.is_synthesized() {
                continue; // handled after lookups
            }

            let mut candidates = registry.by_field_tier_ordered(*field);
            // Equal (tier, cost) candidates break ties on breaker health.
            candidates.sort_by(|a, b| {
                (a.tier(), a.cost_cents())
                    .cmp(&(b.tier(), b.cost_cents()))
                    .then_with(|| {
                        breakers
                            .health_score(b.name())
                            .partial_cmp(&breakers.health_score(a.name()))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            });

            // A known profile URL makes the LinkedIn provider the best first
            // call for anything it covers.
            let prefer_linkedin = input.linkedin_url.is_some()
                && candidates.iter().any(|p| p.name() == "linkedin");
            if prefer_linkedin {
                let position = candidates
                    .iter()
                    .position(|p| p.name() == "linkedin")
                    .unwrap_or(0);
                let linkedin = candidates.remove(position);
                candidates.insert(0, linkedin);
            }

            for provider in candidates {
                let cost = provider.cost_cents();
                if cost > 0 && committed_cents + cost > budget_cents {
                    continue;
                }
                let duplicate = steps
                    .iter()
                    .any(|s| s.field == *field && s.provider == provider.name());
                if duplicate {
                    continue;
                }
                let priority = if prefer_linkedin && provider.name() == "linkedin" {
                    StepPriority::High
                } else if provider.tier() == ProviderTier::Premium {
                    StepPriority::Low
                } else {
                    StepPriority::Normal
                };
                committed_cents += cost;
                steps.push(PlanStep {
                    index: steps.len(),
                    provider: provider.name().to_string(),
                    field: *field,
                    tier: provider.tier(),
                    priority,
                    kind: StepKind::Lookup,
                    max_cost_cents: cost,
                });
            }
        }

        // Synthesis steps go last, and only when the plan gathered the facts
        // they fuse over and the budget still covers generation.
        let has_fact_sources = steps.iter().any(|s| {
            matches!(s.field, Field::Name | Field::Title | Field::Company)
        }) || input.name.is_some()
            || input.company.is_some();
        for field in &missing {
            if !field.is_synthesized() {
                continue;
            }
            if has_fact_sources && committed_cents + SYNTHESIS_COST_CENTS <= budget_cents {
                committed_cents += SYNTHESIS_COST_CENTS;
                steps.push(PlanStep {
                    index: steps.len(),
                    provider: "llm".to_string(),
                    field: *field,
                    tier: ProviderTier::Cheap,
                    priority: StepPriority::Low,
                    kind: StepKind::Synthesis,
                    max_cost_cents: SYNTHESIS_COST_CENTS,
                });
            }
        }

        tracing::debug!(
            row = %input.row_id,
            steps = steps.len(),
            committed_cents,
            budget_cents,
            strategy = ?identity.strategy,
            "plan generated"
        );

        EnrichmentPlan {
            steps,
            budget_cents,
            note: None,
        }
    }
}

/// Topological-ish ordering: dependencies first, then static priority.
fn order_fields(mut fields: Vec<Field>) -> Vec<Field> {
    fields.sort_by_key(|f| field_priority(*f));
    fields.dedup();

    // Pull any in-plan dependency ahead of its dependent. One pass per
    // dependency edge is enough for the shallow dependency table.
    let mut ordered: Vec<Field> = Vec::with_capacity(fields.len());
    for field in fields {
        let insert_at = ordered
            .iter()
            .position(|existing| field_dependencies(*existing).contains(&field))
            .unwrap_or(ordered.len());
        ordered.insert(insert_at, field);
    }
    ordered
}
