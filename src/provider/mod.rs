//! Provider contract and registry.
//!
//! Every data source, mock or real, implements the same [`Provider`] trait;
//! the planner and executor never know which kind they are talking to.

mod registry;

pub mod drivers;
pub mod mock;

pub use registry::ProviderRegistry;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::types::{Field, NormalizedInput, ProviderResult, ProviderTier};

/// Uniform contract for enrichment data sources.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name; doubles as the provenance source label.
    fn name(&self) -> &str;

    fn tier(&self) -> ProviderTier;

    /// Cost of one call, in cents. Must match the tier.
    fn cost_cents(&self) -> u32;

    fn can_enrich(&self, field: Field) -> bool;

    /// Enrich one field. `Ok(None)` means "valid query, nothing found" and
    /// is not an error; transport and API failures are `Err`.
    async fn enrich(&self, input: &NormalizedInput, field: Field)
        -> Result<Option<ProviderResult>>;
}

/// Stamp a result with its provider's source, cost, and a fresh timestamp.
///
/// Drivers build bare results; this keeps the bookkeeping in one place.
pub fn finalize_result(mut result: ProviderResult, provider: &dyn Provider) -> ProviderResult {
    result.source = provider.name().to_string();
    result.cost_cents = provider.cost_cents();
    result.timestamp = Utc::now();
    result
}

/// Capability summary used in planner lookups and logs.
#[derive(Debug, Clone)]
pub struct ProviderCapability {
    pub name: String,
    pub tier: ProviderTier,
    pub cost_cents: u32,
    pub fields: Vec<Field>,
}

impl ProviderCapability {
    pub fn of(provider: &dyn Provider) -> Self {
        Self {
            name: provider.name().to_string(),
            tier: provider.tier(),
            cost_cents: provider.cost_cents(),
            fields: Field::ALL
                .iter()
                .copied()
                .filter(|f| provider.can_enrich(*f))
                .collect(),
        }
    }
}
