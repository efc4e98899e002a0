//! Provider registry: ordered list with by-name, by-field, and by-tier
//! lookup. Assembled once at engine construction; read-only afterwards.

use std::sync::Arc;

use super::{Provider, ProviderCapability};
use crate::error::{Error, Result};
use crate::types::{Field, ProviderTier};

/// Ordered collection of providers.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Registration order is preserved and used as the
    /// stable tie-break everywhere.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn all(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    /// Providers able to enrich `field`, in registration order.
    pub fn by_field(&self, field: Field) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.can_enrich(field))
            .cloned()
            .collect()
    }

    pub fn by_tier(&self, tier: ProviderTier) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.tier() == tier)
            .cloned()
            .collect()
    }

    /// Providers for `field`, cheapest tier first.
    pub fn by_field_tier_ordered(&self, field: Field) -> Vec<Arc<dyn Provider>> {
        let mut providers = self.by_field(field);
        providers.sort_by_key(|p| (p.tier(), p.cost_cents()));
        providers
    }

    pub fn capabilities(&self) -> Vec<ProviderCapability> {
        self.providers
            .iter()
            .map(|p| ProviderCapability::of(p.as_ref()))
            .collect()
    }
}
