//! The smart-enrichment engine exposed through the standard provider
//! contract, so the planner and executor treat discovery like any other
//! data source.

use async_trait::async_trait;
use std::sync::Arc;

use super::{PageFetcher, SerpClient, SmartDecision, SmartEnrichmentEngine};
use crate::error::Result;
use crate::provider::{finalize_result, Provider};
use crate::types::{Field, FieldValue, NormalizedInput, ProviderResult, ProviderTier};

pub struct SmartEnrichmentProvider {
    engine: SmartEnrichmentEngine,
}

impl SmartEnrichmentProvider {
    pub fn new(serp: Arc<dyn SerpClient>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            engine: SmartEnrichmentEngine::new(serp, fetcher),
        }
    }

    fn company_query(input: &NormalizedInput) -> Option<String> {
        if let Some(company) = &input.company {
            return Some(company.clone());
        }
        // Fall back to the domain's base label for domain-only rows.
        input
            .domain
            .as_deref()
            .and_then(|d| d.split('.').next())
            .filter(|base| !base.is_empty())
            .map(str::to_string)
    }

    fn result_for(decision: &SmartDecision, field: Field) -> Option<ProviderResult> {
        let (value, confidence) = match field {
            Field::Website => (FieldValue::text(decision.url.clone()), decision.confidence),
            Field::Domain => (FieldValue::text(decision.domain.clone()), decision.confidence),
            Field::Industry => (
                FieldValue::text(decision.industry_hint.clone()?),
                decision.confidence * 0.9,
            ),
            Field::Company => {
                let base = decision.domain.split('.').next()?;
                let mut chars = base.chars();
                let company = match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => return None,
                };
                (FieldValue::text(company), decision.confidence * 0.8)
            }
            Field::CompanySummary => (
                FieldValue::text(decision.summary.clone()?),
                decision.confidence.min(0.6),
            ),
            _ => return None,
        };
        Some(
            ProviderResult::new(field, value, confidence, "smart_enrichment")
                .with_verified(decision.verified)
                .with_raw(serde_json::json!({
                    "domain": decision.domain,
                    "verified": decision.verified,
                })),
        )
    }
}

#[async_trait]
impl Provider for SmartEnrichmentProvider {
    fn name(&self) -> &str {
        "smart_enrichment"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Cheap
    }

    fn cost_cents(&self) -> u32 {
        2
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(
            field,
            Field::Domain
                | Field::Website
                | Field::Industry
                | Field::Company
                | Field::CompanySummary
        )
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(company) = Self::company_query(input) else {
            return Ok(None);
        };
        let Some(decision) = self.engine.discover(&company).await? else {
            return Ok(None);
        };
        Ok(Self::result_for(&decision, field).map(|r| finalize_result(r, self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart::{FetchedPage, SerpHit};

    struct OneShotSerp(Vec<SerpHit>);

    #[async_trait]
    impl SerpClient for OneShotSerp {
        async fn search(&self, _query: &str) -> Result<Vec<SerpHit>> {
            Ok(self.0.clone())
        }
    }

    struct TitledFetcher(&'static str);

    #[async_trait]
    impl PageFetcher for TitledFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<FetchedPage>> {
            Ok(Some(FetchedPage {
                title: Some(self.0.to_string()),
                body_excerpt: "software platform".into(),
            }))
        }
    }

    fn provider() -> SmartEnrichmentProvider {
        let serp = OneShotSerp(vec![SerpHit {
            title: "Reddit - Dive into anything".into(),
            link: "https://www.reddit.com/".into(),
            snippet: "Reddit is a network of communities.".into(),
            position: 1,
        }]);
        SmartEnrichmentProvider::new(Arc::new(serp), Arc::new(TitledFetcher("Reddit")))
    }

    #[tokio::test]
    async fn test_website_discovery_through_provider_contract() {
        let provider = provider();
        let mut input = NormalizedInput::new("t1", "r1");
        input.company = Some("Reddit".into());

        let result = provider
            .enrich(&input, Field::Website)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.source, "smart_enrichment");
        assert_eq!(result.cost_cents, 2);
        assert_eq!(result.value.unwrap().as_text(), Some("https://reddit.com/"));
        assert!(result.confidence >= 0.8);
        assert!(result.verified);
    }

    #[tokio::test]
    async fn test_no_company_no_domain_is_not_found() {
        let provider = provider();
        let input = NormalizedInput::new("t1", "r1");
        assert!(provider
            .enrich(&input, Field::Website)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_industry_from_hint() {
        let provider = provider();
        let mut input = NormalizedInput::new("t1", "r1");
        input.company = Some("Reddit".into());

        let result = provider
            .enrich(&input, Field::Industry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.value.unwrap().as_text(), Some("software"));
    }
}
