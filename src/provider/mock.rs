//! Deterministic mock providers.
//!
//! Used by tests and by deployments running with `use_mock_providers`. The
//! mocks honor the exact `Provider` contract, including "not found" versus
//! error semantics, and count their invocations so tests can assert on call
//! volume.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{finalize_result, Provider};
use crate::error::{Error, Result};
use crate::types::{Field, FieldValue, NormalizedInput, ProviderResult, ProviderTier};

type Responder =
    Arc<dyn Fn(&NormalizedInput, Field) -> Option<ProviderResult> + Send + Sync + 'static>;

/// How a mock behaves on every call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Normal,
    /// Always errors with a server-style failure.
    Fail(String),
    /// Always errors with a quota-style failure.
    RateLimited,
    /// Always answers "valid query, nothing found".
    NotFound,
}

/// Configurable mock provider.
pub struct MockProvider {
    name: String,
    tier: ProviderTier,
    cost_cents: u32,
    responses: HashMap<Field, (FieldValue, f64)>,
    responder: Option<Responder>,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, tier: ProviderTier, cost_cents: u32) -> Self {
        Self {
            name: name.into(),
            tier,
            cost_cents,
            responses: HashMap::new(),
            responder: None,
            behavior: MockBehavior::Normal,
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a canned response for a field.
    pub fn with_field(mut self, field: Field, value: FieldValue, confidence: f64) -> Self {
        self.responses.insert(field, (value, confidence));
        self
    }

    /// Derive responses from the input instead of canned values.
    pub fn with_responder<F>(mut self, fields: &[Field], responder: F) -> Self
    where
        F: Fn(&NormalizedInput, Field) -> Option<ProviderResult> + Send + Sync + 'static,
    {
        for field in fields {
            self.responses
                .entry(*field)
                .or_insert((FieldValue::text(""), 0.0));
        }
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Number of `enrich` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> ProviderTier {
        self.tier
    }

    fn cost_cents(&self) -> u32 {
        self.cost_cents
    }

    fn can_enrich(&self, field: Field) -> bool {
        self.responses.contains_key(&field)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Fail(message) => {
                return Err(Error::provider(&self.name, message.clone()))
            }
            MockBehavior::RateLimited => {
                return Err(Error::rate_limited(&self.name, "HTTP 429 too many requests"))
            }
            MockBehavior::NotFound => return Ok(None),
            MockBehavior::Normal => {}
        }

        if let Some(responder) = &self.responder {
            return Ok(responder(input, field).map(|r| finalize_result(r, self)));
        }

        Ok(self.responses.get(&field).map(|(value, confidence)| {
            finalize_result(
                ProviderResult::new(field, value.clone(), *confidence, &self.name),
                self,
            )
        }))
    }
}

fn slugify(s: &str) -> String {
    s.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '.' })
        .collect::<String>()
        .split('.')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

fn title_case(s: &str) -> String {
    s.split(['.', '-', '_', ' '])
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The standard mock suite mirroring the real driver set.
///
/// Responses are pure functions of the input, so repeated runs produce
/// identical evidence.
pub fn standard_mock_set() -> Vec<Arc<dyn Provider>> {
    let linkedin = MockProvider::new("linkedin", ProviderTier::Premium, 10).with_responder(
        &[
            Field::Name,
            Field::Title,
            Field::Company,
            Field::Location,
            Field::SocialLinks,
        ],
        |input, field| {
            // A profile URL is a direct handle; name+company is a lookup.
            let (slug, confidence) = match (&input.linkedin_url, &input.name) {
                (Some(url), _) => (url.rsplit('/').next().unwrap_or("profile").to_string(), 0.95),
                (None, Some(name)) if input.company.is_some() => (slugify(name), 0.85),
                _ => return None,
            };
            let value = match field {
                Field::Name => FieldValue::text(title_case(&slug)),
                Field::Title => FieldValue::text("Director of Engineering"),
                Field::Company => FieldValue::text(
                    input
                        .company
                        .clone()
                        .unwrap_or_else(|| title_case(&slug) + " Ventures"),
                ),
                Field::Location => FieldValue::text("San Francisco, CA"),
                Field::SocialLinks => {
                    FieldValue::list(vec![format!("https://linkedin.com/in/{slug}")])
                }
                _ => return None,
            };
            Some(ProviderResult::new(field, value, confidence, "linkedin"))
        },
    );

    let hunter = MockProvider::new("hunter", ProviderTier::Cheap, 2).with_responder(
        &[Field::Email, Field::EmailCandidates],
        |input, field| {
            let domain = input.domain.as_deref()?;
            let name = input.name.as_deref()?;
            let slug = slugify(name);
            let email = format!("{slug}@{domain}");
            let value = match field {
                Field::Email => FieldValue::text(email),
                Field::EmailCandidates => FieldValue::list(vec![
                    email.clone(),
                    format!("{}@{domain}", slug.replace('.', "")),
                ]),
                _ => return None,
            };
            Some(ProviderResult::new(field, value, 0.9, "hunter"))
        },
    );

    let serper = MockProvider::new("serper", ProviderTier::Cheap, 1).with_responder(
        &[
            Field::Company,
            Field::Title,
            Field::Website,
            Field::Industry,
            Field::Location,
        ],
        |input, field| {
            let subject = input
                .company
                .as_deref()
                .or(input.name.as_deref())
                .or(input.domain.as_deref())?;
            let value = match field {
                Field::Company => FieldValue::text(title_case(&slugify(subject))),
                Field::Title => FieldValue::text("Engineering Lead"),
                Field::Website => {
                    FieldValue::text(format!("https://{}.com/", slugify(subject).replace('.', "")))
                }
                Field::Industry => FieldValue::text("Software"),
                Field::Location => FieldValue::text("Remote"),
                _ => return None,
            };
            Some(ProviderResult::new(field, value, 0.7, "serper"))
        },
    );

    let github = MockProvider::new("github", ProviderTier::Free, 0).with_responder(
        &[Field::SocialLinks, Field::Name],
        |input, field| {
            let name = input.name.as_deref()?;
            let slug = slugify(name).replace('.', "-");
            let value = match field {
                Field::SocialLinks => FieldValue::list(vec![format!("https://github.com/{slug}")]),
                Field::Name => FieldValue::text(title_case(name)),
                _ => return None,
            };
            Some(ProviderResult::new(field, value, 0.75, "github"))
        },
    );

    let whois = MockProvider::new("whois", ProviderTier::Free, 0).with_responder(
        &[Field::Whois, Field::Company],
        |input, field| {
            let domain = input.domain.as_deref()?;
            let value = match field {
                Field::Whois => FieldValue::text(format!("registrant: {domain} operations")),
                Field::Company => {
                    FieldValue::text(title_case(domain.split('.').next().unwrap_or(domain)))
                }
                _ => return None,
            };
            Some(ProviderResult::new(field, value, 0.8, "whois"))
        },
    );

    let opencorporates = MockProvider::new("opencorporates", ProviderTier::Cheap, 2)
        .with_responder(
            &[Field::Company, Field::Industry, Field::Location],
            |input, field| {
                let company = input.company.as_deref().or(input.domain.as_deref())?;
                let base = title_case(company.split('.').next().unwrap_or(company));
                let value = match field {
                    Field::Company => FieldValue::text(base),
                    Field::Industry => FieldValue::text("Software"),
                    Field::Location => FieldValue::text("Delaware, US"),
                    _ => return None,
                };
                Some(ProviderResult::new(field, value, 0.85, "opencorporates"))
            },
        );

    let pattern = MockProvider::new("pattern_inference", ProviderTier::Free, 0).with_responder(
        &[Field::EmailCandidates],
        |input, field| {
            let domain = input.domain.as_deref()?;
            let name = input.name.as_deref()?;
            let mut parts = name.split_whitespace();
            let first = parts.next()?.to_ascii_lowercase();
            let last = parts.last().map(str::to_ascii_lowercase);
            let mut candidates = vec![format!("{first}@{domain}")];
            if let Some(last) = last {
                candidates.insert(0, format!("{first}.{last}@{domain}"));
                candidates.push(format!(
                    "{}{last}@{domain}",
                    first.chars().next().unwrap_or('x')
                ));
            }
            Some(ProviderResult::new(
                field,
                FieldValue::list(candidates),
                0.3,
                "pattern_inference",
            ))
        },
    );

    vec![
        Arc::new(github),
        Arc::new(whois),
        Arc::new(pattern),
        Arc::new(serper),
        Arc::new(hunter),
        Arc::new(opencorporates),
        Arc::new(linkedin),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> NormalizedInput {
        let mut input = NormalizedInput::new("t1", "r1");
        input.name = Some("Ada Lovelace".into());
        input.domain = Some("example.com".into());
        input.company = Some("Example".into());
        input
    }

    #[tokio::test]
    async fn test_canned_mock_counts_calls() {
        let mock = MockProvider::new("serper", ProviderTier::Cheap, 1).with_field(
            Field::Company,
            FieldValue::text("Reddit"),
            0.7,
        );
        assert!(mock.can_enrich(Field::Company));
        assert!(!mock.can_enrich(Field::Email));

        let result = mock.enrich(&input(), Field::Company).await.unwrap().unwrap();
        assert_eq!(result.source, "serper");
        assert_eq!(result.cost_cents, 1);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_behaviors() {
        let failing = MockProvider::new("x", ProviderTier::Free, 0)
            .with_field(Field::Name, FieldValue::text("A"), 0.5)
            .with_behavior(MockBehavior::Fail("HTTP 500".into()));
        assert!(failing.enrich(&input(), Field::Name).await.is_err());

        let limited = MockProvider::new("x", ProviderTier::Free, 0)
            .with_field(Field::Name, FieldValue::text("A"), 0.5)
            .with_behavior(MockBehavior::RateLimited);
        assert!(limited
            .enrich(&input(), Field::Name)
            .await
            .unwrap_err()
            .is_quota());

        let missing = MockProvider::new("x", ProviderTier::Free, 0)
            .with_field(Field::Name, FieldValue::text("A"), 0.5)
            .with_behavior(MockBehavior::NotFound);
        assert!(missing.enrich(&input(), Field::Name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_standard_set_is_deterministic() {
        let set = standard_mock_set();
        let hunter = set.iter().find(|p| p.name() == "hunter").unwrap();

        let a = hunter.enrich(&input(), Field::Email).await.unwrap().unwrap();
        let b = hunter.enrich(&input(), Field::Email).await.unwrap().unwrap();
        assert_eq!(a.value, b.value);
        assert_eq!(
            a.value.unwrap().as_text(),
            Some("ada.lovelace@example.com")
        );
    }

    #[tokio::test]
    async fn test_linkedin_mock_prefers_profile_url() {
        let set = standard_mock_set();
        let linkedin = set.iter().find(|p| p.name() == "linkedin").unwrap();

        let mut with_url = input();
        with_url.linkedin_url = Some("https://linkedin.com/in/ada-lovelace".into());
        let result = linkedin
            .enrich(&with_url, Field::Name)
            .await
            .unwrap()
            .unwrap();
        assert!(result.confidence >= 0.95);

        let mut bare = NormalizedInput::new("t1", "r2");
        bare.domain = Some("example.com".into());
        assert!(linkedin.enrich(&bare, Field::Name).await.unwrap().is_none());
    }
}
