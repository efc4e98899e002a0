//! Real provider drivers.
//!
//! Each driver wraps one upstream HTTP API behind the [`Provider`] contract.
//! API keys come from `<PROVIDER>_API_KEY` (comma-separated pools) routed
//! through an [`ApiKeyManager`]; quota-style responses surface as
//! [`Error::RateLimited`] so the manager rotates keys instead of tripping
//! the breaker's failure path for a healthy upstream.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{finalize_result, Provider};
use crate::error::{Error, Result};
use crate::keys::ApiKeyManager;
use crate::smart::{SerpClient, SerpHit};
use crate::store::KeyValueStore;
use crate::types::{Field, FieldValue, NormalizedInput, ProviderResult, ProviderTier};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success HTTP status to the right error class.
fn status_error(provider: &str, status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        429 | 403 | 503 => Error::rate_limited(provider, format!("HTTP {status}: {body}")),
        _ => Error::provider(provider, format!("HTTP {status}: {body}")),
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::provider(provider, format!("failed to read response: {e}")))?;
    if !status.is_success() {
        return Err(status_error(provider, status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| Error::provider(provider, format!("failed to parse response: {e}")))
}

// ---------------------------------------------------------------------------
// Serper (SERP search)
// ---------------------------------------------------------------------------

/// Serper.dev search driver. Cheap tier; also serves as the SERP backend for
/// the smart-enrichment sub-engine.
pub struct SerperDriver {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    position: u32,
}

impl SerperDriver {
    const DEFAULT_BASE_URL: &'static str = "https://google.serper.dev";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("serper", store)),
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub async fn raw_search(&self, query: &str) -> Result<Vec<SerpHit>> {
        let response: SerperResponse = self
            .keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!("{}/search", self.base_url);
                let body = serde_json::json!({ "q": query });
                async move {
                    let response = http
                        .post(&url)
                        .header("X-API-KEY", key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| Error::provider("serper", format!("request failed: {e}")))?;
                    read_json("serper", response).await
                }
            })
            .await?;

        Ok(response
            .organic
            .into_iter()
            .map(|o| SerpHit {
                title: o.title,
                link: o.link,
                snippet: o.snippet,
                position: o.position,
            })
            .collect())
    }
}

#[async_trait]
impl SerpClient for SerperDriver {
    async fn search(&self, query: &str) -> Result<Vec<SerpHit>> {
        self.raw_search(query).await
    }
}

#[async_trait]
impl Provider for SerperDriver {
    fn name(&self) -> &str {
        "serper"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Cheap
    }

    fn cost_cents(&self) -> u32 {
        1
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(
            field,
            Field::Company | Field::Title | Field::Location | Field::Industry
        )
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(query) = serp_query(input, field) else {
            return Ok(None);
        };
        let hits = self.raw_search(&query).await?;
        Ok(extract_from_serp(&hits, field)
            .map(|(value, confidence)| {
                ProviderResult::new(field, value, confidence, "serper").with_raw(
                    serde_json::json!({ "query": query, "hits": hits.len() }),
                )
            })
            .map(|r| finalize_result(r, self)))
    }
}

fn serp_query(input: &NormalizedInput, field: Field) -> Option<String> {
    let subject = match (&input.name, &input.company, &input.domain) {
        (Some(name), Some(company), _) => format!("{name} {company}"),
        (Some(name), None, Some(domain)) => format!("{name} {domain}"),
        (Some(name), None, None) => name.clone(),
        (None, Some(company), _) => company.clone(),
        (None, None, Some(domain)) => domain.clone(),
        _ => return None,
    };
    let suffix = match field {
        Field::Title => "job title",
        Field::Company => "company",
        Field::Location => "headquarters location",
        Field::Industry => "industry",
        _ => return None,
    };
    Some(format!("{subject} {suffix}"))
}

/// Pull a plausible value for `field` out of the top organic hits.
fn extract_from_serp(hits: &[SerpHit], field: Field) -> Option<(FieldValue, f64)> {
    let top = hits.first()?;
    let text = format!("{} {}", top.title, top.snippet);
    let value = match field {
        Field::Title => {
            let marker = text.split(" - ").nth(1)?.trim();
            FieldValue::text(marker.to_string())
        }
        Field::Company | Field::Location | Field::Industry => {
            let candidate = top.title.split(['-', '|']).next()?.trim();
            if candidate.is_empty() {
                return None;
            }
            FieldValue::text(candidate.to_string())
        }
        _ => return None,
    };
    Some((value, 0.7))
}

// ---------------------------------------------------------------------------
// Hunter (email discovery)
// ---------------------------------------------------------------------------

/// Hunter.io email finder. Cheap tier.
pub struct HunterDriver {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HunterFinderResponse {
    data: HunterFinderData,
}

#[derive(Debug, Deserialize)]
struct HunterFinderData {
    email: Option<String>,
    #[serde(default)]
    score: u32,
}

#[derive(Debug, Deserialize)]
struct HunterDomainResponse {
    data: HunterDomainData,
}

#[derive(Debug, Deserialize)]
struct HunterDomainData {
    #[serde(default)]
    emails: Vec<HunterDomainEmail>,
}

#[derive(Debug, Deserialize)]
struct HunterDomainEmail {
    value: String,
}

impl HunterDriver {
    const DEFAULT_BASE_URL: &'static str = "https://api.hunter.io";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("hunter", store)),
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn find_email(&self, domain: &str, name: &str) -> Result<Option<(String, f64)>> {
        let mut parts = name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.last().unwrap_or_default().to_string();

        let response: HunterFinderResponse = self
            .keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!(
                    "{}/v2/email-finder?domain={domain}&first_name={first}&last_name={last}&api_key={key}",
                    self.base_url
                );
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::provider("hunter", format!("request failed: {e}")))?;
                    read_json("hunter", response).await
                }
            })
            .await?;

        Ok(response
            .data
            .email
            .map(|email| (email, response.data.score as f64 / 100.0)))
    }

    async fn domain_emails(&self, domain: &str) -> Result<Vec<String>> {
        let response: HunterDomainResponse = self
            .keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!(
                    "{}/v2/domain-search?domain={domain}&api_key={key}",
                    self.base_url
                );
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| Error::provider("hunter", format!("request failed: {e}")))?;
                    read_json("hunter", response).await
                }
            })
            .await?;
        Ok(response.data.emails.into_iter().map(|e| e.value).collect())
    }
}

#[async_trait]
impl Provider for HunterDriver {
    fn name(&self) -> &str {
        "hunter"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Cheap
    }

    fn cost_cents(&self) -> u32 {
        2
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(field, Field::Email | Field::EmailCandidates)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(domain) = input.domain.as_deref() else {
            return Ok(None);
        };
        let result = match field {
            Field::Email => {
                let Some(name) = input.name.as_deref() else {
                    return Ok(None);
                };
                self.find_email(domain, name).await?.map(|(email, score)| {
                    ProviderResult::new(field, FieldValue::text(email), score, "hunter")
                })
            }
            Field::EmailCandidates => {
                let emails = self.domain_emails(domain).await?;
                if emails.is_empty() {
                    None
                } else {
                    Some(ProviderResult::new(
                        field,
                        FieldValue::list(emails),
                        0.9,
                        "hunter",
                    ))
                }
            }
            _ => None,
        };
        Ok(result.map(|r| finalize_result(r, self)))
    }
}

// ---------------------------------------------------------------------------
// LinkedIn (profile enrichment API)
// ---------------------------------------------------------------------------

/// LinkedIn profile enrichment via a Proxycurl-style API. Premium tier.
pub struct LinkedinDriver {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LinkedinProfile {
    full_name: Option<String>,
    occupation: Option<String>,
    city: Option<String>,
    country_full_name: Option<String>,
    #[serde(default)]
    experiences: Vec<LinkedinExperience>,
    public_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkedinExperience {
    company: Option<String>,
    title: Option<String>,
}

impl LinkedinDriver {
    const DEFAULT_BASE_URL: &'static str = "https://nubela.co/proxycurl";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("linkedin", store)),
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn fetch_profile(&self, profile_url: &str) -> Result<LinkedinProfile> {
        self.keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!("{}/api/v2/linkedin?url={profile_url}", self.base_url);
                async move {
                    let response = http
                        .get(&url)
                        .header("Authorization", format!("Bearer {key}"))
                        .send()
                        .await
                        .map_err(|e| Error::provider("linkedin", format!("request failed: {e}")))?;
                    read_json("linkedin", response).await
                }
            })
            .await
    }
}

fn linkedin_field(profile: &LinkedinProfile, field: Field) -> Option<FieldValue> {
    match field {
        Field::Name => profile.full_name.clone().map(FieldValue::text),
        Field::Title => profile
            .occupation
            .clone()
            .or_else(|| profile.experiences.first().and_then(|e| e.title.clone()))
            .map(FieldValue::text),
        Field::Company => profile
            .experiences
            .first()
            .and_then(|e| e.company.clone())
            .map(FieldValue::text),
        Field::Location => match (&profile.city, &profile.country_full_name) {
            (Some(city), Some(country)) => Some(FieldValue::text(format!("{city}, {country}"))),
            (Some(city), None) => Some(FieldValue::text(city.clone())),
            (None, Some(country)) => Some(FieldValue::text(country.clone())),
            (None, None) => None,
        },
        Field::SocialLinks => profile
            .public_identifier
            .as_ref()
            .map(|id| FieldValue::list(vec![format!("https://linkedin.com/in/{id}")])),
        _ => None,
    }
}

#[async_trait]
impl Provider for LinkedinDriver {
    fn name(&self) -> &str {
        "linkedin"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Premium
    }

    fn cost_cents(&self) -> u32 {
        10
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(
            field,
            Field::Name | Field::Title | Field::Company | Field::Location | Field::SocialLinks
        )
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        // A direct profile URL is the only trustworthy lookup key here.
        let Some(profile_url) = input.linkedin_url.as_deref() else {
            return Ok(None);
        };
        let profile = self.fetch_profile(profile_url).await?;
        Ok(linkedin_field(&profile, field)
            .map(|value| ProviderResult::new(field, value, 0.95, "linkedin"))
            .map(|r| finalize_result(r, self)))
    }
}

// ---------------------------------------------------------------------------
// GitHub (public profile search)
// ---------------------------------------------------------------------------

/// GitHub user search. Free tier; a token raises rate limits but is optional.
pub struct GithubDriver {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GithubSearchResponse {
    #[serde(default)]
    items: Vec<GithubUser>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    html_url: String,
}

impl GithubDriver {
    const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("github", store)),
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn search_user(&self, name: &str) -> Result<Option<GithubUser>> {
        let url = format!(
            "{}/search/users?q={}+in:fullname&per_page=1",
            self.base_url,
            name.replace(' ', "+")
        );
        let request = self
            .http
            .get(&url)
            .header("User-Agent", "enrich-core")
            .header("Accept", "application/vnd.github+json");
        // Unauthenticated access is allowed; attach a token when we have one.
        let request = match self.keys.get_key() {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| Error::provider("github", format!("request failed: {e}")))?;
        let parsed: GithubSearchResponse = read_json("github", response).await?;
        Ok(parsed.items.into_iter().next())
    }
}

#[async_trait]
impl Provider for GithubDriver {
    fn name(&self) -> &str {
        "github"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Free
    }

    fn cost_cents(&self) -> u32 {
        0
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(field, Field::SocialLinks)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(name) = input.name.as_deref() else {
            return Ok(None);
        };
        let Some(user) = self.search_user(name).await? else {
            return Ok(None);
        };
        let result = ProviderResult::new(
            field,
            FieldValue::list(vec![user.html_url.clone()]),
            0.6,
            "github",
        )
        .with_raw(serde_json::json!({ "login": user.login }));
        Ok(Some(finalize_result(result, self)))
    }
}

// ---------------------------------------------------------------------------
// Whois (RDAP)
// ---------------------------------------------------------------------------

/// Domain registration lookup over RDAP. Free tier, no key.
pub struct WhoisDriver {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RdapResponse {
    #[serde(rename = "ldhName")]
    ldh_name: Option<String>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
    #[serde(default)]
    events: Vec<RdapEvent>,
}

#[derive(Debug, Deserialize)]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(rename = "vcardArray")]
    vcard: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: String,
}

impl WhoisDriver {
    const DEFAULT_BASE_URL: &'static str = "https://rdap.org";

    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn lookup(&self, domain: &str) -> Result<Option<RdapResponse>> {
        let url = format!("{}/domain/{domain}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/rdap+json")
            .send()
            .await
            .map_err(|e| Error::provider("whois", format!("request failed: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(read_json("whois", response).await?))
    }
}

/// Pull the registrant organization name out of an RDAP vcard, if any.
fn rdap_registrant_org(response: &RdapResponse) -> Option<String> {
    let entity = response
        .entities
        .iter()
        .find(|e| e.roles.iter().any(|r| r == "registrant"))?;
    let items = entity.vcard.as_ref()?.as_array()?.get(1)?.as_array()?;
    for item in items {
        let parts = item.as_array()?;
        let kind = parts.first()?.as_str()?;
        if kind == "org" || kind == "fn" {
            if let Some(value) = parts.get(3).and_then(|v| v.as_str()) {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

#[async_trait]
impl Provider for WhoisDriver {
    fn name(&self) -> &str {
        "whois"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Free
    }

    fn cost_cents(&self) -> u32 {
        0
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(field, Field::Whois | Field::Company)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(domain) = input.domain.as_deref() else {
            return Ok(None);
        };
        let Some(record) = self.lookup(domain).await? else {
            return Ok(None);
        };

        let result = match field {
            Field::Whois => {
                let registered = record
                    .events
                    .iter()
                    .find(|e| e.action == "registration")
                    .map(|e| e.date.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let summary = format!(
                    "domain: {}; registered: {registered}",
                    record.ldh_name.as_deref().unwrap_or(domain)
                );
                Some(ProviderResult::new(
                    field,
                    FieldValue::text(summary),
                    0.85,
                    "whois",
                ))
            }
            Field::Company => rdap_registrant_org(&record).map(|org| {
                ProviderResult::new(field, FieldValue::text(org), 0.8, "whois")
            }),
            _ => None,
        };
        Ok(result.map(|r| finalize_result(r, self)))
    }
}

// ---------------------------------------------------------------------------
// OpenCorporates (company registry)
// ---------------------------------------------------------------------------

/// OpenCorporates company search. Cheap tier.
pub struct OpenCorporatesDriver {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OcResponse {
    results: OcResults,
}

#[derive(Debug, Deserialize)]
struct OcResults {
    #[serde(default)]
    companies: Vec<OcCompanyWrapper>,
}

#[derive(Debug, Deserialize)]
struct OcCompanyWrapper {
    company: OcCompany,
}

#[derive(Debug, Deserialize)]
struct OcCompany {
    name: String,
    registered_address_in_full: Option<String>,
    #[serde(default)]
    industry_codes: Vec<OcIndustryCode>,
}

#[derive(Debug, Deserialize)]
struct OcIndustryCode {
    industry_code: OcIndustryCodeInner,
}

#[derive(Debug, Deserialize)]
struct OcIndustryCodeInner {
    description: String,
}

impl OpenCorporatesDriver {
    const DEFAULT_BASE_URL: &'static str = "https://api.opencorporates.com/v0.4";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("opencorporates", store)),
            http: http_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn search(&self, company: &str) -> Result<Option<OcCompany>> {
        let response: OcResponse = self
            .keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!(
                    "{}/companies/search?q={}&api_token={key}",
                    self.base_url,
                    company.replace(' ', "+")
                );
                async move {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| {
                            Error::provider("opencorporates", format!("request failed: {e}"))
                        })?;
                    read_json("opencorporates", response).await
                }
            })
            .await?;
        Ok(response.results.companies.into_iter().next().map(|w| w.company))
    }
}

#[async_trait]
impl Provider for OpenCorporatesDriver {
    fn name(&self) -> &str {
        "opencorporates"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Cheap
    }

    fn cost_cents(&self) -> u32 {
        2
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(field, Field::Company | Field::Industry | Field::Location)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let Some(query) = input.company.as_deref().or(input.domain.as_deref()) else {
            return Ok(None);
        };
        let Some(company) = self.search(query).await? else {
            return Ok(None);
        };

        let value = match field {
            Field::Company => Some(FieldValue::text(company.name.clone())),
            Field::Location => company
                .registered_address_in_full
                .clone()
                .map(FieldValue::text),
            Field::Industry => company
                .industry_codes
                .first()
                .map(|c| FieldValue::text(c.industry_code.description.clone())),
            _ => None,
        };
        Ok(value
            .map(|v| ProviderResult::new(field, v, 0.85, "opencorporates"))
            .map(|r| finalize_result(r, self)))
    }
}

// ---------------------------------------------------------------------------
// Pattern inference (local, free)
// ---------------------------------------------------------------------------

/// Generates plausible email candidates from name + domain. No network.
#[derive(Debug, Default)]
pub struct PatternInferenceProvider;

impl PatternInferenceProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for PatternInferenceProvider {
    fn name(&self) -> &str {
        "pattern_inference"
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Free
    }

    fn cost_cents(&self) -> u32 {
        0
    }

    fn can_enrich(&self, field: Field) -> bool {
        matches!(field, Field::EmailCandidates)
    }

    async fn enrich(
        &self,
        input: &NormalizedInput,
        field: Field,
    ) -> Result<Option<ProviderResult>> {
        let (Some(name), Some(domain)) = (input.name.as_deref(), input.domain.as_deref()) else {
            return Ok(None);
        };
        let mut parts = name.split_whitespace().map(|p| {
            p.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        });
        let Some(first) = parts.next().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let last = parts.last().filter(|p| !p.is_empty());

        let mut candidates = Vec::new();
        if let Some(last) = &last {
            candidates.push(format!("{first}.{last}@{domain}"));
            candidates.push(format!("{first}{last}@{domain}"));
            if let Some(initial) = first.chars().next() {
                candidates.push(format!("{initial}{last}@{domain}"));
            }
        }
        candidates.push(format!("{first}@{domain}"));

        let result = ProviderResult::new(field, FieldValue::list(candidates), 0.3, self.name());
        Ok(Some(finalize_result(result, self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_error_classification() {
        assert!(status_error("hunter", StatusCode::TOO_MANY_REQUESTS, "slow").is_quota());
        assert!(status_error("hunter", StatusCode::FORBIDDEN, "denied").is_quota());
        assert!(
            !status_error("hunter", StatusCode::INTERNAL_SERVER_ERROR, "boom").is_quota()
        );
    }

    #[test]
    fn test_serper_response_parsing() {
        let body = r#"{"organic":[
            {"title":"Reddit - Dive into anything","link":"https://www.reddit.com/","snippet":"Reddit is a network of communities.","position":1},
            {"title":"Reddit - Wikipedia","link":"https://en.wikipedia.org/wiki/Reddit","snippet":"...","position":2}
        ]}"#;
        let parsed: SerperResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.organic.len(), 2);
        assert_eq!(parsed.organic[0].position, 1);

        let hits: Vec<SerpHit> = parsed
            .organic
            .into_iter()
            .map(|o| SerpHit {
                title: o.title,
                link: o.link,
                snippet: o.snippet,
                position: o.position,
            })
            .collect();
        let (value, confidence) = extract_from_serp(&hits, Field::Company).unwrap();
        assert_eq!(value.as_text(), Some("Reddit"));
        assert_eq!(confidence, 0.7);
    }

    #[test]
    fn test_serp_query_shapes() {
        let mut input = NormalizedInput::new("t1", "r1");
        assert_eq!(serp_query(&input, Field::Title), None);

        input.name = Some("Ada Lovelace".into());
        input.company = Some("Analytical Engines".into());
        assert_eq!(
            serp_query(&input, Field::Title).as_deref(),
            Some("Ada Lovelace Analytical Engines job title")
        );
    }

    #[test]
    fn test_linkedin_profile_field_extraction() {
        let body = r#"{
            "full_name": "Ada Lovelace",
            "occupation": "Director of Engineering at Analytical Engines",
            "city": "London",
            "country_full_name": "United Kingdom",
            "experiences": [{"company": "Analytical Engines", "title": "Director of Engineering"}],
            "public_identifier": "ada-lovelace"
        }"#;
        let profile: LinkedinProfile = serde_json::from_str(body).unwrap();
        assert_eq!(
            linkedin_field(&profile, Field::Name).unwrap().as_text(),
            Some("Ada Lovelace")
        );
        assert_eq!(
            linkedin_field(&profile, Field::Company).unwrap().as_text(),
            Some("Analytical Engines")
        );
        assert_eq!(
            linkedin_field(&profile, Field::Location).unwrap().as_text(),
            Some("London, United Kingdom")
        );
        let links = linkedin_field(&profile, Field::SocialLinks).unwrap();
        assert_eq!(
            links.as_list().unwrap(),
            &["https://linkedin.com/in/ada-lovelace".to_string()]
        );
    }

    #[test]
    fn test_rdap_registrant_extraction() {
        let body = r#"{
            "ldhName": "example.com",
            "entities": [{
                "roles": ["registrant"],
                "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "Example Operations LLC"]
                ]]
            }],
            "events": [{"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"}]
        }"#;
        let parsed: RdapResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            rdap_registrant_org(&parsed).as_deref(),
            Some("Example Operations LLC")
        );
    }

    #[test]
    fn test_opencorporates_parsing() {
        let body = r#"{"results":{"companies":[{"company":{
            "name": "REDDIT, INC.",
            "registered_address_in_full": "548 Market St, San Francisco, CA",
            "industry_codes": [{"industry_code": {"description": "Internet Publishing"}}]
        }}]}}"#;
        let parsed: OcResponse = serde_json::from_str(body).unwrap();
        let company = &parsed.results.companies[0].company;
        assert_eq!(company.name, "REDDIT, INC.");
        assert_eq!(
            company.industry_codes[0].industry_code.description,
            "Internet Publishing"
        );
    }

    #[tokio::test]
    async fn test_pattern_inference_candidates() {
        let provider = PatternInferenceProvider::new();
        let mut input = NormalizedInput::new("t1", "r1");
        input.name = Some("Ada Lovelace".into());
        input.domain = Some("example.com".into());

        let result = provider
            .enrich(&input, Field::EmailCandidates)
            .await
            .unwrap()
            .unwrap();
        let list = result.value.unwrap();
        let candidates = list.as_list().unwrap();
        assert_eq!(candidates[0], "ada.lovelace@example.com");
        assert!(candidates.contains(&"ada@example.com".to_string()));
        assert_eq!(result.cost_cents, 0);
        assert_eq!(result.confidence, 0.3);

        let mut bare = NormalizedInput::new("t1", "r2");
        bare.name = Some("Ada".into());
        assert!(provider
            .enrich(&bare, Field::EmailCandidates)
            .await
            .unwrap()
            .is_none());
    }
}
