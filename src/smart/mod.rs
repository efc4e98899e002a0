//! Smart enrichment sub-engine.
//!
//! A specialized provider that discovers a company's website, domain, and
//! industry through three explicit layers: candidate collection from one
//! SERP query, per-candidate verification scoring, and a thresholded
//! decision. SERP and homepage access sit behind traits so tests drive the
//! engine with canned results.

mod provider;

pub use provider::SmartEnrichmentProvider;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::normalize::{normalize_domain, NormalizeOptions};

/// One organic search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub position: u32,
}

/// Search backend used for candidate collection.
#[async_trait]
pub trait SerpClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SerpHit>>;
}

/// A fetched homepage, reduced to what verification needs.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub title: Option<String>,
    pub body_excerpt: String,
}

/// Homepage access used for candidate verification.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// `Ok(None)` means the homepage is unreachable; that is a scoring
    /// signal, not an error.
    async fn fetch(&self, url: &str) -> Result<Option<FetchedPage>>;
}

/// Reqwest-backed homepage fetcher with the short verification timeout.
pub struct ReqwestPageFetcher {
    http: Client,
}

impl ReqwestPageFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedPage>> {
        let response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            // Unreachable or error pages count against the candidate.
            Ok(_) | Err(_) => return Ok(None),
        };
        let body = match response.text().await {
            Ok(body) => body,
            Err(_) => return Ok(None),
        };
        let title = extract_html_title(&body);
        let excerpt: String = body.chars().take(4000).collect();
        Ok(Some(FetchedPage {
            title,
            body_excerpt: excerpt,
        }))
    }
}

fn extract_html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Hosts that are never a company's own website.
const EXCLUDED_DOMAINS: &[&str] = &[
    "linkedin.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "youtube.com",
    "wikipedia.org",
    "crunchbase.com",
    "bloomberg.com",
    "yelp.com",
    "glassdoor.com",
    "zoominfo.com",
    "forbes.com",
    "g2.com",
    "capterra.com",
    // directory hosts
    "yellowpages.com",
    "bbb.org",
    "dnb.com",
    "manta.com",
    "clutch.co",
    "trustpilot.com",
    "indeed.com",
];

const INDUSTRY_KEYWORDS: &[&str] = &[
    "software", "saas", "fintech", "healthcare", "biotech", "ecommerce", "retail",
    "consulting", "education", "gaming", "media", "logistics", "cybersecurity", "insurance",
    "real estate", "manufacturing", "energy", "travel", "marketing", "analytics",
];

const DIRECTORY_MARKERS: &[&str] = &[
    "directory",
    "business listing",
    "company profiles",
    "reviews and ratings",
    "top 10",
    "best companies",
    "yellow pages",
];

const PARKED_MARKERS: &[&str] = &[
    "domain is for sale",
    "buy this domain",
    "this domain may be for sale",
    "domain parking",
    "parked free",
    "under construction",
];

/// A website candidate pulled from the SERP.
#[derive(Debug, Clone)]
pub struct WebsiteCandidate {
    pub domain: String,
    pub position: u32,
    pub title: String,
    pub snippet: String,
}

/// Verification outcome for one candidate.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: WebsiteCandidate,
    pub score: f64,
    pub canonical: bool,
    /// Industry keyword observed in SERP text or on the homepage.
    pub industry_hint: Option<String>,
}

/// Final decision for a discovery run.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartDecision {
    /// Normalized `https://domain/` URL.
    pub url: String,
    pub domain: String,
    pub confidence: f64,
    pub verified: bool,
    pub industry_hint: Option<String>,
    /// SERP snippet of the winning candidate, when non-empty.
    pub summary: Option<String>,
}

/// The three-layer discovery engine.
pub struct SmartEnrichmentEngine {
    serp: Arc<dyn SerpClient>,
    fetcher: Arc<dyn PageFetcher>,
}

impl SmartEnrichmentEngine {
    pub fn new(serp: Arc<dyn SerpClient>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { serp, fetcher }
    }

    /// Run candidate collection, verification, and decision for a company.
    pub async fn discover(&self, company: &str) -> Result<Option<SmartDecision>> {
        let candidates = self.collect_candidates(company).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        // Fast path: an exact-name domain in position 1 makes positions 3+
        // not worth the fetches.
        let top_is_canonical = candidates
            .first()
            .map(|c| is_canonical_domain(company, &c.domain))
            .unwrap_or(false);

        let mut scored = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.into_iter().enumerate() {
            if top_is_canonical && index >= 2 {
                break;
            }
            scored.push(self.verify_candidate(company, candidate).await);
        }

        Ok(decide(scored))
    }

    /// Layer 1: one fixed SERP query, up to five non-excluded domains.
    async fn collect_candidates(&self, company: &str) -> Result<Vec<WebsiteCandidate>> {
        let query = format!("\"{company}\" official website - landing page");
        let hits = self.serp.search(&query).await?;

        let mut candidates = Vec::new();
        for hit in hits {
            let Some(domain) = normalize_domain(&hit.link, NormalizeOptions::default()) else {
                continue;
            };
            if EXCLUDED_DOMAINS.iter().any(|ex| domain.ends_with(ex)) {
                continue;
            }
            if candidates
                .iter()
                .any(|c: &WebsiteCandidate| c.domain == domain)
            {
                continue;
            }
            candidates.push(WebsiteCandidate {
                domain,
                position: hit.position,
                title: hit.title,
                snippet: hit.snippet,
            });
            if candidates.len() == 5 {
                break;
            }
        }
        Ok(candidates)
    }

    /// Layer 2: fixed bonuses and penalties around a 0.3 base.
    async fn verify_candidate(
        &self,
        company: &str,
        candidate: WebsiteCandidate,
    ) -> ScoredCandidate {
        let mut score: f64 = 0.3;
        let company_lower = company.to_ascii_lowercase();
        let serp_text = format!("{} {}", candidate.title, candidate.snippet).to_ascii_lowercase();

        let canonical = is_canonical_domain(company, &candidate.domain);
        if canonical {
            score += 0.25;
        }
        if serp_text.contains(&company_lower) {
            score += 0.25;
        }
        let mut industry_hint = INDUSTRY_KEYWORDS
            .iter()
            .find(|kw| serp_text.contains(*kw))
            .map(|kw| kw.to_string());
        if industry_hint.is_some() {
            score += 0.15;
        }
        if DIRECTORY_MARKERS.iter().any(|m| serp_text.contains(m)) {
            score -= 0.3;
        }

        let homepage_url = format!("https://{}/", candidate.domain);
        match self.fetcher.fetch(&homepage_url).await {
            Ok(Some(page)) => {
                let page_title = page.title.as_deref().unwrap_or("").to_ascii_lowercase();
                let body = page.body_excerpt.to_ascii_lowercase();
                if page_title.contains(&company_lower) {
                    score += 0.2;
                }
                if PARKED_MARKERS
                    .iter()
                    .any(|m| page_title.contains(m) || body.contains(m))
                {
                    score -= 0.4;
                }
                if industry_hint.is_none() {
                    industry_hint = INDUSTRY_KEYWORDS
                        .iter()
                        .find(|kw| body.contains(*kw))
                        .map(|kw| kw.to_string());
                    if industry_hint.is_some() {
                        score += 0.1;
                    }
                } else if INDUSTRY_KEYWORDS.iter().any(|kw| body.contains(kw)) {
                    score += 0.1;
                }
            }
            Ok(None) | Err(_) => score -= 0.2,
        }

        ScoredCandidate {
            candidate,
            score: score.clamp(0.0, 1.0),
            canonical,
            industry_hint,
        }
    }
}

/// Layer 3: thresholds and the ambiguity cap.
fn decide(mut scored: Vec<ScoredCandidate>) -> Option<SmartDecision> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let best = scored.first()?;
    let runner_up_score = scored.get(1).map(|c| c.score).unwrap_or(0.0);

    if best.score < 0.6 {
        return None;
    }

    let verified = best.score >= 0.8;
    let mut confidence = best.score;
    if !verified {
        // Ambiguous runner-up and a non-canonical winner cap the estimate.
        let gap = best.score - runner_up_score;
        if gap < 0.1 && !best.canonical {
            confidence = confidence.min(0.72);
        }
    }

    Some(SmartDecision {
        url: format!("https://{}/", best.candidate.domain),
        domain: best.candidate.domain.clone(),
        confidence,
        verified,
        industry_hint: best.industry_hint.clone(),
        summary: Some(best.candidate.snippet.trim().to_string()).filter(|s| !s.is_empty()),
    })
}

/// Whether the domain's base label is the normalized company name.
fn is_canonical_domain(company: &str, domain: &str) -> bool {
    let base = domain.split('.').next().unwrap_or(domain);
    let normalized_company: String = company
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    !normalized_company.is_empty() && base == normalized_company
}
