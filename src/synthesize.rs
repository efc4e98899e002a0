//! Constrained text synthesis for bio and summary fields.
//!
//! The synthesizer fuses already-verified facts into short prose. It only
//! runs after facts are accepted, is told to add nothing beyond its input
//! snippets, and fails silently: an empty snippet set or a generator error
//! simply produces no result.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::keys::ApiKeyManager;
use crate::store::KeyValueStore;
use crate::types::{CanonicalData, Field, FieldValue, NormalizedInput, ProviderResult};

/// Cost of one synthesis call, in cents.
const SYNTHESIS_COST_CENTS: u32 = 1;

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String>;
}

/// One fact handed to the generator.
#[derive(Debug, Clone)]
struct Snippet {
    label: &'static str,
    text: String,
    confidence: f64,
}

/// LLM-backed field synthesizer.
pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Synthesize one text field from canonical facts. Returns `None` when
    /// there is nothing to fuse or the generator fails.
    pub async fn synthesize(
        &self,
        input: &NormalizedInput,
        canonical: &CanonicalData,
        field: Field,
    ) -> Option<ProviderResult> {
        if !field.is_synthesized() {
            return None;
        }
        let snippets = self.collect_snippets(input, canonical, field);
        if snippets.is_empty() {
            return None;
        }

        let system = "You write one short, factual sentence or two from the provided facts. \
                      Use only the facts given. Do not invent names, numbers, or claims that \
                      are not present in the input.";
        let facts: String = snippets
            .iter()
            .map(|s| format!("- {}: {}\n", s.label, s.text))
            .collect();
        let instruction = match field {
            Field::ShortBio => "Write a short professional bio of this person.",
            Field::CompanySummary => "Write a short summary of this company.",
            _ => return None,
        };
        let user = format!("Facts:\n{facts}\n{instruction}");

        let text = match self.generator.generate(system, &user, 150, 0.3).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!(field = %field, error = %e, "synthesis failed");
                return None;
            }
        };
        if text.is_empty() {
            return None;
        }

        let base = match snippets.len() {
            1 => 0.4,
            2 => 0.6,
            _ => 0.7,
        };
        let mean_input =
            snippets.iter().map(|s| s.confidence).sum::<f64>() / snippets.len() as f64;
        let confidence = (base + mean_input) / 2.0;

        Some(
            ProviderResult::new(field, FieldValue::text(text), confidence, "llm")
                .with_generated()
                .with_cost(SYNTHESIS_COST_CENTS)
                .with_raw(serde_json::json!({ "snippets": snippets.len() })),
        )
    }

    fn collect_snippets(
        &self,
        input: &NormalizedInput,
        canonical: &CanonicalData,
        field: Field,
    ) -> Vec<Snippet> {
        let wanted: &[(Field, &'static str)] = match field {
            Field::ShortBio => &[
                (Field::Name, "name"),
                (Field::Title, "title"),
                (Field::Company, "company"),
                (Field::Location, "location"),
            ],
            Field::CompanySummary => &[
                (Field::Company, "company"),
                (Field::Industry, "industry"),
                (Field::Website, "website"),
                (Field::Location, "location"),
            ],
            _ => &[],
        };

        let mut snippets = Vec::new();
        for (source_field, label) in wanted {
            if let Some(entry) = canonical.get(*source_field) {
                snippets.push(Snippet {
                    label,
                    text: entry.value.comparable(),
                    confidence: entry.confidence,
                });
                continue;
            }
            // Identifiers present on the input are facts too.
            let from_input = match source_field {
                Field::Name => input.name.clone(),
                Field::Company => input.company.clone(),
                Field::Website => input.domain.clone(),
                _ => None,
            };
            if let Some(text) = from_input {
                snippets.push(Snippet {
                    label,
                    text,
                    confidence: 0.9,
                });
            }
        }
        snippets
    }
}

/// Anthropic-backed generator, the default real implementation.
pub struct AnthropicGenerator {
    keys: Arc<ApiKeyManager>,
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

impl AnthropicGenerator {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(store: Option<Arc<dyn KeyValueStore>>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            keys: Arc::new(ApiKeyManager::from_env("anthropic", store)),
            http,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: "claude-3-5-haiku-20241022".to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens,
            system: system.to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
            temperature,
        };

        let response: AnthropicResponse = self
            .keys
            .with_key(|key| {
                let http = self.http.clone();
                let url = format!("{}/v1/messages", self.base_url);
                let request = serde_json::to_value(&request);
                async move {
                    let body = request
                        .map_err(|e| Error::Generation(format!("request serialization: {e}")))?;
                    let response = http
                        .post(&url)
                        .header("x-api-key", key)
                        .header("anthropic-version", Self::API_VERSION)
                        .header("content-type", "application/json")
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| Error::Generation(format!("request failed: {e}")))?;

                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .map_err(|e| Error::Generation(format!("failed to read response: {e}")))?;
                    if !status.is_success() {
                        if matches!(status.as_u16(), 429 | 403 | 503) {
                            return Err(Error::rate_limited("anthropic", format!("HTTP {status}")));
                        }
                        return Err(Error::Generation(format!("HTTP {status}: {text}")));
                    }
                    serde_json::from_str(&text)
                        .map_err(|e| Error::Generation(format!("failed to parse response: {e}")))
                }
            })
            .await?;

        Ok(response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalField;

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(
            &self,
            _system: &str,
            user: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<String> {
            Ok(format!("synthesized from: {}", user.lines().count()))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _: &str, _: &str, _: u32, _: f64) -> Result<String> {
            Err(Error::Generation("model unavailable".into()))
        }
    }

    fn canonical_person() -> CanonicalData {
        let mut data = CanonicalData::new();
        data.insert(
            Field::Name,
            CanonicalField {
                value: FieldValue::text("Ada Lovelace"),
                confidence: 0.9,
                source: "linkedin".into(),
                verified: true,
            },
        );
        data.insert(
            Field::Title,
            CanonicalField {
                value: FieldValue::text("Analyst"),
                confidence: 0.7,
                source: "serper".into(),
                verified: true,
            },
        );
        data
    }

    #[tokio::test]
    async fn test_synthesis_labels_and_confidence() {
        let synthesizer = Synthesizer::new(Arc::new(EchoGenerator));
        let input = NormalizedInput::new("t1", "r1");
        let result = synthesizer
            .synthesize(&input, &canonical_person(), Field::ShortBio)
            .await
            .unwrap();

        assert_eq!(result.source, "llm");
        assert!(result.generated);
        assert_eq!(result.cost_cents, 1);
        // Two snippets: base 0.6, mean input 0.8 -> 0.7
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_snippets_yields_nothing() {
        let synthesizer = Synthesizer::new(Arc::new(EchoGenerator));
        let input = NormalizedInput::new("t1", "r1");
        let empty = CanonicalData::new();
        assert!(synthesizer
            .synthesize(&input, &empty, Field::ShortBio)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_generator_failure_is_silent() {
        let synthesizer = Synthesizer::new(Arc::new(FailingGenerator));
        let input = NormalizedInput::new("t1", "r1");
        assert!(synthesizer
            .synthesize(&input, &canonical_person(), Field::ShortBio)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_non_synthesized_field_rejected() {
        let synthesizer = Synthesizer::new(Arc::new(EchoGenerator));
        let input = NormalizedInput::new("t1", "r1");
        assert!(synthesizer
            .synthesize(&input, &canonical_person(), Field::Email)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_company_summary_uses_input_identifiers() {
        let synthesizer = Synthesizer::new(Arc::new(EchoGenerator));
        let mut input = NormalizedInput::new("t1", "r1");
        input.company = Some("Reddit".into());
        let empty = CanonicalData::new();

        let result = synthesizer
            .synthesize(&input, &empty, Field::CompanySummary)
            .await
            .unwrap();
        // One snippet from the input: base 0.4, input confidence 0.9 -> 0.65
        assert!((result.confidence - 0.65).abs() < 1e-9);
    }
}
