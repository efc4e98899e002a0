//! Core data model: fields, values, normalized inputs, and provider results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical enrichable field keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    Company,
    Title,
    Email,
    EmailCandidates,
    Domain,
    Website,
    Industry,
    Location,
    ShortBio,
    CompanySummary,
    SocialLinks,
    LinkedinUrl,
    Whois,
}

impl Field {
    /// All known fields, in static priority order.
    pub const ALL: [Field; 14] = [
        Field::Name,
        Field::Company,
        Field::Domain,
        Field::Website,
        Field::Title,
        Field::Email,
        Field::EmailCandidates,
        Field::LinkedinUrl,
        Field::Location,
        Field::Industry,
        Field::SocialLinks,
        Field::ShortBio,
        Field::CompanySummary,
        Field::Whois,
    ];

    /// Canonical string key for this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Company => "company",
            Field::Title => "title",
            Field::Email => "email",
            Field::EmailCandidates => "emailCandidates",
            Field::Domain => "domain",
            Field::Website => "website",
            Field::Industry => "industry",
            Field::Location => "location",
            Field::ShortBio => "shortBio",
            Field::CompanySummary => "companySummary",
            Field::SocialLinks => "socialLinks",
            Field::LinkedinUrl => "linkedinUrl",
            Field::Whois => "whois",
        }
    }

    /// Parse a canonical field key.
    pub fn parse(key: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.as_str() == key)
    }

    /// Fields synthesized by the LLM rather than looked up.
    pub fn is_synthesized(&self) -> bool {
        matches!(self, Field::ShortBio | Field::CompanySummary)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cost class of a provider. Ordering matches waterfall order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    Free = 0,
    Cheap = 1,
    Premium = 2,
}

impl std::fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Cheap => write!(f, "cheap"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

/// A field value produced by a provider or chosen as canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn list(items: Vec<String>) -> Self {
        Self::List(items)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render the value to a single comparable string.
    ///
    /// List members are sorted so that permutations compare equal.
    pub fn comparable(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => format!("{n}"),
            Self::List(items) => {
                let mut sorted: Vec<&str> = items.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.join(", ")
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) => false,
            Self::List(items) => items.is_empty(),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.comparable())
    }
}

/// Canonicalized row input handed to the resolver, planner, and providers.
///
/// `domain` is always a lowercase bare hostname and never a free-mail
/// provider; `email` contains exactly one `@`. Built once by the normalizer
/// and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedInput {
    pub row_id: String,
    pub table_id: String,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub linkedin_url: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    /// Original row map, untouched. Opaque key→value bag; use the typed
    /// accessors rather than reaching into it.
    #[serde(default)]
    pub raw: HashMap<String, serde_json::Value>,
}

impl NormalizedInput {
    pub fn new(table_id: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            table_id: table_id.into(),
            ..Default::default()
        }
    }

    /// Whether the input already carries a value for `field`.
    ///
    /// Presence of a canonical identifier counts as possessing the
    /// corresponding field.
    pub fn has_field(&self, field: Field) -> bool {
        match field {
            Field::Name => self.name.is_some(),
            Field::Company => self.company.is_some(),
            Field::Domain => self.domain.is_some(),
            Field::Website => self.domain.is_some(),
            Field::Email => self.email.is_some(),
            Field::LinkedinUrl => self.linkedin_url.is_some(),
            _ => false,
        }
    }

    /// Read a string out of the raw bag.
    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }

    /// The value the input already carries for `field`, if any.
    pub fn existing_value(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Name => self.name.clone().map(FieldValue::Text),
            Field::Company => self.company.clone().map(FieldValue::Text),
            Field::Domain => self.domain.clone().map(FieldValue::Text),
            Field::Website => self.domain.as_ref().map(|d| FieldValue::text(format!("https://{d}/"))),
            Field::Email => self.email.clone().map(FieldValue::Text),
            Field::LinkedinUrl => self.linkedin_url.clone().map(FieldValue::Text),
            _ => None,
        }
    }
}

/// A single result emitted by a provider for one field. Immutable evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub field: Field,
    /// None means the provider answered "not found" for a valid query.
    pub value: Option<FieldValue>,
    pub confidence: f64,
    pub source: String,
    pub cost_cents: u32,
    pub timestamp: DateTime<Utc>,
    pub verified: bool,
    /// Whether this value was generated (LLM synthesis) rather than looked up.
    #[serde(default)]
    pub generated: bool,
    /// Raw upstream payload for provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ProviderResult {
    pub fn new(field: Field, value: FieldValue, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            field,
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            cost_cents: 0,
            timestamp: Utc::now(),
            verified: false,
            generated: false,
            raw: None,
        }
    }

    /// A "not found" marker from a provider that answered a valid query.
    pub fn not_found(field: Field, source: impl Into<String>) -> Self {
        Self {
            field,
            value: None,
            confidence: 0.0,
            source: source.into(),
            cost_cents: 0,
            timestamp: Utc::now(),
            verified: false,
            generated: false,
            raw: None,
        }
    }

    pub fn with_cost(mut self, cents: u32) -> Self {
        self.cost_cents = cents;
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn with_generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn has_value(&self) -> bool {
        self.value.as_ref().map(|v| !v.is_empty()).unwrap_or(false)
    }
}

/// Accepted canonical value for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalField {
    pub value: FieldValue,
    pub confidence: f64,
    pub source: String,
    pub verified: bool,
}

/// Canonical value map handed back to the caller. Only accepted fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalData {
    #[serde(flatten)]
    fields: HashMap<Field, CanonicalField>,
}

impl CanonicalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field, canonical: CanonicalField) {
        self.fields.insert(field, canonical);
    }

    pub fn get(&self, field: Field) -> Option<&CanonicalField> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &CanonicalField)> {
        self.fields.iter()
    }

    /// Text value for a field, when present and textual.
    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(|c| c.value.as_text())
    }
}

/// Final status of an enriched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
