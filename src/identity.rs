//! Identity resolution.
//!
//! Classifies a normalized input before any provider is consulted: what kind
//! of entity the row describes, how strongly the input pins down one
//! real-world entity, and which lookup strategy that strength permits.

use serde::{Deserialize, Serialize};

use crate::types::{Field, NormalizedInput};

/// What kind of entity a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Company,
    Unknown,
}

/// Confidence that the input uniquely identifies one real-world entity,
/// prior to any enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityStrength {
    Invalid = 0,
    Weak = 1,
    Moderate = 2,
    Strong = 3,
}

/// Lookup strategy derived from identity strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupStrategy {
    DirectLookup,
    SearchAndValidate,
    HypothesisAndScore,
    FailFast,
}

/// How much non-public data a lookup may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityLevel {
    PublicOnly,
    SemiPrivate,
}

/// Risk that the available identifiers match many entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmbiguityRisk {
    Low,
    Medium,
    High,
}

/// Deterministic classification of which identifiers the input carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputSignature {
    LinkedinProfile,
    LinkedinCompany,
    EmailAndName,
    BusinessEmail,
    NameAndCompany,
    DomainOnly,
    CompanyOnly,
    NameOnly,
    Empty,
}

/// Resolved identity for one row. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub entity_type: EntityType,
    pub strength: IdentityStrength,
    pub signature: InputSignature,
    pub strategy: LookupStrategy,
    pub sensitivity: SensitivityLevel,
    pub ambiguity: AmbiguityRisk,
    /// Fields the caller asked for that the input does not already carry.
    pub required_fields: Vec<Field>,
    /// Fields the input already carries.
    pub available_fields: Vec<Field>,
    pub confidence: f64,
}

impl EntityIdentity {
    /// Whether the row carries enough identity to attempt enrichment.
    pub fn has_minimum_identity(&self) -> bool {
        self.strategy != LookupStrategy::FailFast
    }
}

/// Given names too common to identify a person on their own.
const COMMON_FIRST_NAMES: &[&str] = &[
    "john", "james", "robert", "michael", "william", "david", "richard", "thomas", "mary",
    "jennifer", "linda", "patricia", "elizabeth", "sarah", "susan", "jessica", "karen", "wei",
    "mohammed", "maria", "jose", "juan", "anna", "chris", "mike", "dave", "alex", "sam",
];

/// Employers so large that name+company still matches many people.
const BIG_COMPANIES: &[&str] = &[
    "google", "alphabet", "amazon", "microsoft", "apple", "meta", "facebook", "ibm", "oracle",
    "intel", "samsung", "walmart", "accenture", "deloitte", "pwc", "kpmg", "ey", "tcs",
    "infosys", "salesforce", "sap", "cisco", "jpmorgan", "citi", "hsbc",
];

/// Classifies inputs into identity classes. Stateless; the name and company
/// sets are closed and compiled in.
#[derive(Debug, Default, Clone)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the identity of one normalized input against the fields the
    /// caller wants enriched.
    pub fn resolve(&self, input: &NormalizedInput, fields: &[Field]) -> EntityIdentity {
        let signature = self.classify_signature(input);
        let entity_type = entity_type_for(signature);
        let strength = self.strength_for(input, signature);
        let ambiguity = self.ambiguity_for(input, strength);
        let strategy = strategy_for(strength);
        let sensitivity = sensitivity_for(strength, ambiguity);

        let available_fields: Vec<Field> = Field::ALL
            .iter()
            .copied()
            .filter(|f| input.has_field(*f))
            .collect();
        let required_fields: Vec<Field> = fields
            .iter()
            .copied()
            .filter(|f| !input.has_field(*f))
            .collect();

        let confidence = match strength {
            IdentityStrength::Strong => 0.9,
            IdentityStrength::Moderate => 0.7,
            IdentityStrength::Weak => 0.4,
            IdentityStrength::Invalid => 0.0,
        };

        tracing::debug!(
            row = %input.row_id,
            ?signature,
            ?strength,
            ?strategy,
            "resolved identity"
        );

        EntityIdentity {
            entity_type,
            strength,
            signature,
            strategy,
            sensitivity,
            ambiguity,
            required_fields,
            available_fields,
            confidence,
        }
    }

    fn classify_signature(&self, input: &NormalizedInput) -> InputSignature {
        if let Some(url) = &input.linkedin_url {
            if url.contains("/company/") {
                return InputSignature::LinkedinCompany;
            }
            return InputSignature::LinkedinProfile;
        }
        if input.email.is_some() && input.name.is_some() {
            return InputSignature::EmailAndName;
        }
        if input.email.is_some() {
            return InputSignature::BusinessEmail;
        }
        if input.name.is_some() && input.company.is_some() {
            return InputSignature::NameAndCompany;
        }
        if input.domain.is_some() {
            return InputSignature::DomainOnly;
        }
        if input.company.is_some() {
            return InputSignature::CompanyOnly;
        }
        if input.name.is_some() {
            return InputSignature::NameOnly;
        }
        InputSignature::Empty
    }

    fn strength_for(&self, input: &NormalizedInput, signature: InputSignature) -> IdentityStrength {
        match signature {
            // Direct handles.
            InputSignature::LinkedinProfile
            | InputSignature::LinkedinCompany
            | InputSignature::EmailAndName
            | InputSignature::BusinessEmail
            | InputSignature::DomainOnly => IdentityStrength::Strong,
            InputSignature::NameAndCompany => {
                if self.is_ambiguous_pair(input) {
                    IdentityStrength::Weak
                } else {
                    IdentityStrength::Moderate
                }
            }
            InputSignature::CompanyOnly => IdentityStrength::Moderate,
            InputSignature::NameOnly | InputSignature::Empty => IdentityStrength::Invalid,
        }
    }

    /// A common first name at a very large employer matches too many people.
    fn is_ambiguous_pair(&self, input: &NormalizedInput) -> bool {
        let first_name_common = input
            .name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .map(|first| COMMON_FIRST_NAMES.contains(&first.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let company_big = input
            .company
            .as_deref()
            .map(|c| {
                let lower = c.to_ascii_lowercase();
                BIG_COMPANIES.iter().any(|big| lower.contains(big))
            })
            .unwrap_or(false);
        first_name_common && company_big
    }

    fn ambiguity_for(&self, input: &NormalizedInput, strength: IdentityStrength) -> AmbiguityRisk {
        match strength {
            IdentityStrength::Strong => AmbiguityRisk::Low,
            IdentityStrength::Moderate => {
                if self.is_ambiguous_pair(input) {
                    AmbiguityRisk::Medium
                } else {
                    AmbiguityRisk::Low
                }
            }
            IdentityStrength::Weak => AmbiguityRisk::High,
            IdentityStrength::Invalid => AmbiguityRisk::High,
        }
    }
}

fn entity_type_for(signature: InputSignature) -> EntityType {
    match signature {
        InputSignature::LinkedinProfile
        | InputSignature::EmailAndName
        | InputSignature::BusinessEmail
        | InputSignature::NameAndCompany
        | InputSignature::NameOnly => EntityType::Person,
        InputSignature::LinkedinCompany
        | InputSignature::DomainOnly
        | InputSignature::CompanyOnly => EntityType::Company,
        InputSignature::Empty => EntityType::Unknown,
    }
}

fn strategy_for(strength: IdentityStrength) -> LookupStrategy {
    match strength {
        IdentityStrength::Strong => LookupStrategy::DirectLookup,
        IdentityStrength::Moderate => LookupStrategy::SearchAndValidate,
        IdentityStrength::Weak => LookupStrategy::HypothesisAndScore,
        IdentityStrength::Invalid => LookupStrategy::FailFast,
    }
}

/// Sensitivity matrix. Only a strong, unambiguous identity may touch
/// semi-private sources; everything else stays public-only.
fn sensitivity_for(strength: IdentityStrength, ambiguity: AmbiguityRisk) -> SensitivityLevel {
    match (strength, ambiguity) {
        (IdentityStrength::Strong, AmbiguityRisk::Low) => SensitivityLevel::SemiPrivate,
        _ => SensitivityLevel::PublicOnly,
    }
}
