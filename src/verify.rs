//! Per-field verification against confidence thresholds.
//!
//! Each requested field gets one decision: accept, escalate to the premium
//! pass, require more evidence, or fail. The mode shifts thresholds rather
//! than the decision logic itself.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedField;
use crate::types::Field;

/// Verification strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Critical,
    #[default]
    Normal,
    BestEffort,
}

/// Decision for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldDecision {
    Accept,
    Escalate,
    RequireMore,
    Fail,
}

/// One field's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldVerdict {
    pub field: Field,
    pub decision: FieldDecision,
    pub confidence: f64,
    pub threshold: f64,
    /// Short reason string for user-visible output on non-accepted fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Overall row status after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Verified,
    Partial,
    NeedsEscalation,
    Failed,
}

/// Verification output for one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verdicts: Vec<FieldVerdict>,
    pub status: VerificationStatus,
}

impl VerificationReport {
    pub fn accepted_fields(&self) -> Vec<Field> {
        self.verdicts
            .iter()
            .filter(|v| v.decision == FieldDecision::Accept)
            .map(|v| v.field)
            .collect()
    }

    pub fn fields_to_escalate(&self) -> Vec<Field> {
        self.verdicts
            .iter()
            .filter(|v| v.decision == FieldDecision::Escalate)
            .map(|v| v.field)
            .collect()
    }

    pub fn verdict_for(&self, field: Field) -> Option<&FieldVerdict> {
        self.verdicts.iter().find(|v| v.field == field)
    }
}

/// Core identity fields that critical mode holds to a higher bar.
fn is_core_field(field: Field) -> bool {
    matches!(field, Field::Name | Field::Company | Field::Email)
}

/// Threshold verifier.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    mode: VerificationMode,
}

impl Verifier {
    pub fn new(mode: VerificationMode) -> Self {
        Self { mode }
    }

    /// Acceptance threshold for a field under the current mode.
    pub fn threshold_for(&self, field: Field) -> f64 {
        let base = match field {
            Field::Name | Field::Company => 0.6,
            Field::Email | Field::Title | Field::SocialLinks => 0.5,
            Field::ShortBio | Field::CompanySummary => 0.4,
            _ => 0.5,
        };
        match self.mode {
            VerificationMode::Normal => base,
            VerificationMode::Critical => {
                if is_core_field(field) {
                    0.8
                } else {
                    base
                }
            }
            VerificationMode::BestEffort => {
                if base >= 0.5 {
                    0.4
                } else {
                    0.3
                }
            }
        }
    }

    /// Judge every requested field against the aggregated evidence.
    pub fn verify(
        &self,
        requested: &[Field],
        aggregated: &[AggregatedField],
    ) -> VerificationReport {
        let verdicts: Vec<FieldVerdict> = requested
            .iter()
            .map(|field| self.verdict(*field, aggregated.iter().find(|a| a.field == *field)))
            .collect();

        let any = |d: FieldDecision| verdicts.iter().any(|v| v.decision == d);
        let all_accepted = verdicts
            .iter()
            .all(|v| v.decision == FieldDecision::Accept);

        let status = if verdicts.is_empty() || all_accepted {
            VerificationStatus::Verified
        } else if any(FieldDecision::Escalate) {
            VerificationStatus::NeedsEscalation
        } else if any(FieldDecision::Accept) {
            VerificationStatus::Partial
        } else {
            VerificationStatus::Failed
        };

        VerificationReport { verdicts, status }
    }

    fn verdict(&self, field: Field, aggregated: Option<&AggregatedField>) -> FieldVerdict {
        let threshold = self.threshold_for(field);
        let Some(agg) = aggregated else {
            return FieldVerdict {
                field,
                decision: FieldDecision::RequireMore,
                confidence: 0.0,
                threshold,
                reason: Some("no value produced".to_string()),
            };
        };

        let confidence = agg.confidence;
        let (decision, reason) = if confidence >= threshold {
            (FieldDecision::Accept, None)
        } else if confidence >= threshold / 2.0 {
            (
                FieldDecision::Escalate,
                Some(format!("confidence {confidence:.2} below threshold {threshold:.2}")),
            )
        } else {
            let reason = if agg.has_conflict {
                "conflicting values across sources".to_string()
            } else {
                format!("confidence {confidence:.2} far below threshold {threshold:.2}")
            };
            (FieldDecision::RequireMore, Some(reason))
        };

        FieldVerdict {
            field,
            decision,
            confidence,
            threshold,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn agg(field: Field, confidence: f64, conflict: bool) -> AggregatedField {
        AggregatedField {
            field,
            canonical_value: FieldValue::text("value"),
            canonical_source: "serper".to_string(),
            confidence,
            sources: vec!["serper".to_string()],
            has_conflict: conflict,
            conflicting_values: None,
            all_results: Vec::new(),
        }
    }

    #[test]
    fn test_accept_at_threshold() {
        let verifier = Verifier::new(VerificationMode::Normal);
        let report = verifier.verify(&[Field::Name], &[agg(Field::Name, 0.6, false)]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::Accept);
        assert_eq!(report.status, VerificationStatus::Verified);
    }

    #[test]
    fn test_escalation_band() {
        let verifier = Verifier::new(VerificationMode::Normal);
        // name threshold 0.6; half is 0.3
        let report = verifier.verify(&[Field::Name], &[agg(Field::Name, 0.45, false)]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::Escalate);
        assert_eq!(report.status, VerificationStatus::NeedsEscalation);
        assert_eq!(report.fields_to_escalate(), vec![Field::Name]);
    }

    #[test]
    fn test_require_more_below_half_threshold() {
        let verifier = Verifier::new(VerificationMode::Normal);
        let report = verifier.verify(&[Field::Name], &[agg(Field::Name, 0.2, false)]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::RequireMore);
        assert_eq!(report.status, VerificationStatus::Failed);
    }

    #[test]
    fn test_missing_field_requires_more() {
        let verifier = Verifier::new(VerificationMode::Normal);
        let report = verifier.verify(&[Field::Email], &[]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::RequireMore);
        assert_eq!(report.verdicts[0].reason.as_deref(), Some("no value produced"));
    }

    #[test]
    fn test_partial_status() {
        let verifier = Verifier::new(VerificationMode::Normal);
        let report = verifier.verify(
            &[Field::Name, Field::Title],
            &[agg(Field::Name, 0.9, false), agg(Field::Title, 0.1, true)],
        );
        assert_eq!(report.status, VerificationStatus::Partial);
        assert_eq!(report.accepted_fields(), vec![Field::Name]);
        assert!(report
            .verdict_for(Field::Title)
            .unwrap()
            .reason
            .as_deref()
            .unwrap()
            .contains("conflicting"));
    }

    #[test]
    fn test_critical_mode_raises_core_fields() {
        let verifier = Verifier::new(VerificationMode::Critical);
        assert_eq!(verifier.threshold_for(Field::Name), 0.8);
        assert_eq!(verifier.threshold_for(Field::Email), 0.8);
        assert_eq!(verifier.threshold_for(Field::Title), 0.5);

        let report = verifier.verify(&[Field::Name], &[agg(Field::Name, 0.7, false)]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::Escalate);
    }

    #[test]
    fn test_best_effort_lowers_thresholds() {
        let verifier = Verifier::new(VerificationMode::BestEffort);
        assert_eq!(verifier.threshold_for(Field::Name), 0.4);
        assert_eq!(verifier.threshold_for(Field::ShortBio), 0.3);

        let report = verifier.verify(&[Field::Name], &[agg(Field::Name, 0.45, false)]);
        assert_eq!(report.verdicts[0].decision, FieldDecision::Accept);
    }

    #[test]
    fn test_empty_request_is_verified() {
        let verifier = Verifier::default();
        let report = verifier.verify(&[], &[]);
        assert_eq!(report.status, VerificationStatus::Verified);
    }
}
