//! Multi-source confidence fusion.
//!
//! Evidence for a field is grouped by value similarity; the group with the
//! highest weighted score wins and contributes the canonical value. Final
//! confidence is the winning group's mean confidence, boosted for consensus
//! and penalized for conflicting groups. Aggregation is commutative: any
//! permutation of the same evidence produces the same canonical value and
//! the same confidence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Field, FieldValue, ProviderResult};

/// Default similarity at or above which two values belong to the same
/// group; `ensemble_fusion.agreement_threshold` overrides it.
pub const DEFAULT_AGREEMENT_THRESHOLD: f64 = 0.85;
/// Strings longer than this skip the edit-distance comparison.
const SHORT_STRING_MAX: usize = 64;
const CONSENSUS_BOOST: f64 = 0.1;
const CONFLICT_PENALTY: f64 = 0.05;
const CONFIDENCE_FLOOR: f64 = 0.1;

/// Fixed trust weights per source.
pub fn source_weight(source: &str) -> f64 {
    match source {
        "linkedin" => 0.95,
        "opencorporates" => 0.95,
        "hunter" => 0.9,
        "github" => 0.9,
        "smart_enrichment" => 0.9,
        "whois" => 0.85,
        "cache" => 0.85,
        "serper" | "serp" => 0.7,
        "pattern_inference" => 0.3,
        "llm" => 0.2,
        _ => 0.5,
    }
}

/// Aggregated view of one field's evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedField {
    pub field: Field,
    pub canonical_value: FieldValue,
    /// Source whose value was chosen as canonical.
    pub canonical_source: String,
    pub confidence: f64,
    /// Distinct sources that contributed to the winning group.
    pub sources: Vec<String>,
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_values: Option<Vec<FieldValue>>,
    /// Every result seen for this field, winners and losers alike.
    pub all_results: Vec<ProviderResult>,
}

/// Normalize a value for comparison: lowercase, trimmed, collapsed
/// whitespace; list members are already sorted by `comparable`.
fn normalize(value: &FieldValue) -> String {
    value
        .comparable()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity between two already-normalized strings, in [0,1].
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if longer.contains(shorter) {
        return 0.7 + 0.3 * (shorter.len() as f64 / longer.len() as f64);
    }
    if longer.len() <= SHORT_STRING_MAX {
        let distance = levenshtein(a, b);
        return 1.0 - distance as f64 / longer.len() as f64;
    }
    0.0
}

struct Group<'a> {
    representative: String,
    members: Vec<&'a ProviderResult>,
}

impl Group<'_> {
    fn weighted_score(&self) -> f64 {
        self.members
            .iter()
            .map(|r| r.confidence * source_weight(&r.source))
            .sum()
    }

    fn mean_confidence(&self) -> f64 {
        self.members.iter().map(|r| r.confidence).sum::<f64>() / self.members.len() as f64
    }
}

/// Fuse a flat evidence list into one aggregate per field.
pub fn aggregate(results: &[ProviderResult]) -> Vec<AggregatedField> {
    aggregate_with_threshold(results, DEFAULT_AGREEMENT_THRESHOLD)
}

/// Fuse with a caller-supplied agreement threshold.
pub fn aggregate_with_threshold(
    results: &[ProviderResult],
    agreement_threshold: f64,
) -> Vec<AggregatedField> {
    let mut buckets: HashMap<Field, Vec<&ProviderResult>> = HashMap::new();
    for result in results {
        buckets.entry(result.field).or_default().push(result);
    }

    let mut fields: Vec<Field> = buckets.keys().copied().collect();
    fields.sort();

    fields
        .into_iter()
        .filter_map(|field| {
            let bucket = buckets.remove(&field)?;
            aggregate_field(field, bucket, agreement_threshold)
        })
        .collect()
}

fn aggregate_field(
    field: Field,
    bucket: Vec<&ProviderResult>,
    agreement_threshold: f64,
) -> Option<AggregatedField> {
    let all_results: Vec<ProviderResult> = bucket.iter().map(|r| (*r).clone()).collect();

    // Only results carrying a value participate in grouping. Sort into a
    // canonical order first so grouping is independent of arrival order.
    let mut valued: Vec<&ProviderResult> = bucket.into_iter().filter(|r| r.has_value()).collect();
    valued.sort_by(|a, b| {
        let ka = a.value.as_ref().map(normalize).unwrap_or_default();
        let kb = b.value.as_ref().map(normalize).unwrap_or_default();
        ka.cmp(&kb).then_with(|| a.source.cmp(&b.source))
    });
    if valued.is_empty() {
        return None;
    }

    let mut groups: Vec<Group> = Vec::new();
    for result in valued {
        let Some(value) = result.value.as_ref() else {
            continue;
        };
        let norm = normalize(value);
        match groups
            .iter_mut()
            .find(|g| similarity(&g.representative, &norm) >= agreement_threshold)
        {
            Some(group) => group.members.push(result),
            None => groups.push(Group {
                representative: norm,
                members: vec![result],
            }),
        }
    }

    // Winner by weighted score; ties break on the representative string so
    // permutations cannot flip the outcome.
    groups.sort_by(|a, b| {
        b.weighted_score()
            .partial_cmp(&a.weighted_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.representative.cmp(&b.representative))
    });
    let group_count = groups.len();
    let winner = groups.first()?;

    // The highest-weight member's value becomes canonical.
    let canonical_member = winner.members.iter().max_by(|a, b| {
        (source_weight(&a.source), a.confidence)
            .partial_cmp(&(source_weight(&b.source), b.confidence))
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    let canonical_value = canonical_member.value.clone()?;
    let canonical_source = canonical_member.source.clone();

    let mut sources: Vec<String> = winner.members.iter().map(|r| r.source.clone()).collect();
    sources.sort();
    sources.dedup();

    let mut confidence = winner.mean_confidence();
    if sources.len() >= 2 {
        confidence = (confidence + CONSENSUS_BOOST).min(1.0);
    }
    if group_count > 1 {
        confidence =
            (confidence - CONFLICT_PENALTY * (group_count as f64 - 1.0)).max(CONFIDENCE_FLOOR);
    }

    let conflicting_values = if group_count > 1 {
        Some(
            groups[1..]
                .iter()
                .filter_map(|g| g.members.first().and_then(|m| m.value.clone()))
                .collect(),
        )
    } else {
        None
    };

    Some(AggregatedField {
        field,
        canonical_value,
        canonical_source,
        confidence,
        sources,
        has_conflict: group_count > 1,
        conflicting_values,
        all_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn result(field: Field, value: &str, confidence: f64, source: &str) -> ProviderResult {
        ProviderResult::new(field, FieldValue::text(value), confidence, source)
    }

    #[test]
    fn test_similarity_rules() {
        assert_eq!(similarity("reddit", "reddit"), 1.0);
        // Containment: 0.7 + 0.3 * ratio.
        let s = similarity("reddit", "reddit inc");
        assert!((s - (0.7 + 0.3 * 6.0 / 10.0)).abs() < 1e-9);
        // Near-equal short strings via edit distance.
        assert!(similarity("acme corp", "acme corp.") > 0.85);
        assert!(similarity("reddit", "mozilla") < 0.5);
        assert_eq!(similarity("", "x"), 0.0);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_agreeing_sources_boost() {
        let single = aggregate(&[result(Field::Company, "Reddit", 0.7, "linkedin")]);
        let double = aggregate(&[
            result(Field::Company, "Reddit", 0.7, "linkedin"),
            result(Field::Company, "reddit", 0.7, "serper"),
        ]);
        // Two agreeing sources beat one, whatever its weight.
        assert!(double[0].confidence > single[0].confidence);
        assert_eq!(double[0].sources, vec!["linkedin", "serper"]);
        assert!(!double[0].has_conflict);
    }

    #[test]
    fn test_boost_caps_at_one() {
        let fused = aggregate(&[
            result(Field::Company, "Reddit", 0.97, "linkedin"),
            result(Field::Company, "Reddit", 0.99, "opencorporates"),
        ]);
        assert!(fused[0].confidence <= 1.0);
    }

    #[test]
    fn test_conflict_penalty_and_losers_exported() {
        let fused = aggregate(&[
            result(Field::Company, "Reddit", 0.8, "linkedin"),
            result(Field::Company, "Conde Nast", 0.8, "serper"),
        ]);
        let agg = &fused[0];
        assert!(agg.has_conflict);
        assert_eq!(agg.canonical_value.as_text(), Some("Reddit"));
        let losers = agg.conflicting_values.as_ref().unwrap();
        assert_eq!(losers.len(), 1);
        assert_eq!(losers[0].as_text(), Some("Conde Nast"));
        // 0.8 - 0.05 * 1
        assert!((agg.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_floor() {
        let results: Vec<ProviderResult> = (0..10)
            .map(|i| {
                result(
                    Field::Company,
                    &format!("company-number-{i}"),
                    0.2,
                    "serper",
                )
            })
            .collect();
        let fused = aggregate(&results);
        assert!(fused[0].confidence >= CONFIDENCE_FLOOR - 1e-9);
    }

    #[test]
    fn test_canonical_value_from_highest_weight_source() {
        let fused = aggregate(&[
            result(Field::Company, "reddit", 0.9, "serper"),
            result(Field::Company, "Reddit", 0.7, "linkedin"),
        ]);
        // Same group; linkedin's casing wins on weight.
        assert_eq!(fused[0].canonical_value.as_text(), Some("Reddit"));
    }

    #[test]
    fn test_not_found_results_do_not_group() {
        let fused = aggregate(&[
            ProviderResult::not_found(Field::Email, "hunter"),
            result(Field::Email, "a@b.co", 0.8, "hunter"),
        ]);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].all_results.len(), 2);
        assert_eq!(fused[0].sources, vec!["hunter"]);

        let nothing = aggregate(&[ProviderResult::not_found(Field::Email, "hunter")]);
        assert!(nothing.is_empty());
    }

    #[test]
    fn test_list_values_group_regardless_of_member_order() {
        let a = ProviderResult::new(
            Field::SocialLinks,
            FieldValue::list(vec!["x.com/a".into(), "github.com/a".into()]),
            0.7,
            "github",
        );
        let b = ProviderResult::new(
            Field::SocialLinks,
            FieldValue::list(vec!["github.com/a".into(), "x.com/a".into()]),
            0.7,
            "serper",
        );
        let fused = aggregate(&[a, b]);
        assert!(!fused[0].has_conflict);
        assert!(fused[0].confidence > 0.7);
    }

    proptest! {
        #[test]
        fn prop_aggregation_is_commutative(seed in 0u64..1000) {
            let base = vec![
                result(Field::Company, "Reddit", 0.8, "linkedin"),
                result(Field::Company, "reddit", 0.6, "serper"),
                result(Field::Company, "Conde Nast", 0.7, "opencorporates"),
                result(Field::Title, "CTO", 0.5, "serper"),
                result(Field::Title, "Chief Technology Officer", 0.9, "linkedin"),
            ];
            let mut permuted = base.clone();
            // Cheap deterministic shuffle driven by the seed.
            let n = permuted.len();
            for i in 0..n {
                let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 7)) % n;
                permuted.swap(i, j);
            }

            let first = aggregate(&base);
            let second = aggregate(&permuted);
            prop_assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(second.iter()) {
                prop_assert_eq!(&a.field, &b.field);
                prop_assert_eq!(&a.canonical_value, &b.canonical_value);
                prop_assert!((a.confidence - b.confidence).abs() < 1e-9);
            }
        }
    }
}
