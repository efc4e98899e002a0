//! Provenance recording.
//!
//! One record per provider result, in insertion order. The recorder lives
//! for a single enrichment run; the caller receives the exported list in
//! the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::{Field, FieldValue, ProviderResult};

/// Full audit record of one provider result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Uuid,
    pub row_id: String,
    pub table_id: String,
    pub field: Field,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub cost_cents: u32,
}

/// Insertion-ordered provenance log for one run.
#[derive(Debug, Default)]
pub struct ProvenanceRecorder {
    records: Mutex<Vec<ProvenanceRecord>>,
}

impl ProvenanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one provider result.
    pub fn record(&self, row_id: &str, table_id: &str, result: &ProviderResult) {
        let record = ProvenanceRecord {
            id: Uuid::new_v4(),
            row_id: row_id.to_string(),
            table_id: table_id.to_string(),
            field: result.field,
            source: result.source.clone(),
            value: result.value.clone(),
            confidence: result.confidence,
            raw_response: result.raw.clone(),
            timestamp: result.timestamp,
            cost_cents: result.cost_cents,
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export all records in insertion order.
    pub fn export(&self) -> Vec<ProvenanceRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_insertion_order_preserved() {
        let recorder = ProvenanceRecorder::new();
        for (i, source) in ["serper", "hunter", "linkedin"].iter().enumerate() {
            let result = ProviderResult::new(
                Field::Company,
                FieldValue::text(format!("v{i}")),
                0.5,
                *source,
            );
            recorder.record("r1", "t1", &result);
        }

        let exported = recorder.export();
        assert_eq!(exported.len(), 3);
        let sources: Vec<&str> = exported.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["serper", "hunter", "linkedin"]);
    }

    #[test]
    fn test_ids_unique_per_run() {
        let recorder = ProvenanceRecorder::new();
        for _ in 0..10 {
            let result =
                ProviderResult::new(Field::Name, FieldValue::text("Ada"), 0.9, "linkedin");
            recorder.record("r1", "t1", &result);
        }
        let ids: HashSet<Uuid> = recorder.export().into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_record_carries_result_fields() {
        let recorder = ProvenanceRecorder::new();
        let result = ProviderResult::new(Field::Email, FieldValue::text("a@b.co"), 0.8, "hunter")
            .with_cost(2)
            .with_raw(serde_json::json!({"score": 80}));
        recorder.record("r9", "t2", &result);

        let record = &recorder.export()[0];
        assert_eq!(record.row_id, "r9");
        assert_eq!(record.table_id, "t2");
        assert_eq!(record.cost_cents, 2);
        assert_eq!(record.raw_response, Some(serde_json::json!({"score": 80})));
    }
}
