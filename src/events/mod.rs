//! Security event records and the parallel-array storage encoding.
//!
//! Detector results are flattened into five same-length primitive arrays
//! for columnar insert and scan; the reader reconstructs object-shaped
//! results by index. Index alignment must be preserved on both sides —
//! a row is assembled fully before it is handed to the writer.

pub mod writer;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::detect::DetectorResult;

/// Maximum characters kept in the payload preview.
pub const PREVIEW_MAX_CHARS: usize = 500;

/// Detector results encoded as five parallel arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorColumns {
    pub names: Vec<String>,
    pub triggered: Vec<bool>,
    pub confidences: Vec<f64>,
    pub categories: Vec<String>,
    pub details: Vec<String>,
}

impl DetectorColumns {
    /// Flatten results in the order the engine presented them. The order
    /// is recorded here and never changed afterwards.
    pub fn from_results(results: &[DetectorResult]) -> Self {
        let mut columns = DetectorColumns {
            names: Vec::with_capacity(results.len()),
            triggered: Vec::with_capacity(results.len()),
            confidences: Vec::with_capacity(results.len()),
            categories: Vec::with_capacity(results.len()),
            details: Vec::with_capacity(results.len()),
        };
        for result in results {
            columns.names.push(result.name.clone());
            columns.triggered.push(result.triggered);
            columns.confidences.push(result.confidence);
            columns.categories.push(result.category.clone());
            columns.details.push(result.details.clone());
        }
        columns
    }

    /// Reconstruct object-shaped results by index (the read path).
    pub fn to_results(&self) -> Vec<DetectorResult> {
        (0..self.len())
            .map(|i| DetectorResult {
                name: self.names[i].clone(),
                category: self.categories[i].clone(),
                triggered: self.triggered[i],
                confidence: self.confidences[i],
                details: self.details[i].clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether all five arrays share the same length.
    pub fn is_aligned(&self) -> bool {
        let n = self.names.len();
        self.triggered.len() == n
            && self.confidences.len() == n
            && self.categories.len() == n
            && self.details.len() == n
    }
}

/// Immutable snapshot written after a verdict.
///
/// Carries the computed verdict even when shadow mode rewrote the
/// response; the event stream is the authoritative record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub request_id: Uuid,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub payload_preview: String,
    pub payload_sha256: String,
    pub payload_bytes: i64,
    pub verdict: String,
    pub is_shadow: bool,
    pub reason: String,
    pub detectors: DetectorColumns,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tenant_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<String>,
    pub metadata: HashMap<String, String>,
    pub latency_ms: f64,
    /// Which pipeline produced the event: `"payload"` or `"tool"`.
    pub source: String,
}

/// First [`PREVIEW_MAX_CHARS`] characters of the payload.
pub fn payload_preview(payload: &str) -> String {
    payload.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// Hex-encoded SHA-256 of the full payload.
pub fn payload_sha256(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorCategory;

    #[test]
    fn test_columns_round_trip_preserves_index_alignment() {
        let results = vec![
            DetectorResult::triggered("a", DetectorCategory::Pii, 0.9, "ssn"),
            DetectorResult::clear("b", DetectorCategory::PromptInjection),
            DetectorResult::triggered("c", DetectorCategory::SecretLeak, 0.5, "key"),
        ];
        let columns = DetectorColumns::from_results(&results);
        assert!(columns.is_aligned());
        assert_eq!(columns.len(), 3);

        let restored = columns.to_results();
        assert_eq!(restored.len(), results.len());
        for (orig, back) in results.iter().zip(&restored) {
            assert_eq!(orig.name, back.name);
            assert_eq!(orig.category, back.category);
            assert_eq!(orig.triggered, back.triggered);
            assert_eq!(orig.confidence, back.confidence);
            assert_eq!(orig.details, back.details);
        }
    }

    #[test]
    fn test_non_triggered_rows_carry_zero_confidence() {
        let columns = DetectorColumns::from_results(&[DetectorResult::clear(
            "x",
            DetectorCategory::Pii,
        )]);
        assert!(!columns.triggered[0]);
        assert_eq!(columns.confidences[0], 0.0);
    }

    #[test]
    fn test_payload_preview_bounded() {
        let long: String = "é".repeat(1200);
        let preview = payload_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);

        let short = payload_preview("hello");
        assert_eq!(short, "hello");
    }

    #[test]
    fn test_payload_hash_stable() {
        let a = payload_sha256("hello");
        let b = payload_sha256("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, payload_sha256("hello!"));
    }
}
