//! Information-flow evaluator.
//!
//! Walks the trace for entries whose output labels intersect the tool's
//! blocked-source set, collects every string leaf from those entries'
//! result JSON, and triggers when any collected value of at least
//! [`MIN_TAINT_LEN`] characters reappears inside the arguments JSON.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;

const TAINT_CONFIDENCE: f64 = 0.90;
/// Values shorter than this never count; a precision control against
/// short-token false positives.
pub const MIN_TAINT_LEN: usize = 4;

/// Detects tainted data from blocked sources flowing into tool arguments.
pub struct InformationFlowEvaluator;

#[async_trait]
impl Detector for InformationFlowEvaluator {
    fn name(&self) -> &str {
        "information_flow"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::InformationFlow
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let Some(definition) = &request.tool_definition else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };
        let blocked: HashSet<&str> = definition
            .information_flow
            .blocked_source_labels
            .iter()
            .map(String::as_str)
            .collect();
        if blocked.is_empty() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }

        let arguments = request.arguments_json();
        let mut offending = 0usize;

        for entry in &request.trace {
            if deadline.expired() {
                break;
            }
            if !entry
                .output_labels
                .iter()
                .any(|label| blocked.contains(label.as_str()))
            {
                continue;
            }
            let Ok(result) = serde_json::from_str::<Value>(&entry.result_json) else {
                continue;
            };
            let mut leaves = Vec::new();
            collect_string_leaves(&result, &mut leaves);
            for leaf in leaves {
                if leaf.chars().count() >= MIN_TAINT_LEN && arguments.contains(&leaf) {
                    offending += 1;
                }
            }
        }

        if offending == 0 {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            TAINT_CONFIDENCE,
            format!("{offending} tainted value(s) from blocked sources appear in arguments"),
        ))
    }
}

/// Collect every string leaf in a JSON document.
fn collect_string_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_string_leaves(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_string_leaves(item, out);
            }
        }
        _ => {}
    }
}
