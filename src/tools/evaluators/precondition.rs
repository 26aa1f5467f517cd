//! Precondition evaluator.

use async_trait::async_trait;

use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;

const MISSING_CONFIDENCE: f64 = 0.95;

/// Requires every tool named in the definition's `preconditions` to have
/// appeared in the caller-supplied trace.
pub struct PreconditionEvaluator;

#[async_trait]
impl Detector for PreconditionEvaluator {
    fn name(&self) -> &str {
        "precondition"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::Precondition
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let Some(definition) = &request.tool_definition else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };
        if definition.preconditions.is_empty() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }

        let mut missing = Vec::new();
        for required in &definition.preconditions {
            if deadline.expired() {
                break;
            }
            if !request.trace.iter().any(|entry| &entry.tool_name == required) {
                missing.push(required.as_str());
            }
        }

        if missing.is_empty() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            MISSING_CONFIDENCE,
            format!("missing preconditions: {}", missing.join(", ")),
        ))
    }
}
