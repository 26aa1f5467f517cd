//! Risk-tier evaluator.

use async_trait::async_trait;

use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;
use crate::tools::RiskTier;

/// Confidence for an unregistered tool: below the default unsafe
/// threshold so the verdict stays `safe`, but visible for audit.
const UNREGISTERED_CONFIDENCE: f64 = 0.5;
/// Confidence for an unconfirmed destructive invocation.
const UNCONFIRMED_CONFIDENCE: f64 = 0.95;

/// Flags destructive tools invoked without user confirmation, and marks
/// invocations of tools that have no registered definition.
pub struct RiskTierEvaluator;

#[async_trait]
impl Detector for RiskTierEvaluator {
    fn name(&self) -> &str {
        "risk_tier"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::RiskTier
    }

    async fn evaluate(
        &self,
        _deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let Some(tool_name) = request.tool_name() else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };

        let Some(definition) = &request.tool_definition else {
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                UNREGISTERED_CONFIDENCE,
                format!("tool '{tool_name}' is not registered"),
            ));
        };

        if definition.risk_tier == RiskTier::Destructive
            && definition.requires_confirmation
            && !request.user_confirmed
        {
            // The aggregator keys its needs-confirmation gate on this
            // exact detail phrasing.
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                UNCONFIRMED_CONFIDENCE,
                "destructive tool requires user confirmation",
            ));
        }

        Ok(DetectorResult::clear(self.name(), self.category()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ToolCall;
    use crate::tools::ToolDefinition;
    use std::sync::Arc;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn request(definition: Option<ToolDefinition>, confirmed: bool) -> CheckRequest {
        CheckRequest {
            tool_call: Some(ToolCall {
                function_name: "drop_database".to_string(),
                arguments_json: "{}".to_string(),
            }),
            user_confirmed: confirmed,
            tool_definition: definition.map(Arc::new),
            ..CheckRequest::default()
        }
    }

    fn destructive() -> ToolDefinition {
        ToolDefinition {
            tool_name: "drop_database".to_string(),
            risk_tier: RiskTier::Destructive,
            requires_confirmation: true,
            ..ToolDefinition::default()
        }
    }

    #[tokio::test]
    async fn test_unregistered_tool_half_confidence() {
        let result = RiskTierEvaluator
            .evaluate(&deadline(), &request(None, false))
            .await
            .unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.5);
        assert!(result.details.contains("not registered"));
    }

    #[tokio::test]
    async fn test_destructive_unconfirmed_triggers() {
        let result = RiskTierEvaluator
            .evaluate(&deadline(), &request(Some(destructive()), false))
            .await
            .unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.details, "destructive tool requires user confirmation");
    }

    #[tokio::test]
    async fn test_destructive_confirmed_clears() {
        let result = RiskTierEvaluator
            .evaluate(&deadline(), &request(Some(destructive()), true))
            .await
            .unwrap();
        assert!(!result.triggered);
    }

    #[tokio::test]
    async fn test_read_tool_clears() {
        let definition = ToolDefinition {
            tool_name: "get_weather".to_string(),
            ..ToolDefinition::default()
        };
        let result = RiskTierEvaluator
            .evaluate(&deadline(), &request(Some(definition), false))
            .await
            .unwrap();
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
    }
}
