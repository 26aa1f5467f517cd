//! Contextual-rules evaluator: workflow gating and trace-windowed rate
//! limiting.

use async_trait::async_trait;

use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::CheckRequest;

const BLOCKED_WORKFLOW_CONFIDENCE: f64 = 0.95;
const UNLISTED_WORKFLOW_CONFIDENCE: f64 = 0.90;
const RATE_LIMIT_CONFIDENCE: f64 = 0.90;

/// Enforces per-tool workflow allow/block lists and the rate limit
/// counted over the caller-supplied trace.
pub struct ContextualRulesEvaluator;

#[async_trait]
impl Detector for ContextualRulesEvaluator {
    fn name(&self) -> &str {
        "contextual_rules"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::ContextualRules
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        let Some(tool_name) = request.tool_name() else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };
        let Some(definition) = &request.tool_definition else {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        };
        let rules = &definition.contextual_rules;
        let workflow = request.workflow_type.as_deref().unwrap_or("");

        if rules.blocked_workflows.iter().any(|w| w == workflow) {
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                BLOCKED_WORKFLOW_CONFIDENCE,
                format!("workflow '{workflow}' is blocked for tool '{tool_name}'"),
            ));
        }

        if !rules.allowed_workflows.is_empty()
            && !rules.allowed_workflows.iter().any(|w| w == workflow)
        {
            return Ok(DetectorResult::triggered(
                self.name(),
                self.category(),
                UNLISTED_WORKFLOW_CONFIDENCE,
                format!("workflow '{workflow}' is not allowed for tool '{tool_name}'"),
            ));
        }

        if let Some(limit) = rules.rate_limit
            && limit.max_calls > 0
            && limit.window_seconds > 0
        {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let window_ms = (limit.window_seconds as i64).saturating_mul(1000);
            let mut recent = 0u32;
            for entry in &request.trace {
                if deadline.expired() {
                    break;
                }
                // Zero timestamps mean "unknown" and never count.
                if entry.tool_name == tool_name
                    && entry.timestamp_ms > 0
                    && now_ms - entry.timestamp_ms <= window_ms
                {
                    recent += 1;
                }
            }
            if recent >= limit.max_calls {
                return Ok(DetectorResult::triggered(
                    self.name(),
                    self.category(),
                    RATE_LIMIT_CONFIDENCE,
                    format!(
                        "rate limit exceeded: {recent} calls to '{tool_name}' within {}s (max {})",
                        limit.window_seconds, limit.max_calls
                    ),
                ));
            }
        }

        Ok(DetectorResult::clear(self.name(), self.category()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ToolCall, TraceEntry};
    use crate::tools::{ContextualRules, RateLimitRule, ToolDefinition};
    use std::sync::Arc;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn request(rules: ContextualRules, workflow: Option<&str>, trace: Vec<TraceEntry>) -> CheckRequest {
        CheckRequest {
            tool_call: Some(ToolCall {
                function_name: "export_data".to_string(),
                arguments_json: "{}".to_string(),
            }),
            workflow_type: workflow.map(str::to_string),
            trace,
            tool_definition: Some(Arc::new(ToolDefinition {
                tool_name: "export_data".to_string(),
                contextual_rules: rules,
                ..ToolDefinition::default()
            })),
            ..CheckRequest::default()
        }
    }

    fn trace_entry(tool: &str, age_ms: i64) -> TraceEntry {
        TraceEntry {
            tool_name: tool.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis() - age_ms,
            ..TraceEntry::default()
        }
    }

    #[tokio::test]
    async fn test_blocked_workflow() {
        let rules = ContextualRules {
            blocked_workflows: vec!["onboarding".to_string()],
            ..ContextualRules::default()
        };
        let req = request(rules, Some("onboarding"), vec![]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.95);
        assert!(result.details.contains("blocked"));
    }

    #[tokio::test]
    async fn test_allow_list_excludes_unlisted_and_missing_workflow() {
        let rules = ContextualRules {
            allowed_workflows: vec!["support".to_string()],
            ..ContextualRules::default()
        };
        let req = request(rules.clone(), Some("billing"), vec![]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.90);

        // No workflow tag at all also fails a non-empty allow list.
        let req = request(rules.clone(), None, vec![]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);

        let req = request(rules, Some("support"), vec![]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let rules = ContextualRules {
            rate_limit: Some(RateLimitRule {
                max_calls: 2,
                window_seconds: 60,
            }),
            ..ContextualRules::default()
        };

        // Two recent calls to the same tool: at the limit, triggers.
        let trace = vec![
            trace_entry("export_data", 1_000),
            trace_entry("export_data", 5_000),
            // Different tool and out-of-window calls never count.
            trace_entry("other_tool", 1_000),
            trace_entry("export_data", 120_000),
            // Zero timestamp excluded.
            TraceEntry {
                tool_name: "export_data".to_string(),
                timestamp_ms: 0,
                ..TraceEntry::default()
            },
        ];
        let req = request(rules.clone(), None, trace);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.90);
        assert!(result.details.contains("rate limit exceeded: 2 calls"));

        // One recent call: under the limit.
        let req = request(rules, None, vec![trace_entry("export_data", 1_000)]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);
    }

    #[tokio::test]
    async fn test_no_rules_clears() {
        let req = request(ContextualRules::default(), Some("anything"), vec![]);
        let result = ContextualRulesEvaluator.evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);
    }
}
