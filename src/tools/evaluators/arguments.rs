//! Argument-validation evaluator.
//!
//! Four steps in order, each deadline-checked: JSON-Schema instance
//! validation, PII scanning, injection scanning (always on for
//! unregistered tools), and trace-binding equality checks. Issues
//! accumulate into one detail string; the confidence is the maximum
//! observed across the steps.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::detect::patterns::PatternCatalog;
use crate::detect::{Deadline, Detector, DetectorCategory, DetectorResult};
use crate::error::DetectorError;
use crate::request::{CheckRequest, TraceEntry};

const SCHEMA_CONFIDENCE: f64 = 0.90;
const PII_CONFIDENCE: f64 = 0.90;
const INJECTION_CONFIDENCE: f64 = 0.95;
const BINDING_CONFIDENCE: f64 = 0.90;

/// Validates tool arguments against the definition's declarative policy.
pub struct ArgumentEvaluator {
    pii: Arc<PatternCatalog>,
    injection: Arc<PatternCatalog>,
}

impl ArgumentEvaluator {
    pub fn new() -> Self {
        Self {
            pii: Arc::new(PatternCatalog::pii()),
            injection: Arc::new(PatternCatalog::query_injection()),
        }
    }
}

impl Default for ArgumentEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for ArgumentEvaluator {
    fn name(&self) -> &str {
        "argument_validation"
    }

    fn category(&self) -> DetectorCategory {
        DetectorCategory::ArgumentValidation
    }

    async fn evaluate(
        &self,
        deadline: &Deadline,
        request: &CheckRequest,
    ) -> Result<DetectorResult, DetectorError> {
        if request.tool_call.is_none() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }

        let args_text = request.arguments_json();
        let args_value: Option<Value> = serde_json::from_str(args_text).ok();
        let definition = request.tool_definition.as_deref();

        let mut issues: Vec<String> = Vec::new();
        let mut confidence = 0.0_f64;
        let mut note = |issue: String, level: f64, confidence: &mut f64| {
            issues.push(issue);
            if level > *confidence {
                *confidence = level;
            }
        };

        // (a) JSON-Schema instance validation.
        if let Some(schema) = definition.and_then(|d| d.argument_schema.as_ref())
            && !deadline.expired()
        {
            match &args_value {
                Some(instance) => {
                    let errors = validate_instance(schema, instance);
                    if !errors.is_empty() {
                        note(
                            format!("schema validation failed: {}", errors.join(", ")),
                            SCHEMA_CONFIDENCE,
                            &mut confidence,
                        );
                    }
                }
                None => note(
                    "schema validation failed: arguments are not valid JSON".to_string(),
                    SCHEMA_CONFIDENCE,
                    &mut confidence,
                ),
            }
        }

        // (b) PII scanning, opt-in per definition.
        if definition.is_some_and(|d| d.argument_policy.scan_for_pii) && !deadline.expired() {
            let outcome = self.pii.scan(args_text, deadline);
            if !outcome.is_clean() {
                note(
                    format!("PII in arguments: {}", outcome.matched.join(", ")),
                    PII_CONFIDENCE,
                    &mut confidence,
                );
            }
        }

        // (c) Injection scanning, always on for unregistered tools.
        let scan_injection =
            definition.map(|d| d.argument_policy.scan_for_injection).unwrap_or(true);
        if scan_injection && !deadline.expired() {
            let outcome = self.injection.scan(args_text, deadline);
            if !outcome.is_clean() {
                note(
                    format!("injection patterns in arguments: {}", outcome.matched.join(", ")),
                    INJECTION_CONFIDENCE,
                    &mut confidence,
                );
            }
        }

        // (d) Trace-binding equality.
        if let Some(definition) = definition
            && !definition.argument_policy.trace_binding.is_empty()
        {
            for (arg_name, path) in &definition.argument_policy.trace_binding {
                if deadline.expired() {
                    break;
                }
                let argument = args_value.as_ref().and_then(|v| v.get(arg_name));
                match (argument, bound_value(&request.trace, path)) {
                    (Some(argument), Some(expected)) => {
                        if value_as_string(argument) != value_as_string(&expected) {
                            note(
                                format!(
                                    "argument '{arg_name}' does not match trace value at '{path}'"
                                ),
                                BINDING_CONFIDENCE,
                                &mut confidence,
                            );
                        }
                    }
                    _ => note(
                        format!("argument '{arg_name}' has no trace value at '{path}'"),
                        BINDING_CONFIDENCE,
                        &mut confidence,
                    ),
                }
            }
        }

        if issues.is_empty() {
            return Ok(DetectorResult::clear(self.name(), self.category()));
        }
        Ok(DetectorResult::triggered(
            self.name(),
            self.category(),
            confidence,
            issues.join("; "),
        ))
    }
}

/// Validate an instance against a JSON Schema, returning human-readable
/// violation messages.
fn validate_instance(schema: &Value, instance: &Value) -> Vec<String> {
    match jsonschema::validator_for(schema) {
        Ok(validator) => validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path().to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{path}: {error}")
                }
            })
            .collect(),
        Err(error) => vec![format!("unusable argument schema: {error}")],
    }
}

/// Resolve a `"tool.result.field"` path against the trace.
///
/// The first segment names the tool (latest matching entry wins), the
/// second must be the literal `result`, and the rest walk the entry's
/// result JSON.
fn bound_value(trace: &[TraceEntry], path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let tool = parts.next()?;
    if parts.next()? != "result" {
        return None;
    }
    let entry = trace.iter().rev().find(|t| t.tool_name == tool)?;
    let root: Value = serde_json::from_str(&entry.result_json).ok()?;
    let mut current = root;
    for part in parts {
        current = current.get(part)?.clone();
    }
    Some(current)
}

/// String projection used for binding equality: strings compare raw,
/// everything else compares through its JSON rendering.
fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ToolCall;
    use crate::tools::{ArgumentPolicy, ToolDefinition};
    use std::collections::HashMap;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn request_with(
        arguments: &str,
        definition: Option<ToolDefinition>,
        trace: Vec<TraceEntry>,
    ) -> CheckRequest {
        CheckRequest {
            tool_call: Some(ToolCall {
                function_name: "get_weather".to_string(),
                arguments_json: arguments.to_string(),
            }),
            trace,
            tool_definition: definition.map(Arc::new),
            ..CheckRequest::default()
        }
    }

    fn weather_schema_definition() -> ToolDefinition {
        ToolDefinition {
            tool_name: "get_weather".to_string(),
            argument_schema: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string"},
                    "unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}
                },
                "required": ["location"],
                "additionalProperties": false
            })),
            ..ToolDefinition::default()
        }
    }

    #[tokio::test]
    async fn test_schema_enum_violation() {
        let req = request_with(
            r#"{"location": "Tokyo", "unit": "kelvin"}"#,
            Some(weather_schema_definition()),
            vec![],
        );
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert!(result.confidence >= 0.9);
        assert!(result.details.contains("schema validation failed"));
    }

    #[tokio::test]
    async fn test_schema_missing_required_and_extra_field() {
        let req = request_with(
            r#"{"unit": "celsius", "extra": 1}"#,
            Some(weather_schema_definition()),
            vec![],
        );
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert!(result.details.contains("schema validation failed"));
    }

    #[tokio::test]
    async fn test_valid_arguments_pass() {
        let req = request_with(
            r#"{"location": "Tokyo", "unit": "celsius"}"#,
            Some(weather_schema_definition()),
            vec![],
        );
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_pii_scan_opt_in() {
        let definition = ToolDefinition {
            tool_name: "t".to_string(),
            argument_policy: ArgumentPolicy {
                scan_for_pii: true,
                ..ArgumentPolicy::default()
            },
            ..ToolDefinition::default()
        };
        let req = request_with(r#"{"ssn": "123-45-6789"}"#, Some(definition), vec![]);
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert!(result.details.contains("PII in arguments"));

        // Without the opt-in, the same arguments pass.
        let definition = ToolDefinition {
            tool_name: "t".to_string(),
            ..ToolDefinition::default()
        };
        let req = request_with(r#"{"ssn": "123-45-6789"}"#, Some(definition), vec![]);
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);
    }

    #[tokio::test]
    async fn test_injection_scan_always_on_for_unregistered() {
        let req = request_with(r#"{"q": "1 OR 1=1; DROP TABLE users"}"#, None, vec![]);
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 0.95);
        assert!(result.details.contains("injection patterns in arguments"));
    }

    #[tokio::test]
    async fn test_trace_binding_mismatch_and_match() {
        let mut binding = HashMap::new();
        binding.insert("user_id".to_string(), "lookup_user.result.id".to_string());
        let definition = ToolDefinition {
            tool_name: "delete_user".to_string(),
            argument_policy: ArgumentPolicy {
                trace_binding: binding,
                ..ArgumentPolicy::default()
            },
            ..ToolDefinition::default()
        };
        let trace = vec![TraceEntry {
            tool_name: "lookup_user".to_string(),
            result_json: r#"{"id": "u-42"}"#.to_string(),
            ..TraceEntry::default()
        }];

        let req = request_with(r#"{"user_id": "u-42"}"#, Some(definition.clone()), trace.clone());
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(!result.triggered);

        let req = request_with(r#"{"user_id": "u-99"}"#, Some(definition.clone()), trace);
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert!(result.details.contains("does not match trace value"));

        // Missing trace entry entirely.
        let req = request_with(r#"{"user_id": "u-42"}"#, Some(definition), vec![]);
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        assert!(result.details.contains("no trace value"));
    }

    #[tokio::test]
    async fn test_issues_accumulate_with_max_confidence() {
        let mut definition = weather_schema_definition();
        definition.argument_policy.scan_for_injection = true;
        let req = request_with(
            r#"{"location": "x'; DROP TABLE users; --", "unit": "kelvin"}"#,
            Some(definition),
            vec![],
        );
        let result = ArgumentEvaluator::new().evaluate(&deadline(), &req).await.unwrap();
        assert!(result.triggered);
        // Schema (0.90) and injection (0.95) both fire; max wins.
        assert_eq!(result.confidence, 0.95);
        assert!(result.details.contains("; "));
    }

    #[test]
    fn test_bound_value_latest_entry_wins() {
        let trace = vec![
            TraceEntry {
                tool_name: "lookup".to_string(),
                result_json: r#"{"id": "old"}"#.to_string(),
                ..TraceEntry::default()
            },
            TraceEntry {
                tool_name: "lookup".to_string(),
                result_json: r#"{"id": "new"}"#.to_string(),
                ..TraceEntry::default()
            },
        ];
        let value = bound_value(&trace, "lookup.result.id").unwrap();
        assert_eq!(value, serde_json::json!("new"));
        assert!(bound_value(&trace, "lookup.result.missing").is_none());
        assert!(bound_value(&trace, "lookup.output.id").is_none());
    }
}
