//! Declarative per-tool policy definitions.
//!
//! Definitions are authored as JSON documents in the relational store and
//! parsed leniently: `null`, `{}`, and `[]` are all accepted for nested
//! fields, unknown keys are ignored, and a malformed nested field degrades
//! to its default instead of rejecting the whole document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How dangerous a tool is when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    #[default]
    Read,
    Write,
    Destructive,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Read => "read",
            RiskTier::Write => "write",
            RiskTier::Destructive => "destructive",
        }
    }
}

/// Scanning and binding rules for a tool's arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentPolicy {
    #[serde(default)]
    pub scan_for_pii: bool,
    #[serde(default)]
    pub scan_for_injection: bool,
    /// Argument name → `"tool.result.field"` path whose trace value the
    /// argument must equal.
    #[serde(default)]
    pub trace_binding: HashMap<String, String>,
}

/// Trace-windowed rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_calls: u32,
    pub window_seconds: u64,
}

/// Workflow gating and rate limiting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextualRules {
    #[serde(default)]
    pub allowed_workflows: Vec<String>,
    #[serde(default)]
    pub blocked_workflows: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,
}

/// Information-flow labels and restrictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InformationFlow {
    #[serde(default)]
    pub blocked_source_labels: Vec<String>,
    #[serde(default)]
    pub output_restrictions: Vec<String>,
}

/// A tool's full declarative policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub tool_name: String,
    #[serde(default)]
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Tool names that must appear in the trace before this tool runs.
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// JSON Schema for the arguments object, when declared.
    #[serde(default)]
    pub argument_schema: Option<Value>,
    #[serde(default)]
    pub argument_policy: ArgumentPolicy,
    #[serde(default)]
    pub contextual_rules: ContextualRules,
    #[serde(default)]
    pub information_flow: InformationFlow,
}

impl ToolDefinition {
    /// Parse a stored definition document.
    ///
    /// Returns `None` for invalid JSON or a non-object top level (logged).
    /// Nested fields degrade individually.
    pub fn parse(json: &str) -> Option<ToolDefinition> {
        let value: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "invalid tool definition JSON");
                return None;
            }
        };
        let Value::Object(map) = value else {
            tracing::warn!("tool definition is not a JSON object");
            return None;
        };

        let risk_tier = map
            .get("risk_tier")
            .and_then(Value::as_str)
            .and_then(|s| match s {
                "read" => Some(RiskTier::Read),
                "write" => Some(RiskTier::Write),
                "destructive" => Some(RiskTier::Destructive),
                other => {
                    tracing::warn!(risk_tier = other, "unknown risk tier, defaulting to read");
                    None
                }
            })
            .unwrap_or_default();

        let argument_schema = map
            .get("argument_schema")
            .filter(|v| v.is_object())
            .cloned();

        Some(ToolDefinition {
            tool_name: map
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            risk_tier,
            requires_confirmation: map
                .get("requires_confirmation")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            preconditions: string_list(map.get("preconditions")),
            argument_schema,
            argument_policy: lenient_object(map.get("argument_policy")),
            contextual_rules: lenient_object(map.get("contextual_rules")),
            information_flow: lenient_object(map.get("information_flow")),
        })
    }
}

/// Deserialize a nested object field, treating `null`, `[]`, non-objects,
/// and structurally invalid objects as the default value.
fn lenient_object<T>(value: Option<&Value>) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match value {
        Some(v) if v.is_object() => serde_json::from_value(v.clone()).unwrap_or_default(),
        _ => T::default(),
    }
}

/// Extract a list of strings, dropping non-string elements.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
