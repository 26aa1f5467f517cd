//! The in-flight request model shared by every detector.
//!
//! A [`CheckRequest`] is assembled by the service from the RPC body plus
//! anything the engine attaches for a specific worker (per-project tool
//! allow/block lists, the resolved tool definition). Detectors receive it
//! behind an `Arc` and must never mutate it; attachment happens by
//! shallow-cloning before dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;

/// What kind of content is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    LlmInput,
    LlmOutput,
    ToolCall,
    ToolResult,
    RagRetrieval,
    ChainOfThought,
    DbQuery,
    Custom,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::LlmInput => "llm_input",
            ActionKind::LlmOutput => "llm_output",
            ActionKind::ToolCall => "tool_call",
            ActionKind::ToolResult => "tool_result",
            ActionKind::RagRetrieval => "rag_retrieval",
            ActionKind::ChainOfThought => "chain_of_thought",
            ActionKind::DbQuery => "db_query",
            ActionKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied identity fields, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// A tool invocation: function name plus arguments as raw JSON text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function_name: String,
    #[serde(default)]
    pub arguments_json: String,
}

/// One prior tool invocation in the caller-supplied trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceEntry {
    pub tool_name: String,
    #[serde(default)]
    pub result_json: String,
    #[serde(default)]
    pub output_labels: Vec<String>,
    /// Millisecond unix timestamp; zero means "unknown" and is excluded
    /// from rate-limit windows.
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// The request as seen by detectors.
#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    /// Opaque UTF-8 payload under inspection.
    pub payload: String,
    pub action: ActionKind,
    pub identity: Option<Identity>,
    pub tool_call: Option<ToolCall>,
    /// Ordered sequence of prior tool invocations.
    pub trace: Vec<TraceEntry>,
    pub workflow_type: Option<String>,
    pub user_confirmed: bool,
    pub metadata: HashMap<String, String>,
    pub client_trace_id: Option<String>,

    /// Per-project tool allow list, attached by the engine for workers
    /// whose policy override carries one.
    pub allowed_tools: Option<Vec<String>>,
    /// Per-project tool block list, attached by the engine.
    pub blocked_tools: Option<Vec<String>>,
    /// Resolved declarative tool definition, attached by the service for
    /// tool checks. `None` with `tool_call` set means "unregistered tool".
    pub tool_definition: Option<Arc<ToolDefinition>>,
}

impl CheckRequest {
    /// The tool name under evaluation, if this is a tool invocation.
    pub fn tool_name(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|t| t.function_name.as_str())
    }

    /// The raw arguments JSON, empty string when absent.
    pub fn arguments_json(&self) -> &str {
        self.tool_call
            .as_ref()
            .map(|t| t.arguments_json.as_str())
            .unwrap_or("")
    }
}
