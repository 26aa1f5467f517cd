//! Request orchestration for both check pipelines.
//!
//! One [`GuardService`] instance lives for the process: authenticate,
//! resolve tool definitions, fan out detectors, aggregate, enqueue the
//! event, answer. Request data lives for the handler call only; nothing
//! is retained beyond the event record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::detect::aggregator::{
    Thresholds, ToolVerdict, Verdict, aggregate_payload, aggregate_tool, apply_shadow,
};
use crate::detect::engine::DetectionEngine;
use crate::detect::{Detector, DetectorResult};
use crate::error::GuardError;
use crate::events::writer::{EventSink, EventWriter};
use crate::events::{SecurityEvent, payload_preview, payload_sha256};
use crate::policy::{ProjectContext, ProjectMode};
use crate::request::{ActionKind, CheckRequest, Identity, ToolCall, TraceEntry};
use crate::store::{ProjectStore, ToolStore};
use crate::tools::ToolRegistry;
use crate::tools::evaluators::standard_evaluators;

/// Tunables the service needs from [`Config`](crate::config::Config).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub detector_timeout: Duration,
    pub block_threshold: f64,
    pub flag_threshold: f64,
    pub unsafe_threshold: f64,
    pub auth_cache_ttl: Duration,
    pub tool_cache_ttl: Duration,
}

impl From<&crate::config::Config> for ServiceConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            detector_timeout: config.detector_timeout,
            block_threshold: config.block_threshold,
            flag_threshold: config.flag_threshold,
            unsafe_threshold: config.unsafe_threshold,
            auth_cache_ttl: config.auth_cache_ttl,
            tool_cache_ttl: config.tool_cache_ttl,
        }
    }
}

/// Wire body for `POST /v1/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequestBody {
    pub payload: String,
    #[serde(default)]
    pub action: ActionKind,
    pub identity: Option<Identity>,
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub client_trace_id: Option<String>,
}

/// Wire response for `POST /v1/check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub verdict: Verdict,
    pub detectors: Vec<DetectorResult>,
    pub latency_ms: f64,
    pub request_id: Uuid,
    pub is_shadow: bool,
    pub reason: String,
}

/// Wire body for `POST /v1/tool-check`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCheckRequestBody {
    pub tool_name: String,
    #[serde(default)]
    pub arguments_json: String,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
    #[serde(default)]
    pub user_confirmed: bool,
    pub workflow_type: Option<String>,
    pub identity: Option<Identity>,
    pub client_trace_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Wire response for `POST /v1/tool-check`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCheckResponse {
    pub verdict: ToolVerdict,
    pub evaluations: Vec<DetectorResult>,
    pub latency_ms: f64,
    pub request_id: Uuid,
    pub reason: String,
    pub output_restrictions: Vec<String>,
}

/// The gateway core: both check pipelines over shared caches and writer.
pub struct GuardService {
    payload_engine: DetectionEngine,
    tool_engine: DetectionEngine,
    authenticator: Authenticator,
    registry: ToolRegistry,
    writer: EventWriter,
    thresholds: Thresholds,
    unsafe_threshold: f64,
}

impl GuardService {
    pub fn new(
        config: ServiceConfig,
        payload_detectors: Vec<Arc<dyn Detector>>,
        project_store: Arc<dyn ProjectStore>,
        tool_store: Arc<dyn ToolStore>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            payload_engine: DetectionEngine::new(payload_detectors, config.detector_timeout),
            tool_engine: DetectionEngine::new(standard_evaluators(), config.detector_timeout),
            authenticator: Authenticator::new(project_store, config.auth_cache_ttl),
            registry: ToolRegistry::new(tool_store, config.tool_cache_ttl),
            writer: EventWriter::spawn(event_sink),
            thresholds: Thresholds {
                block: config.block_threshold,
                flag: config.flag_threshold,
            },
            unsafe_threshold: config.unsafe_threshold,
        }
    }

    /// The payload pipeline: authenticate, fan out, aggregate, record.
    pub async fn check_payload(
        &self,
        token: &str,
        body: CheckRequestBody,
    ) -> Result<CheckResponse, GuardError> {
        let ctx = self.authenticator.authenticate(token).await?;
        if body.payload.is_empty() {
            return Err(GuardError::BadRequest("payload must not be empty".to_string()));
        }

        let request = Arc::new(CheckRequest {
            payload: body.payload,
            action: body.action,
            identity: body.identity,
            tool_call: body.tool_call,
            metadata: body.metadata,
            client_trace_id: body.client_trace_id,
            ..CheckRequest::default()
        });

        let output = self
            .payload_engine
            .run(Arc::clone(&request), ctx.policy.as_ref())
            .await;
        let (verdict, reason) =
            aggregate_payload(&output.results, ctx.policy.as_ref(), self.thresholds);
        let (response_verdict, is_shadow) = apply_shadow(verdict, ctx.mode);

        let request_id = Uuid::new_v4();
        let latency_ms = output.elapsed.as_secs_f64() * 1000.0;

        self.writer.write(build_event(
            request_id,
            &ctx,
            &request,
            &request.payload,
            verdict.as_str(),
            is_shadow,
            &reason,
            &output.results,
            latency_ms,
            "payload",
        ));

        Ok(CheckResponse {
            verdict: response_verdict,
            detectors: output.results,
            latency_ms,
            request_id,
            is_shadow,
            reason,
        })
    }

    /// The tool pipeline: resolve the definition once, then fan out the
    /// evaluators with it attached to the request.
    pub async fn check_tool(
        &self,
        token: &str,
        body: ToolCheckRequestBody,
    ) -> Result<ToolCheckResponse, GuardError> {
        let ctx = self.authenticator.authenticate(token).await?;
        if body.tool_name.is_empty() {
            return Err(GuardError::BadRequest("tool_name must not be empty".to_string()));
        }

        let definition = self.registry.lookup(&ctx.project_id, &body.tool_name).await?;
        let output_restrictions = definition
            .as_ref()
            .map(|d| d.information_flow.output_restrictions.clone())
            .unwrap_or_default();

        let request = Arc::new(CheckRequest {
            payload: body.arguments_json.clone(),
            action: ActionKind::ToolCall,
            identity: body.identity,
            tool_call: Some(ToolCall {
                function_name: body.tool_name.clone(),
                arguments_json: body.arguments_json,
            }),
            trace: body.trace,
            workflow_type: body.workflow_type,
            user_confirmed: body.user_confirmed,
            metadata: body.metadata,
            client_trace_id: body.client_trace_id,
            tool_definition: definition,
            ..CheckRequest::default()
        });

        let output = self
            .tool_engine
            .run(Arc::clone(&request), ctx.policy.as_ref())
            .await;
        let (verdict, reason) = aggregate_tool(&output.results, self.unsafe_threshold);

        // Shadow projection mirrors the payload pipeline: the caller sees
        // `safe`, the event keeps the computed verdict.
        let (response_verdict, is_shadow) = match ctx.mode {
            ProjectMode::Enforce => (verdict, false),
            ProjectMode::Shadow => (ToolVerdict::Safe, true),
        };

        let request_id = Uuid::new_v4();
        let latency_ms = output.elapsed.as_secs_f64() * 1000.0;

        self.writer.write(build_event(
            request_id,
            &ctx,
            &request,
            &request.payload,
            verdict.as_str(),
            is_shadow,
            &reason,
            &output.results,
            latency_ms,
            "tool",
        ));

        Ok(ToolCheckResponse {
            verdict: response_verdict,
            evaluations: output.results,
            latency_ms,
            request_id,
            reason,
            output_restrictions,
        })
    }

    /// Token → project resolution, shared with the admin surface.
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Tool definition cache, shared with the admin surface.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Drain and stop the event writer.
    pub async fn close(&self) {
        self.writer.close().await;
    }
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    request_id: Uuid,
    ctx: &ProjectContext,
    request: &CheckRequest,
    payload: &str,
    verdict: &str,
    is_shadow: bool,
    reason: &str,
    results: &[DetectorResult],
    latency_ms: f64,
    source: &str,
) -> SecurityEvent {
    let identity = request.identity.as_ref();
    SecurityEvent {
        request_id,
        project_id: ctx.project_id.clone(),
        timestamp: chrono::Utc::now(),
        action: request.action.as_str().to_string(),
        payload_preview: payload_preview(payload),
        payload_sha256: payload_sha256(payload),
        payload_bytes: payload.len() as i64,
        verdict: verdict.to_string(),
        is_shadow,
        reason: reason.to_string(),
        detectors: crate::events::DetectorColumns::from_results(results),
        user_id: identity.and_then(|i| i.user_id.clone()),
        session_id: identity.and_then(|i| i.session_id.clone()),
        tenant_id: identity.and_then(|i| i.tenant_id.clone()),
        tool_name: request.tool_call.as_ref().map(|t| t.function_name.clone()),
        tool_args: request.tool_call.as_ref().map(|t| t.arguments_json.clone()),
        metadata: request.metadata.clone(),
        latency_ms,
        source: source.to_string(),
    }
}
