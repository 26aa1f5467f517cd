//! Check pipeline handlers.
//!
//! Bodies are parsed manually from bytes so malformed JSON produces the
//! same `{"detail": ...}` shape as every other error.

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};

use crate::error::GuardError;
use crate::gateway::{ApiError, GatewayState, bearer_token};
use crate::service::{CheckRequestBody, CheckResponse, ToolCheckRequestBody, ToolCheckResponse};

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(GuardError::BadRequest(format!("invalid JSON body: {e}"))))
}

/// `POST /v1/check` — the payload pipeline.
pub async fn check_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CheckResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let request: CheckRequestBody = parse_body(&body)?;
    let response = state.service.check_payload(token, request).await?;
    Ok(Json(response))
}

/// `POST /v1/tool-check` — the tool pipeline.
pub async fn tool_check_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ToolCheckResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let request: ToolCheckRequestBody = parse_body(&body)?;
    let response = state.service.check_tool(token, request).await?;
    Ok(Json(response))
}
