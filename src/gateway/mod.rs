//! HTTP gateway: check endpoints, admin API, and error mapping.

pub mod admin;
pub mod check;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::error::GuardError;
use crate::service::GuardService;
use crate::store::{EventStore, ProjectStore};

/// Shared state behind every handler.
pub struct GatewayState {
    pub service: GuardService,
    pub projects: Arc<dyn ProjectStore>,
    pub events: Arc<dyn EventStore>,
    /// When set, the admin API requires this bearer token.
    pub admin_token: Option<SecretString>,
}

/// Build the full router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let admin = admin::router()
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/v1/check", post(check::check_handler))
        .route("/v1/tool-check", post(check::tool_check_handler))
        .route("/healthz", get(health_handler))
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Stable error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// [`GuardError`] adapted to the HTTP surface.
pub struct ApiError(pub GuardError);

impl From<GuardError> for ApiError {
    fn from(error: GuardError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            GuardError::InvalidKey => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            GuardError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            GuardError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            GuardError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()),
            // Internal details stay in the logs.
            GuardError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

/// Extract the bearer token from an Authorization header value.
///
/// Scheme comparison is case-insensitive per RFC 6750 §2.1.
pub(crate) fn parse_bearer(value: &str) -> Option<&str> {
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("Bearer ") {
        Some(&value[7..])
    } else {
        None
    }
}

/// The bearer token from request headers, or 401.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .ok_or(ApiError(GuardError::InvalidKey))
}

/// Admin bearer auth. Open when no admin token is configured (dev mode);
/// constant-time comparison otherwise.
async fn admin_auth(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.admin_token else {
        return next.run(request).await;
    };
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok())
        && let Some(token) = parse_bearer(value)
        && bool::from(
            token
                .as_bytes()
                .ct_eq(expected.expose_secret().as_bytes()),
        )
    {
        return next.run(request).await;
    }
    ApiError(GuardError::InvalidKey).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("BEARER abc"), Some("abc"));
        assert_eq!(parse_bearer("Token abc"), None);
        assert_eq!(parse_bearer("Bearer"), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (GuardError::InvalidKey, StatusCode::UNAUTHORIZED),
            (
                GuardError::BadRequest("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (GuardError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (
                GuardError::Unavailable("x".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GuardError::Internal("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
