//! Admin API: project CRUD, key rotation, policy management, events, and
//! analytics.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::mint_key;
use crate::error::GuardError;
use crate::gateway::{ApiError, GatewayState};
use crate::policy::{ProjectMode, ProjectPolicy};
use crate::store::{AnalyticsSummary, EventFilter, ProjectRecord, ProjectUpdate};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route(
            "/projects/{id}",
            get(get_project).patch(patch_project).delete(delete_project),
        )
        .route("/projects/{id}/rotate-key", post(rotate_key))
        .route(
            "/projects/{id}/policy",
            get(get_policy).put(put_policy).patch(patch_policy),
        )
        .route("/events", get(list_events))
        .route("/events/{request_id}", get(get_event))
        .route("/analytics", get(analytics))
}

/// Project as exposed over the admin API; never includes the key hash.
#[derive(Debug, Serialize)]
pub struct ProjectInfo {
    pub project_id: String,
    pub name: String,
    pub mode: ProjectMode,
    pub fail_open: bool,
    pub key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectRecord> for ProjectInfo {
    fn from(record: ProjectRecord) -> Self {
        Self {
            project_id: record.project_id,
            name: record.name,
            mode: record.mode,
            fail_open: record.fail_open,
            key_prefix: record.key_prefix,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectBody {
    pub name: String,
    #[serde(default)]
    pub mode: ProjectMode,
    #[serde(default)]
    pub fail_open: bool,
}

/// Response carrying the plaintext API key; returned exactly once.
#[derive(Debug, Serialize)]
pub struct CreatedProject {
    #[serde(flatten)]
    pub project: ProjectInfo,
    pub api_key: String,
}

async fn mint_key_blocking() -> Result<crate::auth::MintedKey, ApiError> {
    tokio::task::spawn_blocking(|| mint_key(bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| ApiError(GuardError::Internal(e.to_string())))?
        .map_err(ApiError)
}

async fn create_project(
    State(state): State<Arc<GatewayState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<CreatedProject>), ApiError> {
    let body: CreateProjectBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError(GuardError::BadRequest(format!("invalid JSON body: {e}"))))?;
    if body.name.trim().is_empty() {
        return Err(ApiError(GuardError::BadRequest(
            "name must not be empty".to_string(),
        )));
    }

    let minted = mint_key_blocking().await?;
    let now = Utc::now();
    let record = ProjectRecord {
        project_id: Uuid::new_v4().to_string(),
        name: body.name,
        key_prefix: minted.prefix,
        key_hash: minted.hash,
        mode: body.mode,
        fail_open: body.fail_open,
        detector_config: None,
        created_at: now,
        updated_at: now,
    };
    state.projects.create_project(&record).await.map_err(GuardError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedProject {
            project: record.into(),
            api_key: minted.key,
        }),
    ))
}

async fn list_projects(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<ProjectInfo>>, ApiError> {
    let projects = state.projects.list_projects().await.map_err(GuardError::from)?;
    Ok(Json(projects.into_iter().map(ProjectInfo::from).collect()))
}

async fn get_project(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<ProjectInfo>, ApiError> {
    let record = state
        .projects
        .get_project(&id)
        .await
        .map_err(GuardError::from)?
        .ok_or_else(|| ApiError(GuardError::NotFound(format!("project '{id}'"))))?;
    Ok(Json(record.into()))
}

async fn patch_project(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<ProjectInfo>, ApiError> {
    let update: ProjectUpdate = serde_json::from_slice(&body)
        .map_err(|e| ApiError(GuardError::BadRequest(format!("invalid JSON body: {e}"))))?;
    if update.is_empty() {
        return Err(ApiError(GuardError::BadRequest(
            "no updatable fields in body".to_string(),
        )));
    }
    let found = state
        .projects
        .update_project(&id, &update)
        .await
        .map_err(GuardError::from)?;
    if !found {
        return Err(ApiError(GuardError::NotFound(format!("project '{id}'"))));
    }
    get_project(State(state), Path(id)).await
}

async fn delete_project(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .projects
        .delete_project(&id)
        .await
        .map_err(GuardError::from)?;
    if !deleted {
        return Err(ApiError(GuardError::NotFound(format!("project '{id}'"))));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct RotatedKey {
    project_id: String,
    api_key: String,
    key_prefix: String,
}

async fn rotate_key(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<RotatedKey>, ApiError> {
    let minted = mint_key_blocking().await?;
    let found = state
        .projects
        .update_key(&id, &minted.prefix, &minted.hash)
        .await
        .map_err(GuardError::from)?;
    if !found {
        return Err(ApiError(GuardError::NotFound(format!("project '{id}'"))));
    }
    // Stale cached entries for the old key fail re-verification within
    // one auth-cache TTL.
    Ok(Json(RotatedKey {
        project_id: id,
        api_key: minted.key,
        key_prefix: minted.prefix,
    }))
}

async fn get_policy(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_project(&state, &id).await?;
    let raw = state.projects.get_policy(&id).await.map_err(GuardError::from)?;
    let value = raw
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(value))
}

async fn put_policy(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError(GuardError::BadRequest(format!("invalid JSON body: {e}"))))?;
    if !value.is_object() && !value.is_null() {
        return Err(ApiError(GuardError::BadRequest(
            "policy must be a JSON object or null".to_string(),
        )));
    }
    store_policy(&state, &id, value).await
}

/// PATCH merges top-level detector keys into the stored policy; a null
/// value removes that detector's overrides.
async fn patch_policy(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let patch: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError(GuardError::BadRequest(format!("invalid JSON body: {e}"))))?;
    let serde_json::Value::Object(patch) = patch else {
        return Err(ApiError(GuardError::BadRequest(
            "policy patch must be a JSON object".to_string(),
        )));
    };

    require_project(&state, &id).await?;
    let mut current = state
        .projects
        .get_policy(&id)
        .await
        .map_err(GuardError::from)?
        .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    for (key, value) in patch {
        if value.is_null() {
            current.remove(&key);
        } else {
            current.insert(key, value);
        }
    }
    store_policy(&state, &id, serde_json::Value::Object(current)).await
}

async fn store_policy(
    state: &Arc<GatewayState>,
    id: &str,
    value: serde_json::Value,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Round-trip through the parser so a stored policy is always usable.
    let serialized = value.to_string();
    if !value.is_null() && ProjectPolicy::parse(&serialized).is_none() {
        return Err(ApiError(GuardError::BadRequest(
            "policy did not parse as a detector policy".to_string(),
        )));
    }
    let found = state
        .projects
        .put_policy(id, &serialized)
        .await
        .map_err(GuardError::from)?;
    if !found {
        return Err(ApiError(GuardError::NotFound(format!("project '{id}'"))));
    }
    Ok(Json(value))
}

async fn require_project(state: &Arc<GatewayState>, id: &str) -> Result<(), ApiError> {
    state
        .projects
        .get_project(id)
        .await
        .map_err(GuardError::from)?
        .map(|_| ())
        .ok_or_else(|| ApiError(GuardError::NotFound(format!("project '{id}'"))))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    project_id: String,
    verdict: Option<String>,
    action: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn list_events(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<crate::events::SecurityEvent>>, ApiError> {
    let filter = EventFilter {
        verdict: query.verdict,
        action: query.action,
        since: query.since,
        limit: query.limit.unwrap_or(100).min(1000),
    };
    let events = state
        .events
        .list_events(&query.project_id, &filter)
        .await
        .map_err(GuardError::from)?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    project_id: String,
}

async fn get_event(
    State(state): State<Arc<GatewayState>>,
    Path(request_id): Path<Uuid>,
    Query(query): Query<EventQuery>,
) -> Result<Json<crate::events::SecurityEvent>, ApiError> {
    let event = state
        .events
        .get_event(&query.project_id, request_id)
        .await
        .map_err(GuardError::from)?
        .ok_or_else(|| ApiError(GuardError::NotFound(format!("event '{request_id}'"))))?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    project_id: String,
    days: Option<u32>,
}

async fn analytics(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let days = query.days.unwrap_or(7).clamp(1, 365);
    let summary = state
        .events
        .analytics(&query.project_id, days)
        .await
        .map_err(GuardError::from)?;
    Ok(Json(summary))
}
