//! Persistence traits and backends.
//!
//! The core pipelines only ever see these traits. Two implementations
//! ship: an in-memory backend for tests and keyless dev runs, and a
//! PostgreSQL backend behind the default `postgres` feature. The event
//! table keeps detector results as five array columns so the
//! parallel-array encoding survives storage intact.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::SecurityEvent;
use crate::events::writer::EventSink;
use crate::policy::ProjectMode;

/// A project row in the credential store.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub project_id: String,
    pub name: String,
    /// First 8 characters of the API key, the lookup column.
    pub key_prefix: String,
    /// bcrypt hash of the full API key.
    pub key_hash: String,
    pub mode: ProjectMode,
    pub fail_open: bool,
    /// Raw detector policy JSON, parsed lazily by the verifier.
    pub detector_config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial project update for the admin PATCH surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub mode: Option<ProjectMode>,
    pub fail_open: Option<bool>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.mode.is_none() && self.fail_open.is_none()
    }
}

/// Projects, credentials, and per-project policies.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Look up a project by its key prefix (the verifier's hot path).
    async fn find_by_key_prefix(&self, prefix: &str)
    -> Result<Option<ProjectRecord>, StoreError>;

    async fn create_project(&self, record: &ProjectRecord) -> Result<(), StoreError>;

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StoreError>;

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError>;

    /// Returns false when the project does not exist.
    async fn update_project(
        &self,
        project_id: &str,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError>;

    async fn delete_project(&self, project_id: &str) -> Result<bool, StoreError>;

    /// Replace the key prefix and hash (key rotation).
    async fn update_key(
        &self,
        project_id: &str,
        key_prefix: &str,
        key_hash: &str,
    ) -> Result<bool, StoreError>;

    /// The raw detector policy JSON, `None` when unset.
    async fn get_policy(&self, project_id: &str) -> Result<Option<String>, StoreError>;

    /// Replace the detector policy JSON. Returns false for unknown projects.
    async fn put_policy(&self, project_id: &str, policy_json: &str) -> Result<bool, StoreError>;
}

/// Declarative tool definitions.
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// The raw definition JSON for `(project, tool)`, `None` when the
    /// tool is unregistered.
    async fn fetch_definition(
        &self,
        project_id: &str,
        tool_name: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// Filters for the admin events listing.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFilter {
    pub verdict: Option<String>,
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    100
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            verdict: None,
            action: None,
            since: None,
            limit: default_event_limit(),
        }
    }
}

/// Per-detector trigger count in the analytics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorCount {
    pub name: String,
    pub count: u64,
}

/// Aggregates over a project's recent events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_events: u64,
    /// Verdict → count.
    pub verdicts: HashMap<String, u64>,
    /// Detectors by trigger count, descending.
    pub top_detectors: Vec<DetectorCount>,
    pub shadow_events: u64,
    pub avg_latency_ms: f64,
}

/// The columnar event store: batch writes plus the admin read surface.
#[async_trait]
pub trait EventStore: EventSink {
    /// Most recent events first.
    async fn list_events(
        &self,
        project_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<SecurityEvent>, StoreError>;

    async fn get_event(
        &self,
        project_id: &str,
        request_id: Uuid,
    ) -> Result<Option<SecurityEvent>, StoreError>;

    async fn analytics(
        &self,
        project_id: &str,
        days: u32,
    ) -> Result<AnalyticsSummary, StoreError>;
}
