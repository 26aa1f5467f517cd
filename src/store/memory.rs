//! In-memory store backend.
//!
//! Backs tests and keyless dev runs. Semantics mirror the PostgreSQL
//! backend: prefix lookups, key rotation, filtered event listing, and the
//! analytics aggregates, minus durability.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::SecurityEvent;
use crate::events::writer::EventSink;
use crate::store::{
    AnalyticsSummary, DetectorCount, EventFilter, EventStore, ProjectRecord, ProjectStore,
    ProjectUpdate, ToolStore,
};

/// Shared in-memory backend implementing every store trait.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectRecord>>,
    /// `(project_id, tool_name)` → definition JSON.
    tools: Mutex<HashMap<(String, String), String>>,
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool definition document (test/dev setup).
    pub fn put_tool_definition(&self, project_id: &str, tool_name: &str, definition_json: &str) {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (project_id.to_string(), tool_name.to_string()),
                definition_json.to_string(),
            );
    }

    /// Number of stored events (test assertions).
    pub fn event_count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn find_by_key_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<ProjectRecord>, StoreError> {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.values().find(|p| p.key_prefix == prefix).cloned())
    }

    async fn create_project(&self, record: &ProjectRecord) -> Result<(), StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        if projects.contains_key(&record.project_id) {
            return Err(StoreError::Query(format!(
                "project '{}' already exists",
                record.project_id
            )));
        }
        projects.insert(record.project_id.clone(), record.clone());
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StoreError> {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.get(project_id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<ProjectRecord> = projects.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update_project(
        &self,
        project_id: &str,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = projects.get_mut(project_id) else {
            return Ok(false);
        };
        if let Some(name) = &update.name {
            record.name = name.clone();
        }
        if let Some(mode) = update.mode {
            record.mode = mode;
        }
        if let Some(fail_open) = update.fail_open {
            record.fail_open = fail_open;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool, StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.remove(project_id).is_some())
    }

    async fn update_key(
        &self,
        project_id: &str,
        key_prefix: &str,
        key_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = projects.get_mut(project_id) else {
            return Ok(false);
        };
        record.key_prefix = key_prefix.to_string();
        record.key_hash = key_hash.to_string();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_policy(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(projects
            .get(project_id)
            .and_then(|p| p.detector_config.clone()))
    }

    async fn put_policy(&self, project_id: &str, policy_json: &str) -> Result<bool, StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = projects.get_mut(project_id) else {
            return Ok(false);
        };
        record.detector_config = Some(policy_json.to_string());
        record.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl ToolStore for MemoryStore {
    async fn fetch_definition(
        &self,
        project_id: &str,
        tool_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tools
            .get(&(project_id.to_string(), tool_name.to_string()))
            .cloned())
    }
}

#[async_trait]
impl EventSink for MemoryStore {
    async fn insert_events(&self, events: &[SecurityEvent]) -> Result<(), StoreError> {
        let mut stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        stored.extend_from_slice(events);
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn list_events(
        &self,
        project_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<SecurityEvent> = stored
            .iter()
            .filter(|e| e.project_id == project_id)
            .filter(|e| {
                filter
                    .verdict
                    .as_ref()
                    .is_none_or(|v| &e.verdict == v)
            })
            .filter(|e| filter.action.as_ref().is_none_or(|a| &e.action == a))
            .filter(|e| filter.since.is_none_or(|s| e.timestamp >= s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(filter.limit);
        Ok(matching)
    }

    async fn get_event(
        &self,
        project_id: &str,
        request_id: Uuid,
    ) -> Result<Option<SecurityEvent>, StoreError> {
        let stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored
            .iter()
            .find(|e| e.project_id == project_id && e.request_id == request_id)
            .cloned())
    }

    async fn analytics(
        &self,
        project_id: &str,
        days: u32,
    ) -> Result<AnalyticsSummary, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let stored = self.events.lock().unwrap_or_else(PoisonError::into_inner);

        let mut summary = AnalyticsSummary::default();
        let mut detector_counts: HashMap<String, u64> = HashMap::new();
        let mut latency_total = 0.0;

        for event in stored
            .iter()
            .filter(|e| e.project_id == project_id && e.timestamp >= cutoff)
        {
            summary.total_events += 1;
            *summary.verdicts.entry(event.verdict.clone()).or_default() += 1;
            if event.is_shadow {
                summary.shadow_events += 1;
            }
            latency_total += event.latency_ms;
            for (name, triggered) in event.detectors.names.iter().zip(&event.detectors.triggered) {
                if *triggered {
                    *detector_counts.entry(name.clone()).or_default() += 1;
                }
            }
        }

        if summary.total_events > 0 {
            summary.avg_latency_ms = latency_total / summary.total_events as f64;
        }
        let mut top: Vec<DetectorCount> = detector_counts
            .into_iter()
            .map(|(name, count)| DetectorCount { name, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        top.truncate(10);
        summary.top_detectors = top;

        Ok(summary)
    }
}
