//! PostgreSQL store backend.
//!
//! Implements every store trait over a deadpool connection pool. The
//! event table keeps detector results as five array columns so the
//! parallel-array encoding is preserved verbatim on write and read.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{DetectorColumns, SecurityEvent};
use crate::events::writer::EventSink;
use crate::store::{
    AnalyticsSummary, DetectorCount, EventFilter, EventStore, ProjectRecord, ProjectStore,
    ProjectUpdate, ToolStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id      TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    key_prefix      TEXT NOT NULL,
    key_hash        TEXT NOT NULL,
    mode            TEXT NOT NULL DEFAULT 'enforce',
    fail_open       BOOLEAN NOT NULL DEFAULT FALSE,
    detector_config JSONB,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_projects_key_prefix ON projects (key_prefix);

CREATE TABLE IF NOT EXISTS tool_definitions (
    project_id TEXT NOT NULL,
    tool_name  TEXT NOT NULL,
    definition JSONB NOT NULL,
    PRIMARY KEY (project_id, tool_name)
);

CREATE TABLE IF NOT EXISTS security_events (
    request_id           UUID PRIMARY KEY,
    project_id           TEXT NOT NULL,
    ts                   TIMESTAMPTZ NOT NULL,
    action               TEXT NOT NULL,
    payload_preview      TEXT NOT NULL,
    payload_sha256       TEXT NOT NULL,
    payload_bytes        BIGINT NOT NULL,
    verdict              TEXT NOT NULL,
    is_shadow            BOOLEAN NOT NULL,
    reason               TEXT NOT NULL,
    detector_names       TEXT[] NOT NULL,
    detector_triggered   BOOLEAN[] NOT NULL,
    detector_confidences DOUBLE PRECISION[] NOT NULL,
    detector_categories  TEXT[] NOT NULL,
    detector_details     TEXT[] NOT NULL,
    user_id              TEXT,
    session_id           TEXT,
    tenant_id            TEXT,
    tool_name            TEXT,
    tool_args            TEXT,
    metadata             JSONB NOT NULL DEFAULT '{}'::jsonb,
    latency_ms           DOUBLE PRECISION NOT NULL,
    source               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_project_ts ON security_events (project_id, ts DESC);
"#;

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect a pool against a `postgres://` DSN.
    pub async fn connect(database_url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Unavailable(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Apply the schema. Idempotent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn query_err(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn project_from_row(row: &Row) -> Result<ProjectRecord, StoreError> {
    let mode: String = row.get("mode");
    Ok(ProjectRecord {
        project_id: row.get("project_id"),
        name: row.get("name"),
        key_prefix: row.get("key_prefix"),
        key_hash: row.get("key_hash"),
        mode: mode.parse().map_err(StoreError::Corrupt)?,
        fail_open: row.get("fail_open"),
        detector_config: row
            .get::<_, Option<serde_json::Value>>("detector_config")
            .map(|v| v.to_string()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const PROJECT_COLUMNS: &str = "project_id, name, key_prefix, key_hash, mode, fail_open, \
     detector_config, created_at, updated_at";

#[async_trait]
impl ProjectStore for PgStore {
    async fn find_by_key_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<ProjectRecord>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE key_prefix = $1").as_str(),
                &[&prefix],
            )
            .await
            .map_err(query_err)?;
        row.map(|r| project_from_row(&r)).transpose()
    }

    async fn create_project(&self, record: &ProjectRecord) -> Result<(), StoreError> {
        let client = self.client().await?;
        let config: Option<serde_json::Value> = record
            .detector_config
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok());
        client
            .execute(
                "INSERT INTO projects (project_id, name, key_prefix, key_hash, mode, \
                 fail_open, detector_config, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &record.project_id,
                    &record.name,
                    &record.key_prefix,
                    &record.key_hash,
                    &record.mode.to_string(),
                    &record.fail_open,
                    &config,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = $1").as_str(),
                &[&project_id],
            )
            .await
            .map_err(query_err)?;
        row.map(|r| project_from_row(&r)).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC").as_str(),
                &[],
            )
            .await
            .map_err(query_err)?;
        rows.iter().map(project_from_row).collect()
    }

    async fn update_project(
        &self,
        project_id: &str,
        update: &ProjectUpdate,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let mode = update.mode.map(|m| m.to_string());
        let affected = client
            .execute(
                "UPDATE projects SET \
                 name = COALESCE($2, name), \
                 mode = COALESCE($3, mode), \
                 fail_open = COALESCE($4, fail_open), \
                 updated_at = $5 \
                 WHERE project_id = $1",
                &[&project_id, &update.name, &mode, &update.fail_open, &Utc::now()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let affected = client
            .execute("DELETE FROM projects WHERE project_id = $1", &[&project_id])
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn update_key(
        &self,
        project_id: &str,
        key_prefix: &str,
        key_hash: &str,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let affected = client
            .execute(
                "UPDATE projects SET key_prefix = $2, key_hash = $3, updated_at = $4 \
                 WHERE project_id = $1",
                &[&project_id, &key_prefix, &key_hash, &Utc::now()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn get_policy(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT detector_config FROM projects WHERE project_id = $1",
                &[&project_id],
            )
            .await
            .map_err(query_err)?;
        Ok(row
            .and_then(|r| r.get::<_, Option<serde_json::Value>>("detector_config"))
            .map(|v| v.to_string()))
    }

    async fn put_policy(&self, project_id: &str, policy_json: &str) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let value: serde_json::Value = serde_json::from_str(policy_json)
            .map_err(|e| StoreError::Query(format!("policy is not valid JSON: {e}")))?;
        let affected = client
            .execute(
                "UPDATE projects SET detector_config = $2, updated_at = $3 WHERE project_id = $1",
                &[&project_id, &value, &Utc::now()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl ToolStore for PgStore {
    async fn fetch_definition(
        &self,
        project_id: &str,
        tool_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT definition FROM tool_definitions \
                 WHERE project_id = $1 AND tool_name = $2",
                &[&project_id, &tool_name],
            )
            .await
            .map_err(query_err)?;
        Ok(row.map(|r| r.get::<_, serde_json::Value>("definition").to_string()))
    }
}

const EVENT_COLUMNS: &str = "request_id, project_id, ts, action, payload_preview, \
     payload_sha256, payload_bytes, verdict, is_shadow, reason, detector_names, \
     detector_triggered, detector_confidences, detector_categories, detector_details, \
     user_id, session_id, tenant_id, tool_name, tool_args, metadata, latency_ms, source";

fn event_from_row(row: &Row) -> Result<SecurityEvent, StoreError> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, String> =
        serde_json::from_value(metadata).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(SecurityEvent {
        request_id: row.get("request_id"),
        project_id: row.get("project_id"),
        timestamp: row.get("ts"),
        action: row.get("action"),
        payload_preview: row.get("payload_preview"),
        payload_sha256: row.get("payload_sha256"),
        payload_bytes: row.get("payload_bytes"),
        verdict: row.get("verdict"),
        is_shadow: row.get("is_shadow"),
        reason: row.get("reason"),
        detectors: DetectorColumns {
            names: row.get("detector_names"),
            triggered: row.get("detector_triggered"),
            confidences: row.get("detector_confidences"),
            categories: row.get("detector_categories"),
            details: row.get("detector_details"),
        },
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        tenant_id: row.get("tenant_id"),
        tool_name: row.get("tool_name"),
        tool_args: row.get("tool_args"),
        metadata,
        latency_ms: row.get("latency_ms"),
        source: row.get("source"),
    })
}

#[async_trait]
impl EventSink for PgStore {
    async fn insert_events(&self, events: &[SecurityEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_err)?;
        let statement = tx
            .prepare(
                "INSERT INTO security_events (request_id, project_id, ts, action, \
                 payload_preview, payload_sha256, payload_bytes, verdict, is_shadow, reason, \
                 detector_names, detector_triggered, detector_confidences, \
                 detector_categories, detector_details, user_id, session_id, tenant_id, \
                 tool_name, tool_args, metadata, latency_ms, source) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17, $18, $19, $20, $21, $22, $23) \
                 ON CONFLICT (request_id) DO NOTHING",
            )
            .await
            .map_err(query_err)?;

        for event in events {
            let metadata = serde_json::to_value(&event.metadata)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            tx.execute(
                &statement,
                &[
                    &event.request_id,
                    &event.project_id,
                    &event.timestamp,
                    &event.action,
                    &event.payload_preview,
                    &event.payload_sha256,
                    &event.payload_bytes,
                    &event.verdict,
                    &event.is_shadow,
                    &event.reason,
                    &event.detectors.names,
                    &event.detectors.triggered,
                    &event.detectors.confidences,
                    &event.detectors.categories,
                    &event.detectors.details,
                    &event.user_id,
                    &event.session_id,
                    &event.tenant_id,
                    &event.tool_name,
                    &event.tool_args,
                    &metadata,
                    &event.latency_ms,
                    &event.source,
                ],
            )
            .await
            .map_err(query_err)?;
        }
        tx.commit().await.map_err(query_err)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn list_events(
        &self,
        project_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let client = self.client().await?;
        let limit = filter.limit as i64;
        let rows = client
            .query(
                format!(
                    "SELECT {EVENT_COLUMNS} FROM security_events \
                     WHERE project_id = $1 \
                     AND ($2::text IS NULL OR verdict = $2) \
                     AND ($3::text IS NULL OR action = $3) \
                     AND ($4::timestamptz IS NULL OR ts >= $4) \
                     ORDER BY ts DESC LIMIT $5"
                )
                .as_str(),
                &[&project_id, &filter.verdict, &filter.action, &filter.since, &limit],
            )
            .await
            .map_err(query_err)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn get_event(
        &self,
        project_id: &str,
        request_id: Uuid,
    ) -> Result<Option<SecurityEvent>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                format!(
                    "SELECT {EVENT_COLUMNS} FROM security_events \
                     WHERE project_id = $1 AND request_id = $2"
                )
                .as_str(),
                &[&project_id, &request_id],
            )
            .await
            .map_err(query_err)?;
        row.map(|r| event_from_row(&r)).transpose()
    }

    async fn analytics(
        &self,
        project_id: &str,
        days: u32,
    ) -> Result<AnalyticsSummary, StoreError> {
        let client = self.client().await?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));

        let totals = client
            .query_one(
                "SELECT COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE is_shadow) AS shadow, \
                 COALESCE(AVG(latency_ms), 0) AS avg_latency \
                 FROM security_events WHERE project_id = $1 AND ts >= $2",
                &[&project_id, &cutoff],
            )
            .await
            .map_err(query_err)?;

        let verdict_rows = client
            .query(
                "SELECT verdict, COUNT(*) AS count FROM security_events \
                 WHERE project_id = $1 AND ts >= $2 GROUP BY verdict",
                &[&project_id, &cutoff],
            )
            .await
            .map_err(query_err)?;

        let detector_rows = client
            .query(
                "SELECT t.name AS name, COUNT(*) AS count \
                 FROM security_events, \
                 unnest(detector_names, detector_triggered) AS t(name, was_triggered) \
                 WHERE project_id = $1 AND ts >= $2 AND t.was_triggered \
                 GROUP BY t.name ORDER BY count DESC, name LIMIT 10",
                &[&project_id, &cutoff],
            )
            .await
            .map_err(query_err)?;

        let mut verdicts = HashMap::new();
        for row in &verdict_rows {
            let verdict: String = row.get("verdict");
            let count: i64 = row.get("count");
            verdicts.insert(verdict, count as u64);
        }

        Ok(AnalyticsSummary {
            total_events: totals.get::<_, i64>("total") as u64,
            verdicts,
            top_detectors: detector_rows
                .iter()
                .map(|row| DetectorCount {
                    name: row.get("name"),
                    count: row.get::<_, i64>("count") as u64,
                })
                .collect(),
            shadow_events: totals.get::<_, i64>("shadow") as u64,
            avg_latency_ms: totals.get("avg_latency"),
        })
    }
}
