//! Shared harness for integration tests: an in-memory backend with one
//! seeded project and a service wired the way `main.rs` wires it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use palisade::auth::mint_key;
use palisade::detect::standard_payload_detectors;
use palisade::policy::ProjectMode;
use palisade::service::{GuardService, ServiceConfig};
use palisade::store::memory::MemoryStore;
use palisade::store::{ProjectRecord, ProjectStore};

/// Minimum bcrypt cost keeps tests fast.
pub const TEST_COST: u32 = 4;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub service: GuardService,
    pub api_key: String,
}

pub fn test_service_config() -> ServiceConfig {
    ServiceConfig {
        detector_timeout: Duration::from_millis(250),
        block_threshold: 0.8,
        flag_threshold: 0.0,
        unsafe_threshold: 0.8,
        auth_cache_ttl: Duration::from_secs(30),
        tool_cache_ttl: Duration::from_secs(60),
    }
}

pub async fn harness(mode: ProjectMode) -> Harness {
    harness_with_policy(mode, None).await
}

pub async fn harness_with_policy(mode: ProjectMode, detector_config: Option<&str>) -> Harness {
    let minted = mint_key(TEST_COST).expect("mint key");
    let store = Arc::new(MemoryStore::new());
    store
        .create_project(&ProjectRecord {
            project_id: "proj-test".to_string(),
            name: "integration".to_string(),
            key_prefix: minted.prefix.clone(),
            key_hash: minted.hash.clone(),
            mode,
            fail_open: false,
            detector_config: detector_config.map(str::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .expect("seed project");

    let service = GuardService::new(
        test_service_config(),
        standard_payload_detectors(None),
        store.clone(),
        store.clone(),
        store.clone(),
    );

    Harness {
        store,
        service,
        api_key: minted.key,
    }
}

/// Wait for the writer's timer flush to land the event batch.
pub async fn wait_for_flush() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}
