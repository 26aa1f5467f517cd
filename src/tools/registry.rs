//! Cached tool definition registry.
//!
//! Same cache shape as the auth layer, keyed on `(project, tool)`. A
//! store miss caches the negative sentinel so repeated checks of unknown
//! tools stay O(1); stale entries are served while one background task
//! refreshes them.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::error::GuardError;
use crate::store::ToolStore;
use crate::tools::ToolDefinition;

/// Default TTL for cached definitions.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Deadline for a background refresh, independent of any request.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached lookup of declarative tool definitions.
pub struct ToolRegistry {
    cache: TtlCache<Option<Arc<ToolDefinition>>>,
    store: Arc<dyn ToolStore>,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn ToolStore>, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            store,
        }
    }

    /// Resolve the definition for `(project, tool)`.
    ///
    /// `Ok(None)` means the tool is unregistered (cached negatively).
    pub async fn lookup(
        &self,
        project_id: &str,
        tool_name: &str,
    ) -> Result<Option<Arc<ToolDefinition>>, GuardError> {
        let key = cache_key(project_id, tool_name);

        let lookup = self.cache.get(&key);
        if lookup.hit {
            if lookup.needs_refresh {
                self.spawn_refresh(key, project_id.to_string(), tool_name.to_string());
            }
            return Ok(lookup.value.flatten());
        }

        let definition = self.fetch(project_id, tool_name).await?;
        self.cache.set(&key, definition.clone());
        Ok(definition)
    }

    /// Drop a cached entry (admin updates, rotation).
    pub fn invalidate(&self, project_id: &str, tool_name: &str) {
        self.cache.delete(&cache_key(project_id, tool_name));
    }

    async fn fetch(
        &self,
        project_id: &str,
        tool_name: &str,
    ) -> Result<Option<Arc<ToolDefinition>>, GuardError> {
        let raw = self
            .store
            .fetch_definition(project_id, tool_name)
            .await
            .map_err(GuardError::from)?;
        Ok(raw.and_then(|json| ToolDefinition::parse(&json)).map(Arc::new))
    }

    /// Fire-and-forget stale refresh. Success replaces the entry; failure
    /// deletes it so the next caller retries synchronously.
    fn spawn_refresh(&self, key: String, project_id: String, tool_name: String) {
        let cache = self.cache.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let fetched = tokio::time::timeout(
                REFRESH_TIMEOUT,
                store.fetch_definition(&project_id, &tool_name),
            )
            .await;
            match fetched {
                Ok(Ok(raw)) => {
                    let definition = raw.and_then(|json| ToolDefinition::parse(&json)).map(Arc::new);
                    cache.set(&key, definition);
                }
                Ok(Err(error)) => {
                    tracing::warn!(%error, tool = %tool_name, "tool definition refresh failed");
                    cache.delete(&key);
                }
                Err(_) => {
                    tracing::warn!(tool = %tool_name, "tool definition refresh timed out");
                    cache.delete(&key);
                }
            }
        });
    }
}

fn cache_key(project_id: &str, tool_name: &str) -> String {
    format!("{project_id}:{tool_name}")
}
