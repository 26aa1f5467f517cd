//! Authentication: cached project-context resolution from bearer tokens.
//!
//! The cache hides the bcrypt cost after the first call per key: fresh
//! hits return immediately, stale hits are served while one fire-and-
//! forget task re-verifies in the background, and invalid keys are cached
//! negatively so repeated garbage stays cheap.

pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

pub use verifier::{KeyVerifier, MintedKey, mint_key};

use crate::cache::TtlCache;
use crate::error::GuardError;
use crate::policy::ProjectContext;
use crate::store::ProjectStore;

/// Deadline for a background refresh, independent of the triggering request.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Token → project-context resolution with a stale-while-revalidate cache.
pub struct Authenticator {
    cache: TtlCache<Option<Arc<ProjectContext>>>,
    verifier: Arc<KeyVerifier>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn ProjectStore>, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            verifier: Arc::new(KeyVerifier::new(store)),
        }
    }

    /// Resolve a bearer token to its project context.
    ///
    /// Never fails open: an invalid key or an unreachable backend errors
    /// before any detector runs. Stale cache entries are served on
    /// purpose; deleted entries are never served.
    pub async fn authenticate(&self, token: &str) -> Result<Arc<ProjectContext>, GuardError> {
        KeyVerifier::check_shape(token)?;

        let lookup = self.cache.get(token);
        if lookup.hit {
            if lookup.needs_refresh {
                self.spawn_refresh(token.to_string());
            }
            return match lookup.value.flatten() {
                Some(ctx) => Ok(ctx),
                None => Err(GuardError::InvalidKey),
            };
        }

        match self.verifier.verify(token).await {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                self.cache.set(token, Some(Arc::clone(&ctx)));
                Ok(ctx)
            }
            Err(GuardError::InvalidKey) => {
                self.cache.set(token, None);
                Err(GuardError::InvalidKey)
            }
            // Transport problems are not cached: the next caller retries.
            Err(other) => Err(other),
        }
    }

    /// Drop a cached token (key deletion). Rotation relies on the TTL:
    /// the old key fails re-verification within one cache lifetime.
    pub fn invalidate(&self, token: &str) {
        self.cache.delete(token);
    }

    /// Background re-verification of a stale entry. Success replaces the
    /// entry; failure deletes it so the next caller verifies
    /// synchronously.
    fn spawn_refresh(&self, token: String) {
        let cache = self.cache.clone();
        let verifier = Arc::clone(&self.verifier);
        tokio::spawn(async move {
            match tokio::time::timeout(REFRESH_TIMEOUT, verifier.verify(&token)).await {
                Ok(Ok(ctx)) => cache.set(&token, Some(Arc::new(ctx))),
                Ok(Err(GuardError::InvalidKey)) => cache.set(&token, None),
                Ok(Err(error)) => {
                    tracing::warn!(%error, "auth refresh failed, evicting stale entry");
                    cache.delete(&token);
                }
                Err(_) => {
                    tracing::warn!("auth refresh timed out, evicting stale entry");
                    cache.delete(&token);
                }
            }
        });
    }
}
