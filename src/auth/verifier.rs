//! API key verification against the credential store.
//!
//! Keys look like `tsk_<random>`. The first 8 characters are stored in a
//! plain lookup column; the full key is verified against a bcrypt hash,
//! which dominates the cost of a cold authentication — the cache in
//! [`super::Authenticator`] exists to pay it once per key.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::{GuardError, StoreError};
use crate::policy::{ProjectContext, ProjectPolicy};
use crate::store::ProjectStore;

/// Required key prefix.
pub const KEY_PREFIX: &str = "tsk_";
/// Minimum key length in characters.
pub const MIN_KEY_LEN: usize = 8;
/// Characters stored in the lookup column.
const LOOKUP_PREFIX_LEN: usize = 8;
/// Random characters after the prefix in minted keys.
const KEY_RANDOM_LEN: usize = 32;

/// A freshly minted API key with its storable parts. The plaintext key is
/// returned to the caller exactly once.
#[derive(Debug, Clone)]
pub struct MintedKey {
    pub key: String,
    pub prefix: String,
    pub hash: String,
}

/// Mint a new `tsk_` key and bcrypt-hash it at the given cost.
pub fn mint_key(cost: u32) -> Result<MintedKey, GuardError> {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    let key = format!("{KEY_PREFIX}{random}");
    let hash = bcrypt::hash(&key, cost).map_err(|e| GuardError::Internal(e.to_string()))?;
    let prefix = key[..LOOKUP_PREFIX_LEN].to_string();
    Ok(MintedKey { key, prefix, hash })
}

/// Verifies bearer tokens and assembles the project context.
pub struct KeyVerifier {
    store: Arc<dyn ProjectStore>,
}

impl KeyVerifier {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    /// Cheap structural check, run before any store or hash work.
    pub fn check_shape(token: &str) -> Result<(), GuardError> {
        if !token.starts_with(KEY_PREFIX) || token.chars().count() < MIN_KEY_LEN {
            return Err(GuardError::InvalidKey);
        }
        Ok(())
    }

    /// Full verification: prefix lookup, bcrypt compare, policy parse.
    ///
    /// Store errors translate to `Unavailable`; a missing row or a hash
    /// mismatch is `InvalidKey`, so callers can tell "retry later" from
    /// "rotate your credentials".
    pub async fn verify(&self, token: &str) -> Result<ProjectContext, GuardError> {
        Self::check_shape(token)?;

        let prefix: String = token.chars().take(LOOKUP_PREFIX_LEN).collect();
        let record = self
            .store
            .find_by_key_prefix(&prefix)
            .await
            .map_err(|e| match e {
                StoreError::Unavailable(msg) => GuardError::Unavailable(msg),
                other => GuardError::Unavailable(other.to_string()),
            })?
            .ok_or(GuardError::InvalidKey)?;

        // bcrypt is intentionally expensive; keep it off the async workers.
        let token_owned = token.to_string();
        let hash = record.key_hash.clone();
        let matched = tokio::task::spawn_blocking(move || bcrypt::verify(&token_owned, &hash))
            .await
            .map_err(|e| GuardError::Internal(e.to_string()))?
            .map_err(|e| GuardError::Internal(e.to_string()))?;
        if !matched {
            return Err(GuardError::InvalidKey);
        }

        let policy = record
            .detector_config
            .as_deref()
            .and_then(ProjectPolicy::parse);

        Ok(ProjectContext {
            project_id: record.project_id,
            mode: record.mode,
            fail_open: record.fail_open,
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ProjectMode;
    use crate::store::ProjectRecord;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Minimum bcrypt cost keeps the hash fast in tests.
    const TEST_COST: u32 = 4;

    async fn store_with_key() -> (Arc<MemoryStore>, String) {
        let minted = mint_key(TEST_COST).unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .create_project(&ProjectRecord {
                project_id: "p1".to_string(),
                name: "test".to_string(),
                key_prefix: minted.prefix.clone(),
                key_hash: minted.hash.clone(),
                mode: ProjectMode::Enforce,
                fail_open: false,
                detector_config: Some(r#"{"pii": {"enabled": false}}"#.to_string()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        (store, minted.key)
    }

    #[test]
    fn test_shape_check() {
        assert!(KeyVerifier::check_shape("tsk_abcdefgh").is_ok());
        assert!(KeyVerifier::check_shape("tsk_abcd").is_ok()); // exactly 8
        assert!(KeyVerifier::check_shape("tsk_abc").is_err()); // too short
        assert!(KeyVerifier::check_shape("sk_abcdefgh").is_err()); // wrong prefix
        assert!(KeyVerifier::check_shape("").is_err());
    }

    #[test]
    fn test_mint_key_shape() {
        let minted = mint_key(TEST_COST).unwrap();
        assert!(minted.key.starts_with(KEY_PREFIX));
        assert_eq!(minted.prefix.len(), 8);
        assert!(minted.key.starts_with(&minted.prefix));
        assert!(bcrypt::verify(&minted.key, &minted.hash).unwrap());
    }

    #[tokio::test]
    async fn test_verify_happy_path() {
        let (store, key) = store_with_key().await;
        let verifier = KeyVerifier::new(store);

        let ctx = verifier.verify(&key).await.unwrap();
        assert_eq!(ctx.project_id, "p1");
        assert_eq!(ctx.mode, ProjectMode::Enforce);
        assert!(!ctx.policy.as_ref().unwrap().is_enabled("pii"));
    }

    #[tokio::test]
    async fn test_verify_wrong_key_same_prefix() {
        let (store, key) = store_with_key().await;
        let verifier = KeyVerifier::new(store);

        // Same 8-char prefix, different tail: row found, hash mismatch.
        let forged = format!("{}{}", &key[..8], "X".repeat(30));
        let err = verifier.verify(&forged).await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidKey));
    }

    #[tokio::test]
    async fn test_verify_unknown_prefix() {
        let (store, _key) = store_with_key().await;
        let verifier = KeyVerifier::new(store);

        let err = verifier.verify("tsk_zzzzzzzzzzzzzzzz").await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidKey));
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        struct DownStore;

        #[async_trait]
        impl ProjectStore for DownStore {
            async fn find_by_key_prefix(
                &self,
                _prefix: &str,
            ) -> Result<Option<ProjectRecord>, crate::error::StoreError> {
                Err(crate::error::StoreError::Unavailable("refused".to_string()))
            }
            async fn create_project(
                &self,
                _r: &ProjectRecord,
            ) -> Result<(), crate::error::StoreError> {
                unimplemented!()
            }
            async fn get_project(
                &self,
                _id: &str,
            ) -> Result<Option<ProjectRecord>, crate::error::StoreError> {
                unimplemented!()
            }
            async fn list_projects(&self) -> Result<Vec<ProjectRecord>, crate::error::StoreError> {
                unimplemented!()
            }
            async fn update_project(
                &self,
                _id: &str,
                _u: &crate::store::ProjectUpdate,
            ) -> Result<bool, crate::error::StoreError> {
                unimplemented!()
            }
            async fn delete_project(&self, _id: &str) -> Result<bool, crate::error::StoreError> {
                unimplemented!()
            }
            async fn update_key(
                &self,
                _id: &str,
                _p: &str,
                _h: &str,
            ) -> Result<bool, crate::error::StoreError> {
                unimplemented!()
            }
            async fn get_policy(
                &self,
                _id: &str,
            ) -> Result<Option<String>, crate::error::StoreError> {
                unimplemented!()
            }
            async fn put_policy(
                &self,
                _id: &str,
                _j: &str,
            ) -> Result<bool, crate::error::StoreError> {
                unimplemented!()
            }
        }

        let verifier = KeyVerifier::new(Arc::new(DownStore));
        let err = verifier.verify("tsk_abcdefgh").await.unwrap_err();
        assert!(matches!(err, GuardError::Unavailable(_)));
    }
}
