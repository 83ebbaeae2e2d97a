//! Settings service.
//!
//! Get, save (replace) and delete manager settings against a
//! [`SettingsStore`]. A save is a replace: the old record is removed and a
//! new one inserted inside a single store transaction. The store's unique
//! constraint on `(subdomain, manager_id)` is what keeps concurrent savers
//! from producing duplicates; the losing writer gets [`StoreError::Conflict`]
//! and the service re-runs the whole replace a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::models::{ManagerSettings, Policy, SaveSettingsRequest, SettingsKey};

/// How many times a save re-runs its replace after a unique-key conflict.
pub const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 3;

/// Base pause between conflict retries; grows linearly with the attempt.
const CONFLICT_BACKOFF: Duration = Duration::from_millis(20);

/// Errors raised by a [`SettingsStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// The store could not be reached or timed out.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Other(String),
}

/// Relational storage for settings records.
///
/// Implementations must enforce uniqueness of `(subdomain, manager_id)` at
/// the storage level and run `replace` as one transaction.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    /// Point lookup by key.
    async fn find(&self, key: &SettingsKey) -> Result<Option<ManagerSettings>, StoreError>;

    /// All records of a tenant ordered by manager id.
    async fn list(&self, subdomain: &str) -> Result<Vec<ManagerSettings>, StoreError>;

    /// Deletes any record for `key` and inserts a fresh one, atomically.
    ///
    /// Returns [`StoreError::Conflict`] when a concurrent writer inserted
    /// the same key first; nothing is changed in that case.
    async fn replace(
        &self,
        key: &SettingsKey,
        permissions: &Policy,
    ) -> Result<ManagerSettings, StoreError>;

    /// Removes the record for `key`. Returns whether a row was removed.
    async fn delete(&self, key: &SettingsKey) -> Result<bool, StoreError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Errors returned by [`SettingsService`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("concurrent update conflict for {0}")]
    Conflict(SettingsKey),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettingsError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SettingsError::Conflict(_) | SettingsError::Unavailable(_))
    }
}

impl From<StoreError> for SettingsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SettingsError::Unavailable(msg),
            StoreError::Conflict(msg) | StoreError::Other(msg) => SettingsError::Internal(msg),
        }
    }
}

impl From<validator::ValidationErrors> for SettingsError {
    fn from(errors: validator::ValidationErrors) -> Self {
        SettingsError::Validation(errors.to_string())
    }
}

/// Business logic for manager settings.
#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    conflict_retry_limit: u32,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
        }
    }

    /// Overrides how many times a save retries after a unique-key conflict.
    pub fn with_conflict_retry_limit(mut self, limit: u32) -> Self {
        self.conflict_retry_limit = limit;
        self
    }

    /// Returns the record for `key`, or `None` when there is none.
    pub async fn get(&self, key: &SettingsKey) -> Result<Option<ManagerSettings>, SettingsError> {
        key.validate()?;
        let found = self.store.find(key).await?;
        debug!(key = %key, found = found.is_some(), "Looked up manager settings");
        Ok(found)
    }

    /// Returns every record of a tenant ordered by manager id.
    pub async fn list(&self, subdomain: &str) -> Result<Vec<ManagerSettings>, SettingsError> {
        shared::validation::validate_subdomain(subdomain)
            .map_err(|e| SettingsError::Validation(e.to_string()))?;
        Ok(self.store.list(subdomain).await?)
    }

    /// Replaces the settings of one manager with `request.permissions`.
    ///
    /// Unique-key conflicts caused by concurrent savers are retried up to
    /// the configured limit; once exhausted the save fails with
    /// [`SettingsError::Conflict`], which is transient.
    pub async fn save(&self, request: &SaveSettingsRequest) -> Result<ManagerSettings, SettingsError> {
        request.validate()?;
        let key = request.key();

        let mut attempt = 0;
        loop {
            match self.store.replace(&key, &request.permissions).await {
                Ok(record) => {
                    info!(key = %key, attempt = attempt, "Saved manager settings");
                    return Ok(record);
                }
                Err(StoreError::Conflict(detail)) if attempt < self.conflict_retry_limit => {
                    attempt += 1;
                    warn!(
                        key = %key,
                        attempt = attempt,
                        detail = %detail,
                        "Concurrent save conflict, retrying replace"
                    );
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
                Err(StoreError::Conflict(detail)) => {
                    warn!(key = %key, detail = %detail, "Conflict retries exhausted");
                    return Err(SettingsError::Conflict(key));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Deletes the settings of one manager. Returns whether anything was
    /// removed; deleting an absent key is not an error.
    pub async fn delete(&self, key: &SettingsKey) -> Result<bool, SettingsError> {
        key.validate()?;
        let removed = self.store.delete(key).await?;
        info!(key = %key, removed = removed, "Deleted manager settings");
        Ok(removed)
    }

    /// Whether the underlying store answers.
    pub async fn storage_ok(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Settings store ping failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, ModeKind};
    use crate::services::MemorySettingsStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(values: &[&str]) -> Policy {
        Policy {
            menu: Mode::new(
                ModeKind::Blacklist,
                values.iter().map(|v| json!(v)).collect(),
            ),
            ..Policy::default()
        }
    }

    fn save_request(subdomain: &str, manager_id: i64, permissions: Policy) -> SaveSettingsRequest {
        SaveSettingsRequest {
            subdomain: subdomain.to_string(),
            manager_id,
            permissions,
        }
    }

    /// Store that reports a unique-key conflict for the first `conflicts` replaces.
    struct ConflictingStore {
        inner: MemorySettingsStore,
        conflicts: AtomicU32,
        replace_calls: AtomicU32,
    }

    impl ConflictingStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemorySettingsStore::new(),
                conflicts: AtomicU32::new(conflicts),
                replace_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SettingsStore for ConflictingStore {
        async fn find(&self, key: &SettingsKey) -> Result<Option<ManagerSettings>, StoreError> {
            self.inner.find(key).await
        }

        async fn list(&self, subdomain: &str) -> Result<Vec<ManagerSettings>, StoreError> {
            self.inner.list(subdomain).await
        }

        async fn replace(
            &self,
            key: &SettingsKey,
            permissions: &Policy,
        ) -> Result<ManagerSettings, StoreError> {
            self.replace_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict("duplicate key".to_string()));
            }
            self.inner.replace(key, permissions).await
        }

        async fn delete(&self, key: &SettingsKey) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_save_get_delete_scenario() {
        let service = SettingsService::new(Arc::new(MemorySettingsStore::new()));
        let key = SettingsKey::new("acme", 1);

        let saved = service
            .save(&save_request("acme", 1, policy(&["analytics"])))
            .await
            .unwrap();
        assert_eq!(saved.permissions, policy(&["analytics"]));

        let fetched = service.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched, saved);

        assert!(service.delete(&key).await.unwrap());
        assert!(service.get(&key).await.unwrap().is_none());
        assert!(!service.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_replaces_and_resets_created_at() {
        let store = Arc::new(MemorySettingsStore::new());
        let service = SettingsService::new(store.clone());

        let first = service
            .save(&save_request("acme", 1, policy(&["a"])))
            .await
            .unwrap();
        let second = service
            .save(&save_request("acme", 1, policy(&["b"])))
            .await
            .unwrap();

        assert_eq!(second.permissions, policy(&["b"]));
        assert!(second.created_at >= first.created_at);
        assert_eq!(second.created_at, second.updated_at);
        assert_eq!(store.count("acme").await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let service = SettingsService::new(Arc::new(MemorySettingsStore::new()));
        let found = service.get(&SettingsKey::new("acme", 42)).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_request() {
        let service = SettingsService::new(Arc::new(MemorySettingsStore::new()));

        let err = service
            .save(&save_request("", 1, Policy::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
        assert!(!err.is_transient());

        let err = service
            .save(&save_request("acme", 0, Policy::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_save_retries_conflicts() {
        let store = Arc::new(ConflictingStore::new(2));
        let service = SettingsService::new(store.clone());

        let saved = service
            .save(&save_request("acme", 1, policy(&["x"])))
            .await
            .unwrap();

        assert_eq!(saved.permissions, policy(&["x"]));
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_save_conflict_retries_are_bounded() {
        let store = Arc::new(ConflictingStore::new(u32::MAX));
        let service = SettingsService::new(store.clone()).with_conflict_retry_limit(2);

        let err = service
            .save(&save_request("acme", 1, Policy::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, SettingsError::Conflict(_)));
        assert!(err.is_transient());
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_one_record() {
        let store = Arc::new(MemorySettingsStore::new());
        let service = SettingsService::new(store.clone());

        let mut handles = Vec::new();
        for i in 0..16 {
            let service = service.clone();
            let value = format!("section-{i}");
            handles.push(tokio::spawn(async move {
                service
                    .save(&save_request("acme", 1, policy(&[value.as_str()])))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count("acme").await, 1);
        let record = service.get(&SettingsKey::new("acme", 1)).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_delete_insert_saves_resolve_conflicts() {
        let store = Arc::new(MemorySettingsStore::two_phase());
        let service = SettingsService::new(store.clone()).with_conflict_retry_limit(20);

        let mut handles = Vec::new();
        for i in 0..10 {
            let service = service.clone();
            let value = format!("section-{i}");
            handles.push(tokio::spawn(async move {
                service
                    .save(&save_request("acme", 1, policy(&[value.as_str()])))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(store.conflicts() > 0);
        assert_eq!(store.count("acme").await, 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_manager_id() {
        let service = SettingsService::new(Arc::new(MemorySettingsStore::new()));
        for id in [3, 1, 2] {
            service
                .save(&save_request("acme", id, Policy::default()))
                .await
                .unwrap();
        }
        service
            .save(&save_request("other", 9, Policy::default()))
            .await
            .unwrap();

        let ids: Vec<i64> = service
            .list("acme")
            .await
            .unwrap()
            .iter()
            .map(|r| r.manager_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = Arc::new(MemorySettingsStore::new());
        store.set_unavailable(true);
        let service = SettingsService::new(store);

        let err = service
            .get(&SettingsKey::new("acme", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Unavailable(_)));
        assert!(err.is_transient());
        assert!(!service.storage_ok().await);
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            SettingsError::from(StoreError::Unavailable("down".into())),
            SettingsError::Unavailable(_)
        ));
        assert!(matches!(
            SettingsError::from(StoreError::Other("boom".into())),
            SettingsError::Internal(_)
        ));
    }
}
