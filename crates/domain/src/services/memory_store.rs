//! In-memory settings store.
//!
//! Used by the `memory` storage backend and by tests. Records are keyed by
//! `(subdomain, manager_id)`. By default a replace runs under one lock
//! acquisition and never conflicts. A [`MemorySettingsStore::two_phase`]
//! store splits it into a delete and a separately locked insert that fails
//! with [`StoreError::Conflict`] when another writer inserted the key in
//! between, the way the unique index reports it in Postgres.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;

use super::settings::{SettingsStore, StoreError};
use crate::models::{ManagerSettings, Policy, SettingsKey};

/// Settings store backed by a map in process memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    records: Mutex<BTreeMap<(String, i64), ManagerSettings>>,
    unavailable: AtomicBool,
    conflicting: AtomicBool,
    two_phase: bool,
    conflicts: AtomicU64,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose replace is a delete followed by a unique insert.
    pub fn two_phase() -> Self {
        Self {
            two_phase: true,
            ..Self::default()
        }
    }

    /// Number of replaces rejected with a unique-key conflict.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// until reset. Simulates a storage outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every subsequent replace fail with [`StoreError::Conflict`]
    /// until reset. Simulates a writer that always wins the unique index.
    pub fn set_conflicting(&self, conflicting: bool) {
        self.conflicting.store(conflicting, Ordering::SeqCst);
    }

    /// Number of records stored for a tenant.
    pub async fn count(&self, subdomain: &str) -> usize {
        self.records
            .lock()
            .await
            .keys()
            .filter(|(s, _)| s == subdomain)
            .count()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn map_key(key: &SettingsKey) -> (String, i64) {
    (key.subdomain.clone(), key.manager_id)
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn find(&self, key: &SettingsKey) -> Result<Option<ManagerSettings>, StoreError> {
        self.check_available()?;
        Ok(self.records.lock().await.get(&map_key(key)).cloned())
    }

    async fn list(&self, subdomain: &str) -> Result<Vec<ManagerSettings>, StoreError> {
        self.check_available()?;
        // BTreeMap iteration is ordered by (subdomain, manager_id).
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.subdomain == subdomain)
            .cloned()
            .collect())
    }

    async fn replace(
        &self,
        key: &SettingsKey,
        permissions: &Policy,
    ) -> Result<ManagerSettings, StoreError> {
        self.check_available()?;
        if self.conflicting.load(Ordering::SeqCst) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict(format!("duplicate key {}", key)));
        }
        let now = Utc::now();
        let record = ManagerSettings {
            subdomain: key.subdomain.clone(),
            manager_id: key.manager_id,
            permissions: permissions.clone(),
            created_at: now,
            updated_at: now,
        };

        if !self.two_phase {
            self.records
                .lock()
                .await
                .insert(map_key(key), record.clone());
            return Ok(record);
        }

        self.records.lock().await.remove(&map_key(key));
        tokio::task::yield_now().await;

        let mut records = self.records.lock().await;
        if records.contains_key(&map_key(key)) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict(format!("duplicate key {}", key)));
        }
        records.insert(map_key(key), record.clone());
        Ok(record)
    }

    async fn delete(&self, key: &SettingsKey) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.records.lock().await.remove(&map_key(key)).is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
