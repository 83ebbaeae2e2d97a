//! Manager settings repository for database operations.

use domain::models::{ManagerSettings, Policy, SettingsKey};
use domain::services::{SettingsStore, StoreError};
use sqlx::PgPool;

use crate::entities::ManagerSettingsEntity;
use crate::metrics::{record_pool_metrics, QueryTimer};

/// PostgreSQL error codes that are expected to clear up on retry.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57P01", // admin_shutdown
    "57P03", // cannot_connect_now
];

/// Maps a sqlx error onto the store error taxonomy.
pub fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            if code == "23505" {
                StoreError::Conflict(db_err.to_string())
            } else if TRANSIENT_SQLSTATES.contains(&code.as_str()) || code.starts_with("08") {
                StoreError::Unavailable(db_err.to_string())
            } else {
                StoreError::Other(format!("Database error: {}", db_err))
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Other(format!("Database error: {}", err)),
    }
}

fn into_domain(entity: ManagerSettingsEntity) -> Result<ManagerSettings, StoreError> {
    let key = format!("{}/{}", entity.subdomain, entity.manager_id);
    ManagerSettings::try_from(entity)
        .map_err(|e| StoreError::Other(format!("Corrupt permissions for {}: {}", key, e)))
}

/// Repository for manager settings rows.
#[derive(Clone)]
pub struct ManagerSettingsRepository {
    pool: PgPool,
}

impl ManagerSettingsRepository {
    /// Creates a new ManagerSettingsRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find the settings row of one manager.
    pub async fn find_by_key(
        &self,
        subdomain: &str,
        manager_id: i64,
    ) -> Result<Option<ManagerSettingsEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_manager_settings");
        let result = sqlx::query_as::<_, ManagerSettingsEntity>(
            r#"
            SELECT id, subdomain, manager_id, permissions, created_at, updated_at
            FROM manager_settings
            WHERE subdomain = $1 AND manager_id = $2
            "#,
        )
        .bind(subdomain)
        .bind(manager_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List all settings rows of a subdomain ordered by manager id.
    pub async fn list_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Vec<ManagerSettingsEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_manager_settings");
        let result = sqlx::query_as::<_, ManagerSettingsEntity>(
            r#"
            SELECT id, subdomain, manager_id, permissions, created_at, updated_at
            FROM manager_settings
            WHERE subdomain = $1
            ORDER BY manager_id ASC
            "#,
        )
        .bind(subdomain)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Replace the settings row of one manager.
    ///
    /// Delete and insert run in one transaction, so readers see either the
    /// old row or the new one. Two transactions replacing the same key are
    /// serialised by the unique constraint: the later insert blocks on the
    /// earlier one and fails with 23505 once it commits.
    pub async fn replace(
        &self,
        subdomain: &str,
        manager_id: i64,
        permissions: serde_json::Value,
    ) -> Result<ManagerSettingsEntity, sqlx::Error> {
        let timer = QueryTimer::new("replace_manager_settings");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM manager_settings
            WHERE subdomain = $1 AND manager_id = $2
            "#,
        )
        .bind(subdomain)
        .bind(manager_id)
        .execute(&mut *tx)
        .await?;

        let entity = sqlx::query_as::<_, ManagerSettingsEntity>(
            r#"
            INSERT INTO manager_settings (subdomain, manager_id, permissions, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, subdomain, manager_id, permissions, created_at, updated_at
            "#,
        )
        .bind(subdomain)
        .bind(manager_id)
        .bind(permissions)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.record();
        Ok(entity)
    }

    /// Delete the settings row of one manager. Returns the number of rows removed.
    pub async fn delete(&self, subdomain: &str, manager_id: i64) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_manager_settings");
        let result = sqlx::query(
            r#"
            DELETE FROM manager_settings
            WHERE subdomain = $1 AND manager_id = $2
            "#,
        )
        .bind(subdomain)
        .bind(manager_id)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}

#[async_trait::async_trait]
impl SettingsStore for ManagerSettingsRepository {
    async fn find(&self, key: &SettingsKey) -> Result<Option<ManagerSettings>, StoreError> {
        self.find_by_key(&key.subdomain, key.manager_id)
            .await
            .map_err(store_error)?
            .map(into_domain)
            .transpose()
    }

    async fn list(&self, subdomain: &str) -> Result<Vec<ManagerSettings>, StoreError> {
        self.list_by_subdomain(subdomain)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(into_domain)
            .collect()
    }

    async fn replace(
        &self,
        key: &SettingsKey,
        permissions: &Policy,
    ) -> Result<ManagerSettings, StoreError> {
        let document = serde_json::to_value(permissions)
            .map_err(|e| StoreError::Other(format!("Failed to encode permissions: {}", e)))?;
        let entity = ManagerSettingsRepository::replace(self, &key.subdomain, key.manager_id, document)
            .await
            .map_err(store_error)?;
        into_domain(entity)
    }

    async fn delete(&self, key: &SettingsKey) -> Result<bool, StoreError> {
        let removed = ManagerSettingsRepository::delete(self, &key.subdomain, key.manager_id)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        record_pool_metrics(&self.pool);
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
