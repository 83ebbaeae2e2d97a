//! Manager settings entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{ManagerSettings, Policy};
use sqlx::FromRow;

/// Database row mapping for the manager_settings table.
#[derive(Debug, Clone, FromRow)]
pub struct ManagerSettingsEntity {
    pub id: i64,
    pub subdomain: String,
    pub manager_id: i64,
    pub permissions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ManagerSettingsEntity> for ManagerSettings {
    type Error = serde_json::Error;

    fn try_from(entity: ManagerSettingsEntity) -> Result<Self, Self::Error> {
        let permissions: Policy = serde_json::from_value(entity.permissions)?;
        Ok(ManagerSettings {
            subdomain: entity.subdomain,
            manager_id: entity.manager_id,
            permissions,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
