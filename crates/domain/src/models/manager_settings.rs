//! Manager settings records and the requests that address them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::policy::Policy;

/// Unique key of a settings record: one record per manager per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct SettingsKey {
    #[validate(custom(function = "shared::validation::validate_subdomain"))]
    pub subdomain: String,
    #[validate(range(min = 1, message = "manager_id must be greater than 0"))]
    pub manager_id: i64,
}

impl SettingsKey {
    pub fn new(subdomain: impl Into<String>, manager_id: i64) -> Self {
        Self {
            subdomain: subdomain.into(),
            manager_id,
        }
    }
}

impl std::fmt::Display for SettingsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.subdomain, self.manager_id)
    }
}

/// A stored settings record.
///
/// Timestamps are assigned by the store. A save replaces the record, so
/// `created_at` always equals `updated_at` right after a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagerSettings {
    pub subdomain: String,
    pub manager_id: i64,
    pub permissions: Policy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagerSettings {
    pub fn key(&self) -> SettingsKey {
        SettingsKey::new(self.subdomain.clone(), self.manager_id)
    }
}

/// Request to save (replace) the settings of one manager.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct SaveSettingsRequest {
    #[validate(custom(function = "shared::validation::validate_subdomain"))]
    pub subdomain: String,
    #[validate(range(min = 1, message = "manager_id must be greater than 0"))]
    pub manager_id: i64,
    pub permissions: Policy,
}

impl SaveSettingsRequest {
    pub fn key(&self) -> SettingsKey {
        SettingsKey::new(self.subdomain.clone(), self.manager_id)
    }
}

/// Request to list every settings record of a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ListSettingsRequest {
    #[validate(custom(function = "shared::validation::validate_subdomain"))]
    pub subdomain: String,
}
