//! Manager settings endpoint handlers.
//!
//! Each handler validates its input, forwards it to the settings worker over
//! the RPC client and maps the reply onto HTTP. No business logic lives here.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use broker::Reply;
use domain::models::{ListSettingsRequest, ManagerSettings, SaveSettingsRequest, SettingsKey};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::queues;

/// Query parameters addressing one manager.
#[derive(Debug, Deserialize)]
pub struct ManagerQuery {
    pub manager_id: Option<i64>,
}

impl ManagerQuery {
    fn key(&self, subdomain: String) -> Result<SettingsKey, ApiError> {
        let manager_id = self.manager_id.ok_or_else(|| {
            ApiError::Validation("manager_id query parameter is required".to_string())
        })?;
        let key = SettingsKey::new(subdomain, manager_id);
        key.validate()?;
        Ok(key)
    }
}

fn require_data<T>(data: Option<T>) -> Result<T, ApiError> {
    data.ok_or_else(|| ApiError::Internal("Worker reply carried no data".to_string()))
}

/// Save (replace) the settings of one manager.
///
/// POST /api/settings
pub async fn save_settings(
    State(state): State<AppState>,
    Json(request): Json<SaveSettingsRequest>,
) -> Result<Json<Reply<ManagerSettings>>, ApiError> {
    request.validate()?;

    let record: Option<ManagerSettings> = state.rpc.call(queues::SETTINGS_SAVE, &request).await?;
    let record = require_data(record)?;

    info!(
        subdomain = %record.subdomain,
        manager_id = record.manager_id,
        "Manager settings saved"
    );

    Ok(Json(Reply::ok(record)))
}

/// Get the settings of one manager.
///
/// GET /api/settings/:subdomain?manager_id=N
pub async fn get_settings(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
    Query(query): Query<ManagerQuery>,
) -> Result<Json<Reply<ManagerSettings>>, ApiError> {
    let key = query.key(subdomain)?;

    let record: Option<ManagerSettings> = state.rpc.call(queues::SETTINGS_GET, &key).await?;

    Ok(Json(Reply::ok(require_data(record)?)))
}

/// Delete the settings of one manager.
///
/// DELETE /api/settings/:subdomain?manager_id=N
pub async fn delete_settings(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
    Query(query): Query<ManagerQuery>,
) -> Result<Json<Reply<()>>, ApiError> {
    let key = query.key(subdomain)?;

    state
        .rpc
        .call::<_, serde_json::Value>(queues::SETTINGS_DELETE, &key)
        .await?;

    info!(key = %key, "Manager settings deleted");

    Ok(Json(Reply::ok_empty()))
}

/// List the settings of every manager of a tenant, ordered by manager id.
///
/// GET /api/settings/:subdomain/managers
pub async fn list_settings(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
) -> Result<Json<Reply<Vec<ManagerSettings>>>, ApiError> {
    let request = ListSettingsRequest { subdomain };
    request.validate()?;

    let records: Option<Vec<ManagerSettings>> =
        state.rpc.call(queues::SETTINGS_LIST, &request).await?;

    Ok(Json(Reply::ok(records.unwrap_or_default())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_query_requires_manager_id() {
        let query = ManagerQuery { manager_id: None };
        let err = query.key("acme".to_string()).unwrap_err();
        assert!(err.to_string().contains("manager_id"));
    }

    #[test]
    fn test_manager_query_rejects_non_positive_id() {
        let query = ManagerQuery {
            manager_id: Some(0),
        };
        match query.key("acme".to_string()) {
            Err(ApiError::InvalidFields { details, .. }) => {
                assert_eq!(details.len(), 1);
                assert_eq!(details[0].field, "manager_id");
            }
            other => panic!("Expected field validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_manager_query_rejects_bad_subdomain() {
        let query = ManagerQuery {
            manager_id: Some(1),
        };
        assert!(query.key("-acme".to_string()).is_err());
    }

    #[test]
    fn test_manager_query_builds_key() {
        let query = ManagerQuery {
            manager_id: Some(42),
        };
        assert_eq!(
            query.key("acme".to_string()).unwrap(),
            SettingsKey::new("acme", 42)
        );
    }

    #[test]
    fn test_require_data() {
        assert_eq!(require_data(Some(1)).unwrap(), 1);
        assert!(matches!(
            require_data::<i32>(None),
            Err(ApiError::Internal(_))
        ));
    }
}
