//! Queue handlers backed by the settings service.

use async_trait::async_trait;
use broker::{HandlerError, MessageContext, QueueHandler};
use domain::models::{
    ListSettingsRequest, ManagerSettings, SaveSettingsRequest, ServiceHealth, SettingsKey,
};
use domain::services::{SettingsError, SettingsService};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// Failure text for a lookup that matched nothing.
pub const NOT_FOUND: &str = "not found";

/// Failure text for a delete that removed nothing.
pub const NOTHING_DELETED: &str = "settings not found or already deleted";

fn handler_error(err: SettingsError) -> HandlerError {
    match err {
        SettingsError::Validation(msg) => HandlerError::invalid(msg),
        SettingsError::Internal(msg) => HandlerError::internal(msg),
        e @ SettingsError::Conflict(_) => HandlerError::conflict(e.to_string()),
        e @ SettingsError::Unavailable(_) => HandlerError::transient(e.to_string()),
    }
}

/// Handles `settings.save`.
pub struct SaveSettingsHandler {
    service: SettingsService,
}

impl SaveSettingsHandler {
    pub fn new(service: SettingsService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for SaveSettingsHandler {
    type Request = SaveSettingsRequest;
    type Response = ManagerSettings;

    async fn handle(
        &self,
        ctx: &MessageContext,
        request: SaveSettingsRequest,
    ) -> Result<ManagerSettings, HandlerError> {
        ctx.record_subdomain(&request.subdomain);
        self.service.save(&request).await.map_err(handler_error)
    }
}

/// Handles `settings.get`.
pub struct GetSettingsHandler {
    service: SettingsService,
}

impl GetSettingsHandler {
    pub fn new(service: SettingsService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for GetSettingsHandler {
    type Request = SettingsKey;
    type Response = ManagerSettings;

    async fn handle(
        &self,
        ctx: &MessageContext,
        key: SettingsKey,
    ) -> Result<ManagerSettings, HandlerError> {
        ctx.record_subdomain(&key.subdomain);
        self.service
            .get(&key)
            .await
            .map_err(handler_error)?
            .ok_or_else(|| HandlerError::not_found(NOT_FOUND))
    }
}

/// Handles `settings.delete`.
pub struct DeleteSettingsHandler {
    service: SettingsService,
}

impl DeleteSettingsHandler {
    pub fn new(service: SettingsService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for DeleteSettingsHandler {
    type Request = SettingsKey;
    type Response = ();

    async fn handle(&self, ctx: &MessageContext, key: SettingsKey) -> Result<(), HandlerError> {
        ctx.record_subdomain(&key.subdomain);
        if self.service.delete(&key).await.map_err(handler_error)? {
            Ok(())
        } else {
            Err(HandlerError::not_found(NOTHING_DELETED))
        }
    }
}

/// Handles `settings.list`.
pub struct ListSettingsHandler {
    service: SettingsService,
}

impl ListSettingsHandler {
    pub fn new(service: SettingsService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for ListSettingsHandler {
    type Request = ListSettingsRequest;
    type Response = Vec<ManagerSettings>;

    async fn handle(
        &self,
        ctx: &MessageContext,
        request: ListSettingsRequest,
    ) -> Result<Vec<ManagerSettings>, HandlerError> {
        ctx.record_subdomain(&request.subdomain);
        self.service
            .list(&request.subdomain)
            .await
            .map_err(handler_error)
    }
}

/// Empty payload of a health probe.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HealthProbe {}

impl Validate for HealthProbe {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Handles `settings.health`.
pub struct HealthHandler {
    service: SettingsService,
}

impl HealthHandler {
    pub fn new(service: SettingsService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueHandler for HealthHandler {
    type Request = HealthProbe;
    type Response = ServiceHealth;

    async fn handle(
        &self,
        _ctx: &MessageContext,
        _probe: HealthProbe,
    ) -> Result<ServiceHealth, HandlerError> {
        Ok(ServiceHealth::from_storage(self.service.storage_ok().await))
    }
}
