//! Health check endpoint handlers.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use domain::models::ServiceHealth;
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;
use crate::queues;
use crate::workers::HealthProbe;

/// How long a health probe waits for the worker.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether the settings worker answered the probe.
    pub worker: bool,
    /// Whether the worker reached its store.
    pub storage: bool,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Round-trips a probe through the health queue.
async fn probe_worker(state: &AppState) -> Option<ServiceHealth> {
    match state
        .rpc
        .call_with_timeout::<_, ServiceHealth>(
            queues::SETTINGS_HEALTH,
            &HealthProbe::default(),
            HEALTH_TIMEOUT,
        )
        .await
    {
        Ok(health) => health,
        Err(e) => {
            warn!(error = %e, "Health probe failed");
            None
        }
    }
}

/// Full health check endpoint.
///
/// Returns 503 unless the worker answers and reports its store reachable.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = probe_worker(&state).await;
    let worker = health.is_some();
    let storage = health.map(|h| h.is_healthy()).unwrap_or(false);

    let response = HealthResponse {
        status: if storage { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        worker,
        storage,
    };

    let status = if storage {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the worker reports its store reachable.
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    match probe_worker(&state).await {
        Some(health) if health.is_healthy() => Ok(Json(StatusResponse {
            status: "ready".to_string(),
        })),
        _ => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
