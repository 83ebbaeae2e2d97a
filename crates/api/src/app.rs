use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use broker::RpcClient;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{health, settings};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rpc: RpcClient,
}

/// Builds the HTTP gateway. Every settings route is answered by the worker
/// behind `rpc`.
pub fn create_app(config: Config, rpc: RpcClient) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        rpc,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let settings_routes = Router::new()
        .route("/api/settings", post(settings::save_settings))
        .route(
            "/api/settings/:subdomain",
            get(settings::get_settings).delete(settings::delete_settings),
        )
        .route(
            "/api/settings/:subdomain/managers",
            get(settings::list_settings),
        );

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(settings_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
