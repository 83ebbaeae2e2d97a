use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use broker::{AmqpTransport, MemoryTransport, RpcClient, Transport};
use domain::services::{MemorySettingsStore, SettingsService, SettingsStore};
use hiding_data_api::{
    app,
    config::{Config, StorageBackend, TransportKind},
    middleware, workers,
};
use persistence::repositories::ManagerSettingsRepository;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    let role = config.broker.role;
    info!(
        role = ?role,
        transport = ?config.broker.transport,
        "Starting Hiding Data API v{}",
        env!("CARGO_PKG_VERSION")
    );

    let transport = create_transport(&config).await?;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);

    let consumer = if role.runs_workers() {
        let store = create_store(&config).await?;
        let service = SettingsService::new(store)
            .with_conflict_retry_limit(config.broker.conflict_retry_limit);

        let mut consumer = workers::settings_consumer(transport.clone(), service, &config.broker);
        consumer.start().await?;
        Some(consumer)
    } else {
        None
    };

    if role.runs_gateway() {
        let rpc = RpcClient::connect(transport, config.broker.rpc_timeout()).await?;

        let addr = config.socket_addr()?;
        let app = app::create_app(config, rpc);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    if let Some(consumer) = consumer {
        consumer.shutdown();
        consumer.wait_for_shutdown(shutdown_timeout).await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn create_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    match config.broker.transport {
        TransportKind::Amqp => Ok(Arc::new(AmqpTransport::connect(&config.broker.url).await?)),
        TransportKind::Memory => {
            warn!("Using in-process queues; messages are lost on restart");
            Ok(Arc::new(MemoryTransport::new()))
        }
    }
}

async fn create_store(config: &Config) -> Result<Arc<dyn SettingsStore>> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let pool_config: persistence::db::DatabaseConfig = (&config.database).into();
            let pool = persistence::db::create_pool(&pool_config).await?;
            persistence::db::run_migrations(&pool).await?;
            Ok(Arc::new(ManagerSettingsRepository::new(pool)))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory settings store; records are lost on restart");
            Ok(Arc::new(MemorySettingsStore::new()))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}
