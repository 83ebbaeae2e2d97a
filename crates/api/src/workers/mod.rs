//! Queue workers.

pub mod settings;

use std::sync::Arc;

use broker::{Consumer, Json, LoggingMiddleware, RetryMiddleware, Transport};
use domain::services::SettingsService;

use crate::config::BrokerConfig;
use crate::queues;

pub use settings::{
    DeleteSettingsHandler, GetSettingsHandler, HealthHandler, HealthProbe, ListSettingsHandler,
    SaveSettingsHandler, NOTHING_DELETED, NOT_FOUND,
};

/// Builds the consumer serving every settings queue.
///
/// Retry wraps logging, so each attempt is logged before the retry stage
/// decides whether to redeliver. Call [`Consumer::start`] to begin consuming.
pub fn settings_consumer(
    transport: Arc<dyn Transport>,
    service: SettingsService,
    config: &BrokerConfig,
) -> Consumer {
    let mut consumer = Consumer::new(transport)
        .with_middleware(RetryMiddleware::new(config.retry_policy()))
        .with_middleware(LoggingMiddleware);

    let prefetch = config.prefetch_count;
    consumer.register(
        queues::SETTINGS_SAVE,
        prefetch,
        Json(SaveSettingsHandler::new(service.clone())),
    );
    consumer.register(
        queues::SETTINGS_GET,
        prefetch,
        Json(GetSettingsHandler::new(service.clone())),
    );
    consumer.register(
        queues::SETTINGS_DELETE,
        prefetch,
        Json(DeleteSettingsHandler::new(service.clone())),
    );
    consumer.register(
        queues::SETTINGS_LIST,
        prefetch,
        Json(ListSettingsHandler::new(service.clone())),
    );
    consumer.register(
        queues::SETTINGS_HEALTH,
        prefetch,
        Json(HealthHandler::new(service)),
    );

    consumer
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::{FailureCode, MemoryTransport, RpcClient};
    use domain::models::{ManagerSettings, Policy, SettingsKey};
    use domain::services::{MemorySettingsStore, SettingsStore, StoreError};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Store whose every replace loses a unique-key race.
    #[derive(Default)]
    struct AlwaysConflicting {
        replaces: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SettingsStore for AlwaysConflicting {
        async fn find(&self, _key: &SettingsKey) -> Result<Option<ManagerSettings>, StoreError> {
            Ok(None)
        }

        async fn list(&self, _subdomain: &str) -> Result<Vec<ManagerSettings>, StoreError> {
            Ok(Vec::new())
        }

        async fn replace(
            &self,
            _key: &SettingsKey,
            _permissions: &Policy,
        ) -> Result<ManagerSettings, StoreError> {
            self.replaces.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict("duplicate key".to_string()))
        }

        async fn delete(&self, _key: &SettingsKey) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_reply_with_conflict_code() {
        let config = BrokerConfig {
            retry_delay_secs: 0,
            conflict_retry_limit: 1,
            ..BrokerConfig::default()
        };
        let store = Arc::new(AlwaysConflicting::default());
        let service = SettingsService::new(store.clone())
            .with_conflict_retry_limit(config.conflict_retry_limit);
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());

        let mut consumer = settings_consumer(transport.clone(), service, &config);
        consumer.start().await.unwrap();
        let rpc = RpcClient::connect(transport, Duration::from_secs(5))
            .await
            .unwrap();

        let err = rpc
            .call::<_, ManagerSettings>(
                queues::SETTINGS_SAVE,
                &json!({"subdomain": "acme", "manager_id": 1, "permissions": {}}),
            )
            .await
            .unwrap_err();

        assert_eq!(err.remote_code(), Some(FailureCode::Conflict));
        // (1 + conflict retries) replaces per delivery, (1 + max retries) deliveries.
        assert_eq!(
            store.replaces.load(Ordering::SeqCst),
            (1 + config.conflict_retry_limit) * (1 + config.max_retry_count)
        );
    }

    #[test]
    fn test_consumer_serves_every_queue() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let service = SettingsService::new(Arc::new(MemorySettingsStore::new()));
        let consumer = settings_consumer(transport, service, &BrokerConfig::default());

        let mut served: Vec<&str> = consumer.queues().collect();
        served.sort_unstable();
        let mut expected = queues::ALL.to_vec();
        expected.sort_unstable();
        assert_eq!(served, expected);
    }
}
