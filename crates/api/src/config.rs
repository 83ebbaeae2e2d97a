use broker::RetryPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long in-flight deliveries may take to finish on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

/// Where settings records are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process memory; records are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Which queueing backend carries RPC traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// RabbitMQ at `broker.url`.
    #[default]
    Amqp,
    /// In-process queues; gateway and workers must share the process.
    Memory,
}

/// What this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// HTTP gateway and queue workers.
    #[default]
    All,
    /// HTTP gateway only.
    Gateway,
    /// Queue workers only.
    Worker,
}

impl ProcessRole {
    pub fn runs_gateway(self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Gateway)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, ProcessRole::All | ProcessRole::Worker)
    }
}

/// Queue RPC settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub transport: TransportKind,

    /// AMQP connection URL.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub role: ProcessRole,

    /// How long the gateway waits for a worker reply.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Redeliveries of a transiently failed message after the first attempt.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Deliveries in flight per queue.
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: usize,

    /// Replace attempts a save makes after a unique-key conflict.
    #[serde(default = "default_conflict_retry_limit")]
    pub conflict_retry_limit: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            url: String::new(),
            role: ProcessRole::default(),
            rpc_timeout_secs: default_rpc_timeout(),
            max_retry_count: default_max_retry_count(),
            retry_delay_secs: default_retry_delay(),
            prefetch_count: default_prefetch_count(),
            conflict_retry_limit: default_conflict_retry_limit(),
        }
    }
}

impl BrokerConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retry_count,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    35
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rpc_timeout() -> u64 {
    30
}
fn default_max_retry_count() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_prefetch_count() -> usize {
    10
}
fn default_conflict_retry_limit() -> u32 {
    3
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with HD__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("HD").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Defaults are embedded so tests do not depend on the working directory.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 35
            shutdown_timeout_secs = 5

            [database]
            url = ""

            [storage]
            backend = "memory"

            [logging]
            level = "info"
            format = "pretty"

            [broker]
            transport = "memory"
            role = "all"
            rpc_timeout_secs = 30
            max_retry_count = 3
            retry_delay_secs = 5
            prefetch_count = 10
            conflict_retry_limit = 3
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Validation is left to the caller so tests can build partial configs.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "HD__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.broker.transport == TransportKind::Amqp && self.broker.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "HD__BROKER__URL environment variable must be set".to_string(),
            ));
        }

        if self.broker.transport == TransportKind::Memory && self.broker.role != ProcessRole::All {
            return Err(ConfigValidationError::InvalidValue(
                "broker.role must be \"all\" with the memory transport".to_string(),
            ));
        }

        if self.broker.prefetch_count == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "broker.prefetch_count must be at least 1".to_string(),
            ));
        }

        if self.broker.rpc_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "broker.rpc_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
