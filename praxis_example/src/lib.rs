//! Shared setup for the memory demo binary.

use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use praxis_memory::{MemoryKv, MemoryStore, MemoryStoreBuilder, StoreConfig};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub logging: LoggingConfig,

    // Secret (from ENV only)
    #[serde(default)]
    pub mongodb_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Mongodb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub namespace_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl DemoConfig {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. MEMORY_* environment variables, `__` between sections
    ///    (e.g. MEMORY_STORE__TRACK_MESSAGE_THREADS=true)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("MEMORY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: DemoConfig = config.try_deserialize()?;

        if cfg.backend.kind == BackendKind::Mongodb {
            cfg.mongodb_uri = std::env::var("MONGODB_URI").map_err(|_| {
                ConfigError::Message("MONGODB_URI environment variable is required".to_string())
            })?;
        }

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }
}

/// Opens the store described by `config`.
pub async fn open_store(config: &DemoConfig) -> anyhow::Result<MemoryStore> {
    let builder = MemoryStoreBuilder::new().config(config.store.clone());
    let builder = match config.backend.kind {
        BackendKind::Memory => builder.adapter(Arc::new(
            MemoryKv::new().with_namespace_prefix(config.backend.namespace_prefix.clone()),
        )),
        BackendKind::Mongodb => builder
            .mongodb_uri(&config.mongodb_uri)
            .database(&config.backend.database)
            .namespace_prefix(config.backend.namespace_prefix.clone()),
    };
    Ok(builder.build().await?)
}

pub fn init_logging(config: &DemoConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_structure() {
        let toml = r#"
            [backend]
            kind = "memory"

            [store]
            track_message_threads = true

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: DemoConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert!(config.store.track_message_threads);
        assert_eq!(config.store.scan_concurrency, 16);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_default_file_parses() {
        let config = DemoConfig::from_file("config/default.toml").unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert!(!config.store.track_message_threads);
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config: DemoConfig = toml::from_str(
            r#"
            [backend]
            kind = "memory"
            namespace_prefix = "demo-"

            [logging]
            level = "info"
            format = "pretty"
        "#,
        )
        .unwrap();

        let store = open_store(&config).await.unwrap();
        assert_eq!(store.config(), &StoreConfig::default());
    }
}
