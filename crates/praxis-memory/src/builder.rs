use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{MemoryError, Result};
use crate::kv::KvAdapter;
use crate::MemoryStore;

pub struct MemoryStoreBuilder {
    adapter: Option<Arc<dyn KvAdapter>>,
    mongodb_uri: Option<String>,
    database: Option<String>,
    namespace_prefix: Option<String>,
    config: StoreConfig,
}

impl MemoryStoreBuilder {
    pub fn new() -> Self {
        Self {
            adapter: None,
            mongodb_uri: None,
            database: None,
            namespace_prefix: None,
            config: StoreConfig::default(),
        }
    }

    /// Use an existing adapter. Takes precedence over `mongodb_uri`.
    pub fn adapter(mut self, adapter: Arc<dyn KvAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn mongodb_uri(mut self, uri: impl Into<String>) -> Self {
        self.mongodb_uri = Some(uri.into());
        self
    }

    pub fn database(mut self, db: impl Into<String>) -> Self {
        self.database = Some(db.into());
        self
    }

    /// Prefix for every key of an adapter the builder connects itself.
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = Some(prefix.into());
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn track_message_threads(mut self, enabled: bool) -> Self {
        self.config.track_message_threads = enabled;
        self
    }

    pub fn hydrate_concurrency(mut self, limit: usize) -> Self {
        self.config.hydrate_concurrency = limit;
        self
    }

    pub fn scan_concurrency(mut self, limit: usize) -> Self {
        self.config.scan_concurrency = limit;
        self
    }

    pub async fn build(self) -> Result<MemoryStore> {
        self.config.validate()?;

        let adapter = match self.adapter {
            Some(adapter) => adapter,
            None => {
                let mongodb_uri = self
                    .mongodb_uri
                    .ok_or_else(|| MemoryError::Config("an adapter or mongodb_uri is required".to_string()))?;
                let database = self
                    .database
                    .ok_or_else(|| MemoryError::Config("database is required".to_string()))?;
                connect(&mongodb_uri, &database, self.namespace_prefix).await?
            }
        };

        Ok(MemoryStore::with_config(adapter, self.config))
    }
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "mongodb")]
async fn connect(uri: &str, database: &str, namespace_prefix: Option<String>) -> Result<Arc<dyn KvAdapter>> {
    use crate::error::{BackendResultExt, ErrorContext};
    use crate::kv::MongoKv;

    let kv = MongoKv::connect(uri, database)
        .await
        .backend("STORAGE_KV_CONNECT_FAILED", || ErrorContext::new().with("database", database))?;
    let kv = match namespace_prefix {
        Some(prefix) => kv.with_namespace_prefix(prefix),
        None => kv,
    };
    tracing::info!("Connected memory store to MongoDB database {}", database);
    Ok(Arc::new(kv))
}

#[cfg(not(feature = "mongodb"))]
async fn connect(_uri: &str, _database: &str, _namespace_prefix: Option<String>) -> Result<Arc<dyn KvAdapter>> {
    Err(MemoryError::Config(
        "mongodb_uri requires the `mongodb` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn test_build_requires_a_backend() {
        let err = MemoryStoreBuilder::new().build().await.err().unwrap();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let err = MemoryStoreBuilder::new()
            .adapter(Arc::new(MemoryKv::new()))
            .hydrate_concurrency(0)
            .build()
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "STORAGE_INVALID_CONFIG");
    }

    #[tokio::test]
    async fn test_build_with_adapter() {
        let store = MemoryStoreBuilder::new()
            .adapter(Arc::new(MemoryKv::new()))
            .track_message_threads(true)
            .build()
            .await
            .unwrap();
        assert!(store.config().track_message_threads);
    }
}
