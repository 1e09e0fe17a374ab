use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{KeyInfo, KvAdapter, KvError, Table};

/// In-memory adapter for testing and local development.
#[derive(Default)]
pub struct MemoryKv {
    namespace_prefix: String,
    tables: RwLock<HashMap<Table, BTreeMap<String, Value>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }
}

#[async_trait]
impl KvAdapter for MemoryKv {
    fn namespace_prefix(&self) -> &str {
        &self.namespace_prefix
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, KvError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn put(&self, table: Table, key: &str, value: Value) -> Result<(), KvError> {
        let mut tables = self.tables.write().await;
        tables.entry(table).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<(), KvError> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(&table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn list(&self, table: Table, prefix: &str) -> Result<Vec<KeyInfo>, KvError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| KeyInfo { name: name.clone() })
            .collect())
    }
}
