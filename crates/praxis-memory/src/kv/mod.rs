//! Key-value adapter contract.
//!
//! The memory layer only ever talks to storage through [`KvAdapter`]: plain
//! get/put/delete plus prefix listing. There are no transactions, no secondary
//! indexes and no ordering guarantees on `list`.

mod keys;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use keys::{Keyspace, ORDER_KEY_SUFFIX};
pub use memory::MemoryKv;
#[cfg(feature = "mongodb")]
pub use mongo::MongoKv;

/// Logical tables the layer writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Threads,
    Messages,
    Resources,
    /// Optional message id → thread id pointers.
    MessageThreads,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Threads => "threads",
            Table::Messages => "messages",
            Table::Resources => "resources",
            Table::MessageThreads => "message_threads",
        }
    }
}

/// A key returned by [`KvAdapter::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub name: String,
}

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "mongodb")]
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// Namespaced key-value store.
#[async_trait]
pub trait KvAdapter: Send + Sync {
    /// Prefix prepended to every key this adapter builds.
    fn namespace_prefix(&self) -> &str {
        ""
    }

    /// Deterministic key for `fields` inside `table`:
    /// `{prefix}{table}:{field}:{field}...`
    fn get_key(&self, table: Table, fields: &[&str]) -> String {
        let mut key = format!("{}{}", self.namespace_prefix(), table.as_str());
        for field in fields {
            key.push(':');
            key.push_str(field);
        }
        key
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, KvError>;

    async fn put(&self, table: Table, key: &str, value: Value) -> Result<(), KvError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, table: Table, key: &str) -> Result<(), KvError>;

    async fn list(&self, table: Table, prefix: &str) -> Result<Vec<KeyInfo>, KvError>;
}
