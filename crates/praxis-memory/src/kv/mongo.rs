use async_trait::async_trait;
use bson::doc;
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{KeyInfo, KvAdapter, KvError, Table};

/// One key per document; the value is kept as serialized JSON so the store
/// stays a dumb blob holder, like any other KV backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvDocument {
    #[serde(rename = "_id")]
    key: String,
    #[serde(default)]
    value: String,
}

/// MongoDB-backed adapter: one collection per table.
#[derive(Clone)]
pub struct MongoKv {
    database: Database,
    namespace_prefix: String,
}

impl MongoKv {
    /// Connect to MongoDB and select `database`
    pub async fn connect(mongodb_uri: &str, database: &str) -> Result<Self, KvError> {
        let client = Client::with_uri_str(mongodb_uri).await?;
        Ok(Self::new(&client, database))
    }

    pub fn new(client: &Client, database: &str) -> Self {
        Self {
            database: client.database(database),
            namespace_prefix: String::new(),
        }
    }

    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    fn collection(&self, table: Table) -> Collection<KvDocument> {
        self.database.collection(table.as_str())
    }
}

#[async_trait]
impl KvAdapter for MongoKv {
    fn namespace_prefix(&self) -> &str {
        &self.namespace_prefix
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, KvError> {
        let found = self.collection(table).find_one(doc! { "_id": key }).await?;
        match found {
            Some(document) => Ok(Some(serde_json::from_str(&document.value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, table: Table, key: &str, value: Value) -> Result<(), KvError> {
        let document = KvDocument {
            key: key.to_string(),
            value: serde_json::to_string(&value)?,
        };
        self.collection(table)
            .replace_one(doc! { "_id": key }, &document)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<(), KvError> {
        self.collection(table).delete_one(doc! { "_id": key }).await?;
        Ok(())
    }

    async fn list(&self, table: Table, prefix: &str) -> Result<Vec<KeyInfo>, KvError> {
        let pattern = format!("^{}", escape_regex(prefix));
        let documents: Vec<KvDocument> = self
            .collection(table)
            .find(doc! { "_id": { "$regex": pattern } })
            .projection(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(documents
            .into_iter()
            .map(|d| KeyInfo { name: d.key })
            .collect())
    }
}

fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_regex;

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("messages:t1:"), "messages:t1:");
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("(x)[y]"), "\\(x\\)\\[y\\]");
    }
}
