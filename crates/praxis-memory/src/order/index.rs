use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UpdateSerializer;
use crate::error::{BackendResultExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};

/// One message's position marker inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: String,
    pub score: f64,
}

impl OrderEntry {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Score for a message saved at `batch_index` within its save call.
///
/// Microseconds since the epoch, nudged by the batch position so messages
/// sharing a timestamp keep the order they were saved in.
pub fn score_for(created_at: &DateTime<Utc>, batch_index: usize) -> f64 {
    created_at.timestamp_micros() as f64 + batch_index as f64
}

/// Score placing a message after everything saved so far.
pub fn fresh_score() -> f64 {
    Utc::now().timestamp_micros() as f64
}

/// A thread's order, sorted by score then id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSnapshot {
    entries: Vec<OrderEntry>,
}

impl OrderSnapshot {
    pub fn new(entries: Vec<OrderEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<OrderEntry> = entries
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        sort_entries(&mut entries);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OrderEntry] {
        &self.entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Zero-based position of `id`.
    pub fn rank(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn score(&self, id: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.score)
    }

    /// Ids between `start` and `end`, both inclusive. Negative indices count
    /// from the end (`-1` is the last entry). Out-of-range bounds are clamped.
    pub fn range(&self, start: i64, end: i64) -> Vec<String> {
        let len = self.entries.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let start = if start < 0 { (len + start).max(0) } else { start };
        let end = if end < 0 { len + end } else { end.min(len - 1) };
        if start > end || start >= len {
            return Vec::new();
        }
        self.entries[start as usize..=end as usize]
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn last_n(&self, n: usize) -> Vec<String> {
        let n = n.min(self.len());
        if n == 0 {
            return Vec::new();
        }
        self.range(-(n as i64), -1)
    }

    pub fn full_order(&self) -> Vec<String> {
        self.range(0, -1)
    }

    /// Adds entries for ids not yet present; known ids keep their score.
    fn add(&mut self, entries: Vec<OrderEntry>) -> bool {
        let mut known: HashSet<String> = self.entries.iter().map(|e| e.id.clone()).collect();
        let before = self.entries.len();
        for entry in entries {
            if known.insert(entry.id.clone()) {
                self.entries.push(entry);
            }
        }
        if self.entries.len() == before {
            return false;
        }
        sort_entries(&mut self.entries);
        true
    }

    fn remove(&mut self, ids: &[String]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        self.entries.len() != before
    }
}

fn sort_entries(entries: &mut [OrderEntry]) {
    entries.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.id.cmp(&b.id)));
}

/// Per-thread order index stored as one JSON blob under
/// `messages:{threadId}:messages`. Every write goes through the
/// [`UpdateSerializer`] so concurrent merges on one thread never lose entries.
#[derive(Clone)]
pub struct OrderIndex {
    keys: Keyspace,
    serializer: UpdateSerializer,
}

impl OrderIndex {
    pub fn new(keys: Keyspace) -> Self {
        Self {
            keys,
            serializer: UpdateSerializer::new(),
        }
    }

    pub fn serializer(&self) -> &UpdateSerializer {
        &self.serializer
    }

    pub async fn snapshot(&self, thread_id: &str) -> Result<OrderSnapshot> {
        let key = self.keys.order(thread_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Messages, &key)
            .await
            .backend("STORAGE_KV_GET_ORDER_INDEX_FAILED", || ErrorContext::thread(thread_id))?;

        let entries = match stored {
            None | Some(Value::Null) => Ok(Vec::new()),
            // Older writers stored the list JSON-encoded inside a string
            Some(Value::String(raw)) => serde_json::from_str(&raw),
            Some(value) => serde_json::from_value(value),
        }
        .map_err(|source| MemoryError::Corrupt {
            key: key.clone(),
            source,
        })?;

        Ok(OrderSnapshot::new(entries))
    }

    pub async fn get_rank(&self, thread_id: &str, id: &str) -> Result<Option<usize>> {
        Ok(self.snapshot(thread_id).await?.rank(id))
    }

    pub async fn get_range(&self, thread_id: &str, start: i64, end: i64) -> Result<Vec<String>> {
        Ok(self.snapshot(thread_id).await?.range(start, end))
    }

    pub async fn get_last_n(&self, thread_id: &str, n: usize) -> Result<Vec<String>> {
        Ok(self.snapshot(thread_id).await?.last_n(n))
    }

    pub async fn get_full_order(&self, thread_id: &str) -> Result<Vec<String>> {
        Ok(self.snapshot(thread_id).await?.full_order())
    }

    /// Adds `entries`; ids already indexed keep their position.
    pub async fn add(&self, thread_id: &str, entries: Vec<OrderEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.merge_write(thread_id, |order| order.add(entries)).await
    }

    pub async fn remove(&self, thread_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.merge_write(thread_id, |order| order.remove(ids)).await
    }

    /// Deletes the whole index of a thread.
    pub async fn clear(&self, thread_id: &str) -> Result<()> {
        let key = self.keys.order(thread_id);
        let key = key.as_str();
        self.serializer
            .run(key, || async move {
                self.keys
                    .kv()
                    .delete(Table::Messages, key)
                    .await
                    .backend("STORAGE_KV_DELETE_ORDER_INDEX_FAILED", || {
                        ErrorContext::thread(thread_id)
                    })
            })
            .await
    }

    async fn merge_write<F>(&self, thread_id: &str, merge: F) -> Result<()>
    where
        F: FnOnce(&mut OrderSnapshot) -> bool,
    {
        let key = self.keys.order(thread_id);
        let key = key.as_str();
        self.serializer
            .run(key, || async move {
                let mut order = self.snapshot(thread_id).await?;
                if !merge(&mut order) {
                    return Ok(());
                }
                let value = serde_json::to_value(order.entries())
                    .map_err(|source| MemoryError::Corrupt {
                        key: key.to_string(),
                        source,
                    })?;
                self.keys
                    .kv()
                    .put(Table::Messages, key, value)
                    .await
                    .backend("STORAGE_KV_PUT_ORDER_INDEX_FAILED", || {
                        ErrorContext::thread(thread_id)
                    })?;
                tracing::debug!("Order index for thread {} now holds {} entries", thread_id, order.len());
                Ok(())
            })
            .await
    }
}
