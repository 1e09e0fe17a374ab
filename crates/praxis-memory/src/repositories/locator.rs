use std::collections::{HashMap, HashSet};

use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;

use super::{list_message_ids, list_thread_ids};
use crate::config::StoreConfig;
use crate::error::{BackendResultExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};

/// Finds which thread currently holds a message.
///
/// With `track_message_threads` enabled a `message_threads:{id}` pointer is
/// consulted first; pointers are always verified against the message key and
/// a stale one falls back to scanning every thread.
#[derive(Clone)]
pub struct MessageLocator {
    keys: Keyspace,
    config: StoreConfig,
}

impl MessageLocator {
    pub fn new(keys: Keyspace, config: StoreConfig) -> Self {
        Self { keys, config }
    }

    pub async fn find_message_in_any_thread(&self, message_id: &str) -> Result<Option<String>> {
        if let Some(thread_id) = self.verified_pointer(message_id).await? {
            return Ok(Some(thread_id));
        }

        let thread_ids = list_thread_ids(&self.keys).await?;
        tracing::debug!("Scanning {} threads for message {}", thread_ids.len(), message_id);

        let hits = stream::iter(thread_ids)
            .map(|thread_id| async move {
                let found = self.holds(&thread_id, message_id).await?;
                Ok::<_, MemoryError>(found.then_some(thread_id))
            })
            .buffered(self.config.scan_limit())
            .try_filter_map(|hit| async move { Ok(hit) });
        futures::pin_mut!(hits);
        hits.try_next().await
    }

    /// Every thread other than `except` holding a key for `message_id`.
    pub async fn other_holders(&self, message_id: &str, except: &str) -> Result<Vec<String>> {
        let thread_ids = list_thread_ids(&self.keys).await?;
        let holders: Vec<Option<String>> = stream::iter(thread_ids.into_iter().filter(|t| t != except))
            .map(|thread_id| async move {
                let found = self.holds(&thread_id, message_id).await?;
                Ok::<_, MemoryError>(found.then_some(thread_id))
            })
            .buffered(self.config.scan_limit())
            .try_collect()
            .await?;
        Ok(holders.into_iter().flatten().collect())
    }

    /// Thread of each id that could be found; missing ids are left out.
    pub async fn locate_many(&self, message_ids: &[String]) -> Result<HashMap<String, String>> {
        let mut located = HashMap::new();
        let mut remaining: HashSet<&str> = HashSet::new();

        for message_id in message_ids {
            if located.contains_key(message_id) {
                continue;
            }
            match self.verified_pointer(message_id).await? {
                Some(thread_id) => {
                    located.insert(message_id.clone(), thread_id);
                }
                None => {
                    remaining.insert(message_id.as_str());
                }
            }
        }
        if remaining.is_empty() {
            return Ok(located);
        }

        // One listing per thread instead of one probe per (thread, id) pair
        let thread_ids = list_thread_ids(&self.keys).await?;
        let listings: Vec<(String, Vec<String>)> = stream::iter(thread_ids)
            .map(|thread_id| async move {
                let ids = list_message_ids(&self.keys, &thread_id).await?;
                Ok::<_, MemoryError>((thread_id, ids))
            })
            .buffered(self.config.scan_limit())
            .try_collect()
            .await?;

        for (thread_id, ids) in listings {
            for id in ids {
                if remaining.remove(id.as_str()) {
                    located.insert(id, thread_id.clone());
                }
            }
        }
        Ok(located)
    }

    /// Points `message_id` at `thread_id`. No-op unless tracking is enabled.
    pub async fn record(&self, message_id: &str, thread_id: &str) -> Result<()> {
        if !self.config.track_message_threads {
            return Ok(());
        }
        let key = self.keys.message_pointer(message_id);
        self.keys
            .kv()
            .put(Table::MessageThreads, &key, Value::String(thread_id.to_string()))
            .await
            .backend("STORAGE_KV_PUT_MESSAGE_POINTER_FAILED", || {
                ErrorContext::message(message_id).with("threadId", thread_id)
            })
    }

    /// Drops the pointer of `message_id` if it still names `thread_id`.
    pub async fn forget(&self, message_id: &str, thread_id: &str) -> Result<()> {
        if !self.config.track_message_threads {
            return Ok(());
        }
        if self.pointer(message_id).await?.as_deref() != Some(thread_id) {
            return Ok(());
        }
        let key = self.keys.message_pointer(message_id);
        self.keys
            .kv()
            .delete(Table::MessageThreads, &key)
            .await
            .backend("STORAGE_KV_DELETE_MESSAGE_POINTER_FAILED", || {
                ErrorContext::message(message_id).with("threadId", thread_id)
            })
    }

    pub async fn holds(&self, thread_id: &str, message_id: &str) -> Result<bool> {
        let key = self.keys.message(thread_id, message_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Messages, &key)
            .await
            .backend("STORAGE_KV_GET_MESSAGE_FAILED", || {
                ErrorContext::thread(thread_id).with("messageId", message_id)
            })?;
        Ok(stored.is_some())
    }

    async fn pointer(&self, message_id: &str) -> Result<Option<String>> {
        let key = self.keys.message_pointer(message_id);
        let stored = self
            .keys
            .kv()
            .get(Table::MessageThreads, &key)
            .await
            .backend("STORAGE_KV_GET_MESSAGE_POINTER_FAILED", || ErrorContext::message(message_id))?;
        Ok(match stored {
            Some(Value::String(thread_id)) if !thread_id.is_empty() => Some(thread_id),
            _ => None,
        })
    }

    async fn verified_pointer(&self, message_id: &str) -> Result<Option<String>> {
        if !self.config.track_message_threads {
            return Ok(None);
        }
        let Some(thread_id) = self.pointer(message_id).await? else {
            return Ok(None);
        };
        if self.holds(&thread_id, message_id).await? {
            Ok(Some(thread_id))
        } else {
            tracing::debug!("Stale pointer for message {} (thread {})", message_id, thread_id);
            Ok(None)
        }
    }
}
