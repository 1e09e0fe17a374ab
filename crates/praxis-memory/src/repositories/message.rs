use std::collections::{BTreeMap, HashSet};

use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;

use super::{MessageLocator, ThreadRepository, Violations};
use crate::config::StoreConfig;
use crate::error::{BackendResultExt, DegradeExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};
use crate::models::{normalize_message, Message, MessageUpdate};
use crate::order::{fresh_score, score_for, OrderEntry, OrderIndex};

#[derive(Clone)]
pub struct MessageRepository {
    keys: Keyspace,
    config: StoreConfig,
    order: OrderIndex,
    threads: ThreadRepository,
    locator: MessageLocator,
}

impl MessageRepository {
    pub fn new(keys: Keyspace, config: StoreConfig, order: OrderIndex, threads: ThreadRepository) -> Self {
        let locator = MessageLocator::new(keys.clone(), config.clone());
        Self {
            keys,
            config,
            order,
            threads,
            locator,
        }
    }

    pub fn locator(&self) -> &MessageLocator {
        &self.locator
    }

    /// Save a batch of messages.
    ///
    /// Every message is validated before anything is written and every
    /// referenced thread must exist. A message id already stored under
    /// another thread is moved first. Records are written before their order
    /// index entries, so an interrupted save leaves unindexed records that
    /// `reconcile_thread` picks up.
    pub async fn save_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        validate_messages(&messages)?;
        if messages.is_empty() {
            return Ok(messages);
        }

        let mut by_thread: BTreeMap<&str, Vec<(usize, &Message)>> = BTreeMap::new();
        for (i, message) in messages.iter().enumerate() {
            by_thread
                .entry(message.thread_id.as_str())
                .or_default()
                .push((i, message));
        }

        for thread_id in by_thread.keys() {
            if !self.threads.exists(thread_id).await? {
                return Err(MemoryError::ThreadNotFound(thread_id.to_string()));
            }
        }

        for message in &messages {
            if let Some(current) = self.locator.find_message_in_any_thread(&message.id).await? {
                if current != message.thread_id {
                    self.migrate_message(&message.id, &current, &message.thread_id).await?;
                }
            }
        }

        for (thread_id, batch) in &by_thread {
            let writes: Vec<_> = batch
                .iter()
                .map(|&(i, message)| self.write_indexed(message, i))
                .collect();
            stream::iter(writes)
                .buffer_unordered(self.config.hydrate_limit())
                .try_collect::<()>()
                .await?;

            let entries = batch
                .iter()
                .map(|(i, message)| OrderEntry::new(message.id.as_str(), score_for(&message.created_at, *i)))
                .collect();
            self.order.add(thread_id, entries).await?;
            self.threads.touch(thread_id).await?;

            tracing::debug!("Saved {} messages to thread {}", batch.len(), thread_id);
        }

        Ok(messages)
    }

    async fn write_indexed(&self, message: &Message, batch_index: usize) -> Result<()> {
        self.write(message, message.to_record(batch_index)).await?;
        self.locator.record(&message.id, &message.thread_id).await
    }

    pub async fn find_message_in_any_thread(&self, message_id: &str) -> Result<Option<String>> {
        self.locator.find_message_in_any_thread(message_id).await
    }

    /// Move a message between threads.
    ///
    /// Steps run in order and each is logged: copy the record into the
    /// destination, drop the id from the source index, delete the source key,
    /// index the copy at the end of the destination. A failure stops the
    /// sequence; `reconcile_thread` on either thread settles the leftovers.
    pub async fn migrate_message(&self, message_id: &str, from_thread: &str, to_thread: &str) -> Result<Message> {
        let mut violations = Violations::new();
        violations.check_message_id("messageId", message_id);
        violations.check_id("fromThreadId", from_thread);
        violations.check_id("toThreadId", to_thread);
        violations.into_result()?;

        let mut message = self
            .fetch_message(from_thread, message_id)
            .await?
            .ok_or_else(|| MemoryError::MessageNotFound(message_id.to_string()))?;
        if from_thread == to_thread {
            return Ok(message);
        }
        if !self.threads.exists(to_thread).await? {
            return Err(MemoryError::ThreadNotFound(to_thread.to_string()));
        }

        message.thread_id = to_thread.to_string();
        self.relocate(&message, from_thread).await?;
        self.threads.touch(from_thread).await?;
        self.threads.touch(to_thread).await?;
        Ok(message)
    }

    async fn relocate(&self, message: &Message, from_thread: &str) -> Result<()> {
        let to_thread = message.thread_id.as_str();
        let id = message.id.as_str();
        let context = || {
            ErrorContext::message(id)
                .with("fromThreadId", from_thread)
                .with("toThreadId", to_thread)
        };

        tracing::debug!("Moving message {} from {} to {}: copying record", id, from_thread, to_thread);
        self.write(message, message.to_migrated_record(from_thread)).await?;

        tracing::debug!("Moving message {}: leaving source index", id);
        self.order.remove(from_thread, &[id.to_string()]).await?;

        tracing::debug!("Moving message {}: deleting source record", id);
        self.keys
            .kv()
            .delete(Table::Messages, &self.keys.message(from_thread, id))
            .await
            .backend("STORAGE_KV_MIGRATE_MESSAGE_FAILED", context)?;

        tracing::debug!("Moving message {}: indexing in destination", id);
        self.order.add(to_thread, vec![OrderEntry::new(id, fresh_score())]).await?;
        self.locator.record(id, to_thread).await?;

        tracing::info!("Moved message {} from thread {} to {}", id, from_thread, to_thread);
        Ok(())
    }

    /// Apply partial updates one message at a time, in input order.
    ///
    /// An update naming a different thread moves the message there; both
    /// threads get a fresh `updated_at`.
    pub async fn update_messages(&self, updates: Vec<MessageUpdate>) -> Result<Vec<Message>> {
        let mut violations = Violations::new();
        for (i, update) in updates.iter().enumerate() {
            violations.check_message_id(&format!("messages[{i}].id"), &update.id);
            if let Some(thread_id) = &update.thread_id {
                violations.check_id(&format!("messages[{i}].threadId"), thread_id);
            }
        }
        violations.into_result()?;

        let mut updated = Vec::with_capacity(updates.len());
        for update in updates {
            let id = update.id.clone();
            let current_thread = self
                .locator
                .find_message_in_any_thread(&id)
                .await?
                .ok_or_else(|| MemoryError::MessageNotFound(id.clone()))?;
            let mut message = self
                .fetch_message(&current_thread, &id)
                .await?
                .ok_or_else(|| MemoryError::MessageNotFound(id.clone()))?;

            let destination = update
                .thread_id
                .clone()
                .filter(|thread_id| *thread_id != current_thread);
            let previous_created_at = message.created_at;
            message.apply(update);

            match destination {
                Some(destination) => {
                    if !self.threads.exists(&destination).await? {
                        return Err(MemoryError::ThreadNotFound(destination));
                    }
                    message.thread_id = destination;
                    self.relocate(&message, &current_thread).await?;
                    self.threads.touch(&current_thread).await?;
                    self.threads.touch(&message.thread_id).await?;
                }
                None => {
                    self.write(&message, message.to_record(0)).await?;
                    if message.created_at != previous_created_at {
                        self.rescore(&message).await?;
                    }
                    self.threads.touch(&current_thread).await?;
                }
            }
            updated.push(message);
        }
        Ok(updated)
    }

    /// Moves an edited message to the index position of its new `created_at`.
    async fn rescore(&self, message: &Message) -> Result<()> {
        let thread_id = message.thread_id.as_str();
        self.order.remove(thread_id, &[message.id.clone()]).await?;
        self.order
            .add(thread_id, vec![OrderEntry::new(message.id.as_str(), score_for(&message.created_at, 0))])
            .await
    }

    /// Messages with the given ids, oldest first. Unknown ids are skipped.
    pub async fn list_messages_by_id(&self, message_ids: &[String]) -> Result<Vec<Message>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collect_by_id(message_ids)
            .await
            .or_degraded("list_messages_by_id", Vec::new)
    }

    async fn collect_by_id(&self, message_ids: &[String]) -> Result<Vec<Message>> {
        let located = self.locator.locate_many(message_ids).await?;
        let mut seen = HashSet::new();
        let targets = message_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| located.get(id).map(|thread_id| (thread_id.clone(), id.clone())))
            .collect();

        let mut messages = self.fetch_many(targets).await?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    /// The newest `n` messages of a thread, oldest first.
    pub async fn list_recent_messages(&self, thread_id: &str, n: usize) -> Result<Vec<Message>> {
        let mut violations = Violations::new();
        violations.check_id("threadId", thread_id);
        violations.into_result()?;

        let recent = async {
            let ids = self.order.get_last_n(thread_id, n).await?;
            let targets = ids.into_iter().map(|id| (thread_id.to_string(), id)).collect();
            self.fetch_many(targets).await
        };
        recent.await.or_degraded("list_recent_messages", Vec::new)
    }

    pub(crate) async fn fetch_message(&self, thread_id: &str, message_id: &str) -> Result<Option<Message>> {
        let key = self.keys.message(thread_id, message_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Messages, &key)
            .await
            .backend("STORAGE_KV_GET_MESSAGE_FAILED", || {
                ErrorContext::thread(thread_id).with("messageId", message_id)
            })?;

        match stored {
            None => Ok(None),
            Some(value) => normalize_message(value)
                .map(Some)
                .map_err(|source| MemoryError::Corrupt { key, source }),
        }
    }

    /// Loads `(threadId, messageId)` pairs, keeping input order. Missing and
    /// undecodable records are skipped.
    pub(crate) async fn fetch_many(&self, targets: Vec<(String, String)>) -> Result<Vec<Message>> {
        let fetched: Vec<Option<Message>> = stream::iter(targets)
            .map(|(thread_id, message_id)| async move {
                match self.fetch_message(&thread_id, &message_id).await {
                    Err(MemoryError::Corrupt { key, source }) => {
                        tracing::warn!("Skipping unreadable message record {}: {}", key, source);
                        Ok(None)
                    }
                    other => other,
                }
            })
            .buffered(self.config.hydrate_limit())
            .try_collect()
            .await?;
        Ok(fetched.into_iter().flatten().collect())
    }

    async fn write(&self, message: &Message, record: serde_json::Result<Value>) -> Result<()> {
        let key = self.keys.message(&message.thread_id, &message.id);
        let record = record.map_err(|source| MemoryError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.keys
            .kv()
            .put(Table::Messages, &key, record)
            .await
            .backend("STORAGE_KV_PUT_MESSAGE_FAILED", || {
                ErrorContext::thread(&message.thread_id).with("messageId", message.id.as_str())
            })
    }
}

/// Checks the whole batch and reports every problem at once.
fn validate_messages(messages: &[Message]) -> Result<()> {
    let mut violations = Violations::new();
    let mut seen = HashSet::new();
    for (i, message) in messages.iter().enumerate() {
        violations.check_message_id(&format!("messages[{i}]: id"), &message.id);
        violations.check_id(&format!("messages[{i}]: threadId"), &message.thread_id);
        match message.resource_id.as_deref() {
            Some(resource_id) => violations.check_id(&format!("messages[{i}]: resourceId"), resource_id),
            None => violations.push(format!("messages[{i}]: resourceId is required")),
        }
        if message.content.is_empty() {
            violations.push(format!("messages[{i}]: content is required"));
        }
        if !message.id.is_empty() && !seen.insert(message.id.as_str()) {
            violations.push(format!("messages[{i}]: id '{}' appears more than once", message.id));
        }
    }
    violations.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageContent, MessageRole};

    #[test]
    fn test_validation_reports_every_message() {
        let messages = vec![
            Message::user("", "t1", "r1", "hello"),
            Message::new("m2", "t1", "r1", MessageRole::User, MessageContent::from_parts(vec![])),
            Message::user("m3", "bad:thread", "r1", "hi"),
        ];

        let err = validate_messages(&messages).unwrap_err();
        match err {
            MemoryError::Validation { violations } => {
                assert_eq!(violations.len(), 3);
                assert!(violations[0].starts_with("messages[0]: id"));
                assert!(violations[1].starts_with("messages[1]: content"));
                assert!(violations[2].starts_with("messages[2]: threadId"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_duplicate_ids_and_missing_resource() {
        let mut orphan = Message::user("m1", "t1", "r1", "a");
        orphan.resource_id = None;
        let messages = vec![orphan, Message::user("m1", "t1", "r1", "b")];

        let err = validate_messages(&messages).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("messages[0]: resourceId is required"));
        assert!(text.contains("appears more than once"));
    }
}
