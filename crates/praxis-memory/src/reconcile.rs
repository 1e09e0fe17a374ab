//! Repair pass for multi-key sequences that stopped halfway.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BackendResultExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};
use crate::models::{normalize_message, Message, MIGRATED_FROM_FIELD};
use crate::order::{score_for, OrderEntry, OrderIndex, OrderSnapshot};
use crate::repositories::{list_message_ids, MessageLocator, ThreadRepository, Violations};

/// What [`Reconciler::reconcile_thread`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub thread_id: String,
    /// Stored messages that were missing from the order index.
    pub unindexed: Vec<String>,
    /// Index entries whose message record no longer exists.
    pub dropped: Vec<String>,
    /// Copies deleted because another thread owns the message.
    pub removed: Vec<String>,
    /// Records rewritten to name this thread.
    pub adopted: Vec<String>,
    /// The thread record was gone; every leftover key was deleted.
    pub purged: bool,
}

impl ReconcileReport {
    fn new(thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.unindexed.is_empty()
            && self.dropped.is_empty()
            && self.removed.is_empty()
            && self.adopted.is_empty()
            && !self.purged
    }
}

#[derive(Clone)]
pub struct Reconciler {
    keys: Keyspace,
    order: OrderIndex,
    threads: ThreadRepository,
    locator: MessageLocator,
}

/// A message key found under the thread being reconciled.
struct StoredCopy {
    message: Message,
    migrated_from: Option<String>,
}

impl Reconciler {
    pub fn new(keys: Keyspace, order: OrderIndex, threads: ThreadRepository, locator: MessageLocator) -> Self {
        Self {
            keys,
            order,
            threads,
            locator,
        }
    }

    /// Brings a thread's message keys, order index and pointers back in line.
    ///
    /// Running it again right after reports a clean thread.
    pub async fn reconcile_thread(&self, thread_id: &str) -> Result<ReconcileReport> {
        let mut violations = Violations::new();
        violations.check_id("threadId", thread_id);
        violations.into_result()?;

        let mut report = ReconcileReport::new(thread_id);
        let message_ids = list_message_ids(&self.keys, thread_id).await?;

        if !self.threads.exists(thread_id).await? {
            let order = self.order.snapshot(thread_id).await?;
            if message_ids.is_empty() && order.is_empty() {
                return Ok(report);
            }
            tracing::warn!(
                "Thread {} is gone but {} message keys remain; purging",
                thread_id,
                message_ids.len()
            );
            self.threads.purge(thread_id, message_ids).await?;
            report.purged = true;
            return Ok(report);
        }

        let order = self.order.snapshot(thread_id).await?;
        let mut present: Vec<Message> = Vec::new();
        let mut unreadable: HashSet<String> = HashSet::new();

        for message_id in message_ids {
            let Some(copy) = self.load_copy(thread_id, &message_id).await? else {
                unreadable.insert(message_id);
                continue;
            };
            if order.contains(&message_id) && copy.message.thread_id == thread_id {
                present.push(copy.message);
                continue;
            }
            if self.keep_copy(thread_id, &copy, &order).await? {
                if copy.message.thread_id != thread_id {
                    let mut message = copy.message;
                    message.thread_id = thread_id.to_string();
                    self.rewrite(&message).await?;
                    report.adopted.push(message.id.clone());
                    present.push(message);
                } else {
                    present.push(copy.message);
                }
            } else {
                self.delete_copy(thread_id, &message_id).await?;
                report.removed.push(message_id);
            }
        }

        let present_ids: HashSet<&str> = present.iter().map(|m| m.id.as_str()).collect();
        report.dropped = order
            .full_order()
            .into_iter()
            .filter(|id| !present_ids.contains(id.as_str()) && !unreadable.contains(id))
            .collect();
        self.order.remove(thread_id, &report.dropped).await?;

        let missing: Vec<&Message> = present.iter().filter(|m| !order.contains(&m.id)).collect();
        report.unindexed = missing.iter().map(|m| m.id.clone()).collect();
        let entries = missing
            .iter()
            .map(|m| OrderEntry::new(m.id.as_str(), score_for(&m.created_at, 0)))
            .collect();
        self.order.add(thread_id, entries).await?;

        for message in &present {
            self.locator.record(&message.id, thread_id).await?;
        }

        if report.is_clean() {
            tracing::debug!("Thread {} is consistent", thread_id);
        } else {
            tracing::info!(
                "Reconciled thread {}: {} indexed, {} dropped, {} removed, {} adopted",
                thread_id,
                report.unindexed.len(),
                report.dropped.len(),
                report.removed.len(),
                report.adopted.len()
            );
        }
        Ok(report)
    }

    /// Decides whether a copy that is unindexed here, or names another
    /// thread, belongs to this thread.
    async fn keep_copy(
        &self,
        thread_id: &str,
        copy: &StoredCopy,
        order: &OrderSnapshot,
    ) -> Result<bool> {
        let message_id = copy.message.id.as_str();
        let holders = self.locator.other_holders(message_id, thread_id).await?;
        if holders.is_empty() {
            return Ok(true);
        }

        // Indexed elsewhere: the move into this thread never finished
        for holder in &holders {
            if self.order.snapshot(holder).await?.contains(message_id) {
                return Ok(false);
            }
        }
        if order.contains(message_id) {
            return Ok(true);
        }

        // Nobody indexes it: the destination copy names where it came from
        if copy
            .migrated_from
            .as_deref()
            .is_some_and(|from| holders.iter().any(|h| h == from))
        {
            return Ok(true);
        }
        for holder in &holders {
            let other = self.load_copy(holder, message_id).await?;
            if other.is_some_and(|o| o.migrated_from.as_deref() == Some(thread_id)) {
                return Ok(false);
            }
        }

        tracing::warn!(
            "Message {} is stored in {} and {:?} with no owner; keeping both",
            message_id,
            thread_id,
            holders
        );
        Ok(true)
    }

    async fn load_copy(&self, thread_id: &str, message_id: &str) -> Result<Option<StoredCopy>> {
        let key = self.keys.message(thread_id, message_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Messages, &key)
            .await
            .backend("STORAGE_KV_GET_MESSAGE_FAILED", || {
                ErrorContext::thread(thread_id).with("messageId", message_id)
            })?;
        let Some(value) = stored else {
            return Ok(None);
        };

        let migrated_from = value
            .get(MIGRATED_FROM_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        match normalize_message(value) {
            Ok(message) => Ok(Some(StoredCopy {
                message,
                migrated_from,
            })),
            Err(source) => {
                tracing::warn!("Leaving unreadable message record {} untouched: {}", key, source);
                Ok(None)
            }
        }
    }

    async fn rewrite(&self, message: &Message) -> Result<()> {
        let key = self.keys.message(&message.thread_id, &message.id);
        let record = message
            .to_record(0)
            .map_err(|source| MemoryError::Corrupt {
                key: key.clone(),
                source,
            })?;
        self.keys
            .kv()
            .put(Table::Messages, &key, record)
            .await
            .backend("STORAGE_KV_RECONCILE_FAILED", || {
                ErrorContext::thread(&message.thread_id).with("messageId", message.id.as_str())
            })
    }

    async fn delete_copy(&self, thread_id: &str, message_id: &str) -> Result<()> {
        let key = self.keys.message(thread_id, message_id);
        self.keys
            .kv()
            .delete(Table::Messages, &key)
            .await
            .backend("STORAGE_KV_RECONCILE_FAILED", || {
                ErrorContext::thread(thread_id).with("messageId", message_id)
            })?;
        self.locator.forget(message_id, thread_id).await
    }
}
