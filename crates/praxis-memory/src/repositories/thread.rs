use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};

use super::{check_page, list_message_ids, list_thread_ids, MessageLocator, Violations};
use crate::config::StoreConfig;
use crate::error::{BackendResultExt, DegradeExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table};
use crate::models::{
    merge_metadata, ListThreadsQuery, Metadata, PerPage, SortDirection, Thread, ThreadOrderField,
    ThreadPage,
};
use crate::order::{OrderIndex, UpdateSerializer};

#[derive(Clone)]
pub struct ThreadRepository {
    keys: Keyspace,
    config: StoreConfig,
    order: OrderIndex,
    locator: MessageLocator,
    serializer: UpdateSerializer,
}

impl ThreadRepository {
    pub fn new(keys: Keyspace, config: StoreConfig, order: OrderIndex) -> Self {
        let locator = MessageLocator::new(keys.clone(), config.clone());
        let serializer = order.serializer().clone();
        Self {
            keys,
            config,
            order,
            locator,
            serializer,
        }
    }

    /// Get thread by ID. Backend failures read as "not found".
    pub async fn get_thread_by_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.fetch(thread_id)
            .await
            .or_degraded("get_thread_by_id", || None)
    }

    /// Create or replace a thread
    pub async fn save_thread(&self, thread: Thread) -> Result<Thread> {
        let mut violations = Violations::new();
        violations.check_id("id", &thread.id);
        violations.check_id("resourceId", &thread.resource_id);
        violations.into_result()?;

        let key = self.keys.thread(&thread.id);
        self.serializer
            .run(&key, || self.write(&key, &thread))
            .await?;
        tracing::debug!("Saved thread {} for resource {}", thread.id, thread.resource_id);
        Ok(thread)
    }

    /// Replace the title and shallow-merge `metadata` into the stored metadata.
    pub async fn update_thread(
        &self,
        thread_id: &str,
        title: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Thread> {
        let title = title.into();
        let key = self.keys.thread(thread_id);
        self.serializer
            .run(&key, || async {
                let mut thread = self
                    .fetch(thread_id)
                    .await?
                    .ok_or_else(|| MemoryError::ThreadNotFound(thread_id.to_string()))?;
                thread.title = Some(title);
                merge_metadata(&mut thread.metadata, metadata);
                thread.updated_at = advance(thread.updated_at);
                self.write(&key, &thread).await?;
                Ok(thread)
            })
            .await
    }

    /// Touch thread (advance updated_at)
    pub(crate) async fn touch(&self, thread_id: &str) -> Result<()> {
        let key = self.keys.thread(thread_id);
        self.serializer
            .run(&key, || async {
                let mut thread = self
                    .fetch(thread_id)
                    .await?
                    .ok_or_else(|| MemoryError::ThreadNotFound(thread_id.to_string()))?;
                thread.updated_at = advance(thread.updated_at);
                self.write(&key, &thread).await
            })
            .await
    }

    /// List a resource's threads, sorted and paginated
    pub async fn list_threads_by_resource_id(&self, query: ListThreadsQuery) -> Result<ThreadPage> {
        check_page(query.page)?;
        let mut violations = Violations::new();
        violations.check_id("resourceId", &query.resource_id);
        violations.into_result()?;

        let (page, per_page) = (query.page, query.per_page);
        self.collect_threads(query)
            .await
            .or_degraded("list_threads_by_resource_id", || ThreadPage {
                threads: Vec::new(),
                total: 0,
                page,
                per_page,
                has_more: false,
            })
    }

    async fn collect_threads(&self, query: ListThreadsQuery) -> Result<ThreadPage> {
        let ids = list_thread_ids(&self.keys).await?;

        // A thread deleted between list and fetch is skipped
        let fetched: Vec<Option<Thread>> = stream::iter(ids)
            .map(|id| async move { self.fetch_lenient(&id).await })
            .buffered(self.config.scan_limit())
            .try_collect()
            .await?;

        let mut threads: Vec<Thread> = fetched
            .into_iter()
            .flatten()
            .filter(|t| t.resource_id == query.resource_id)
            .collect();

        let order_by = query.order_by;
        threads.sort_by(|a, b| {
            let by_field = match order_by.field {
                ThreadOrderField::CreatedAt => a.created_at.cmp(&b.created_at),
                ThreadOrderField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            let by_field = match order_by.direction {
                SortDirection::Asc => by_field,
                SortDirection::Desc => by_field.reverse(),
            };
            if by_field == Ordering::Equal {
                a.id.cmp(&b.id)
            } else {
                by_field
            }
        });

        let total = threads.len();
        let (threads, has_more) = match query.per_page {
            PerPage::All => (threads, false),
            PerPage::Limit(limit) => {
                let offset = (query.page as usize).saturating_mul(limit);
                let page: Vec<Thread> = threads.into_iter().skip(offset).take(limit).collect();
                let has_more = offset.saturating_add(page.len()) < total;
                (page, has_more)
            }
        };

        Ok(ThreadPage {
            threads,
            total,
            page: query.page,
            per_page: query.per_page,
            has_more,
        })
    }

    /// Delete a thread with its messages, order index and pointers.
    ///
    /// Deletes run concurrently and are not atomic: a failure can leave part
    /// of the thread behind, which `reconcile_thread` removes.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut violations = Violations::new();
        violations.check_id("threadId", thread_id);
        violations.into_result()?;

        if self.fetch(thread_id).await?.is_none() {
            return Err(MemoryError::ThreadNotFound(thread_id.to_string()));
        }

        let message_ids = list_message_ids(&self.keys, thread_id).await?;
        let removed = message_ids.len();
        self.purge(thread_id, message_ids).await?;

        tracing::info!("Deleted thread {} with {} messages", thread_id, removed);
        Ok(())
    }

    /// Deletes the thread key, the listed message keys and the order index.
    pub(crate) async fn purge(&self, thread_id: &str, message_ids: Vec<String>) -> Result<()> {
        let mut deletions: Vec<BoxFuture<'_, Result<()>>> = Vec::new();

        for message_id in message_ids {
            deletions.push(
                async move {
                    let key = self.keys.message(thread_id, &message_id);
                    self.keys
                        .kv()
                        .delete(Table::Messages, &key)
                        .await
                        .backend("STORAGE_KV_DELETE_THREAD_FAILED", || {
                            ErrorContext::thread(thread_id).with("messageId", message_id.as_str())
                        })?;
                    self.locator.forget(&message_id, thread_id).await
                }
                .boxed(),
            );
        }
        deletions.push(self.order.clear(thread_id).boxed());
        deletions.push(
            async move {
                let key = self.keys.thread(thread_id);
                self.keys
                    .kv()
                    .delete(Table::Threads, &key)
                    .await
                    .backend("STORAGE_KV_DELETE_THREAD_FAILED", || ErrorContext::thread(thread_id))
            }
            .boxed(),
        );

        futures::future::try_join_all(deletions).await?;
        Ok(())
    }

    pub(crate) async fn fetch(&self, thread_id: &str) -> Result<Option<Thread>> {
        let key = self.keys.thread(thread_id);
        let stored = self
            .keys
            .kv()
            .get(Table::Threads, &key)
            .await
            .backend("STORAGE_KV_GET_THREAD_FAILED", || ErrorContext::thread(thread_id))?;

        match stored {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| MemoryError::Corrupt { key, source }),
        }
    }

    pub(crate) async fn exists(&self, thread_id: &str) -> Result<bool> {
        Ok(self.fetch(thread_id).await?.is_some())
    }

    /// Like [`Self::fetch`], but an undecodable record is logged and skipped.
    async fn fetch_lenient(&self, thread_id: &str) -> Result<Option<Thread>> {
        match self.fetch(thread_id).await {
            Err(MemoryError::Corrupt { key, source }) => {
                tracing::warn!("Skipping unreadable thread record {}: {}", key, source);
                Ok(None)
            }
            other => other,
        }
    }

    async fn write(&self, key: &str, thread: &Thread) -> Result<()> {
        let value = serde_json::to_value(thread).map_err(|source| MemoryError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.keys
            .kv()
            .put(Table::Threads, key, value)
            .await
            .backend("STORAGE_KV_PUT_THREAD_FAILED", || ErrorContext::thread(&thread.id))
    }
}

/// Strictly later than `previous`, even when the clock has not moved.
fn advance(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + Duration::microseconds(1))
}
