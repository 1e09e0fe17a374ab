use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::kv::{Keyspace, KvAdapter};
use crate::models::{
    ListMessagesQuery, ListThreadsQuery, Message, MessagePage, MessageUpdate, Metadata, Resource,
    Thread, ThreadPage,
};
use crate::order::OrderIndex;
use crate::pagination::MessageListing;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::repositories::{MessageRepository, ResourceRepository, ThreadRepository};
use crate::trait_client::MemoryStorage;

/// Conversation memory over a key-value adapter.
///
/// Cheap to clone; clones share the adapter and the per-key update queue, so
/// every handle used against one store must come from the same instance.
#[derive(Clone)]
pub struct MemoryStore {
    config: StoreConfig,
    order: OrderIndex,
    thread_repo: ThreadRepository,
    message_repo: MessageRepository,
    resource_repo: ResourceRepository,
    listing: MessageListing,
    reconciler: Reconciler,
}

impl MemoryStore {
    pub fn new(kv: Arc<dyn KvAdapter>) -> Self {
        Self::with_config(kv, StoreConfig::default())
    }

    pub fn with_config(kv: Arc<dyn KvAdapter>, config: StoreConfig) -> Self {
        let keys = Keyspace::new(kv);
        let order = OrderIndex::new(keys.clone());

        let thread_repo = ThreadRepository::new(keys.clone(), config.clone(), order.clone());
        let message_repo =
            MessageRepository::new(keys.clone(), config.clone(), order.clone(), thread_repo.clone());
        let resource_repo = ResourceRepository::new(keys.clone(), order.serializer().clone());
        let listing = MessageListing::new(order.clone(), message_repo.clone());
        let reconciler = Reconciler::new(
            keys,
            order.clone(),
            thread_repo.clone(),
            message_repo.locator().clone(),
        );

        Self {
            config,
            order,
            thread_repo,
            message_repo,
            resource_repo,
            listing,
            reconciler,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadRepository {
        &self.thread_repo
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.message_repo
    }

    pub fn resources(&self) -> &ResourceRepository {
        &self.resource_repo
    }

    pub fn order_index(&self) -> &OrderIndex {
        &self.order
    }
}

#[async_trait]
impl MemoryStorage for MemoryStore {
    async fn get_thread_by_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.thread_repo.get_thread_by_id(thread_id).await
    }

    async fn save_thread(&self, thread: Thread) -> Result<Thread> {
        self.thread_repo.save_thread(thread).await
    }

    async fn update_thread(&self, thread_id: &str, title: String, metadata: Metadata) -> Result<Thread> {
        self.thread_repo.update_thread(thread_id, title, metadata).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.thread_repo.delete_thread(thread_id).await
    }

    async fn list_threads_by_resource_id(&self, query: ListThreadsQuery) -> Result<ThreadPage> {
        self.thread_repo.list_threads_by_resource_id(query).await
    }

    async fn save_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        self.message_repo.save_messages(messages).await
    }

    async fn update_messages(&self, updates: Vec<MessageUpdate>) -> Result<Vec<Message>> {
        self.message_repo.update_messages(updates).await
    }

    async fn list_messages_by_id(&self, message_ids: &[String]) -> Result<Vec<Message>> {
        self.message_repo.list_messages_by_id(message_ids).await
    }

    async fn list_messages(&self, query: ListMessagesQuery) -> Result<MessagePage> {
        self.listing.list_messages(query).await
    }

    async fn list_recent_messages(&self, thread_id: &str, n: usize) -> Result<Vec<Message>> {
        self.message_repo.list_recent_messages(thread_id, n).await
    }

    async fn get_resource_by_id(&self, resource_id: &str) -> Result<Option<Resource>> {
        self.resource_repo.get_resource_by_id(resource_id).await
    }

    async fn save_resource(&self, resource: Resource) -> Result<Resource> {
        self.resource_repo.save_resource(resource).await
    }

    async fn update_resource(
        &self,
        resource_id: &str,
        working_memory: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Resource> {
        self.resource_repo
            .update_resource(resource_id, working_memory, metadata)
            .await
    }

    async fn reconcile_thread(&self, thread_id: &str) -> Result<ReconcileReport> {
        self.reconciler.reconcile_thread(thread_id).await
    }
}
