use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ListMessagesQuery, ListThreadsQuery, Message, MessagePage, MessageUpdate, Metadata, Resource,
    Thread, ThreadPage,
};
use crate::reconcile::ReconcileReport;

/// Conversation memory operations
///
/// Read operations degrade to `None` / empty on backend failure (the failure
/// is logged); mutations always surface the error.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// Get a thread by ID
    async fn get_thread_by_id(&self, thread_id: &str) -> Result<Option<Thread>>;

    /// Create or replace a thread
    async fn save_thread(&self, thread: Thread) -> Result<Thread>;

    /// Replace a thread's title and merge its metadata
    async fn update_thread(&self, thread_id: &str, title: String, metadata: Metadata) -> Result<Thread>;

    /// Delete a thread and every message stored under it
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// List threads for a resource
    async fn list_threads_by_resource_id(&self, query: ListThreadsQuery) -> Result<ThreadPage>;

    /// Save a batch of messages, moving any that live in another thread
    async fn save_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>>;

    /// Apply partial updates, moving messages whose thread changes
    async fn update_messages(&self, updates: Vec<MessageUpdate>) -> Result<Vec<Message>>;

    /// Get messages by ID, oldest first
    async fn list_messages_by_id(&self, message_ids: &[String]) -> Result<Vec<Message>>;

    /// Paginated message listing with include windows
    async fn list_messages(&self, query: ListMessagesQuery) -> Result<MessagePage>;

    /// The newest `n` messages of a thread, oldest first
    async fn list_recent_messages(&self, thread_id: &str, n: usize) -> Result<Vec<Message>>;

    /// Get a resource by ID
    async fn get_resource_by_id(&self, resource_id: &str) -> Result<Option<Resource>>;

    /// Create or replace a resource
    async fn save_resource(&self, resource: Resource) -> Result<Resource>;

    /// Update working memory and metadata, creating the resource if needed
    async fn update_resource(
        &self,
        resource_id: &str,
        working_memory: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<Resource>;

    /// Repair a thread left inconsistent by an interrupted operation
    async fn reconcile_thread(&self, thread_id: &str) -> Result<ReconcileReport>;
}
