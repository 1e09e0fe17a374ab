use std::sync::Arc;

use super::{KvAdapter, Table};

/// Suffix of the per-thread order index key. Message ids may not use it.
pub const ORDER_KEY_SUFFIX: &str = "messages";

/// Key layout for every record the memory layer stores.
#[derive(Clone)]
pub struct Keyspace {
    kv: Arc<dyn KvAdapter>,
}

impl Keyspace {
    pub fn new(kv: Arc<dyn KvAdapter>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvAdapter> {
        &self.kv
    }

    pub fn thread(&self, thread_id: &str) -> String {
        self.kv.get_key(Table::Threads, &[thread_id])
    }

    pub fn threads_prefix(&self) -> String {
        self.kv.get_key(Table::Threads, &[""])
    }

    pub fn thread_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let prefix = self.threads_prefix();
        key.strip_prefix(prefix.as_str()).filter(|id| !id.is_empty())
    }

    pub fn message(&self, thread_id: &str, message_id: &str) -> String {
        self.kv.get_key(Table::Messages, &[thread_id, message_id])
    }

    /// Prefix covering every message key of a thread, and its order index.
    pub fn thread_messages_prefix(&self, thread_id: &str) -> String {
        self.kv.get_key(Table::Messages, &[thread_id, ""])
    }

    /// Message id encoded in a key listed under [`Self::thread_messages_prefix`].
    /// The order index key yields `None`.
    pub fn message_id_from_key<'a>(&self, thread_id: &str, key: &'a str) -> Option<&'a str> {
        let prefix = self.thread_messages_prefix(thread_id);
        key.strip_prefix(prefix.as_str())
            .filter(|id| !id.is_empty() && *id != ORDER_KEY_SUFFIX)
    }

    pub fn order(&self, thread_id: &str) -> String {
        self.kv.get_key(Table::Messages, &[thread_id, ORDER_KEY_SUFFIX])
    }

    pub fn resource(&self, resource_id: &str) -> String {
        self.kv.get_key(Table::Resources, &[resource_id])
    }

    pub fn message_pointer(&self, message_id: &str) -> String {
        self.kv.get_key(Table::MessageThreads, &[message_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn test_key_layout() {
        let keys = Keyspace::new(Arc::new(MemoryKv::new().with_namespace_prefix("app-")));

        assert_eq!(keys.thread("t1"), "app-threads:t1");
        assert_eq!(keys.message("t1", "m1"), "app-messages:t1:m1");
        assert_eq!(keys.order("t1"), "app-messages:t1:messages");
        assert_eq!(keys.resource("r1"), "app-resources:r1");
        assert_eq!(keys.message_pointer("m1"), "app-message_threads:m1");
    }

    #[test]
    fn test_message_id_from_key_skips_order_index() {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()));

        assert_eq!(keys.message_id_from_key("t1", "messages:t1:m1"), Some("m1"));
        assert_eq!(keys.message_id_from_key("t1", "messages:t1:messages"), None);
        assert_eq!(keys.message_id_from_key("t1", "messages:t2:m1"), None);
        assert_eq!(keys.thread_id_from_key("threads:abc"), Some("abc"));
    }
}
