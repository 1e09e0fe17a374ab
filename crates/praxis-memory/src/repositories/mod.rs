pub mod locator;
pub mod message;
pub mod resource;
pub mod thread;

pub use locator::MessageLocator;
pub use message::MessageRepository;
pub use resource::ResourceRepository;
pub use thread::ThreadRepository;

use crate::error::{BackendResultExt, ErrorContext, MemoryError, Result};
use crate::kv::{Keyspace, Table, ORDER_KEY_SUFFIX};

/// Ids of every stored thread. Not a snapshot: threads may appear or vanish
/// while the caller walks the list.
pub(crate) async fn list_thread_ids(keys: &Keyspace) -> Result<Vec<String>> {
    let prefix = keys.threads_prefix();
    let listed = keys
        .kv()
        .list(Table::Threads, &prefix)
        .await
        .backend("STORAGE_KV_LIST_THREADS_FAILED", ErrorContext::new)?;
    Ok(listed
        .iter()
        .filter_map(|k| keys.thread_id_from_key(&k.name))
        .map(str::to_string)
        .collect())
}

/// Ids of every message key stored under a thread (order index excluded).
pub(crate) async fn list_message_ids(keys: &Keyspace, thread_id: &str) -> Result<Vec<String>> {
    let prefix = keys.thread_messages_prefix(thread_id);
    let listed = keys
        .kv()
        .list(Table::Messages, &prefix)
        .await
        .backend("STORAGE_KV_LIST_MESSAGES_FAILED", || ErrorContext::thread(thread_id))?;
    Ok(listed
        .iter()
        .filter_map(|k| keys.message_id_from_key(thread_id, &k.name))
        .map(str::to_string)
        .collect())
}

/// Collects every input problem before failing.
#[derive(Debug, Default)]
pub(crate) struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: impl Into<String>) {
        self.0.push(violation.into());
    }

    /// Ids end up inside keys, so they may not be empty or contain the separator.
    pub fn check_id(&mut self, label: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(format!("{label} is required"));
        } else if value.contains(':') {
            self.push(format!("{label} '{value}' must not contain ':'"));
        }
    }

    pub fn check_message_id(&mut self, label: &str, value: &str) {
        self.check_id(label, value);
        if value == ORDER_KEY_SUFFIX {
            self.push(format!("{label} '{value}' is reserved"));
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(MemoryError::Validation { violations: self.0 })
        }
    }
}

pub(crate) fn check_page(page: i64) -> Result<()> {
    if page < 0 {
        return Err(MemoryError::validation(format!("page must be >= 0, got {page}")));
    }
    Ok(())
}
