#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use praxis_memory::{
    KeyInfo, KvAdapter, KvError, MemoryKv, MemoryStorage, MemoryStore, Message, StoreConfig, Table,
    Thread,
};
use serde_json::Value;

pub fn store() -> MemoryStore {
    MemoryStore::new(Arc::new(MemoryKv::new()))
}

pub fn tracked_store() -> MemoryStore {
    MemoryStore::with_config(
        Arc::new(MemoryKv::new()),
        StoreConfig::new().with_message_thread_tracking(true),
    )
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A user message created `offset` seconds after [`base_time`].
pub fn message_at(id: &str, thread_id: &str, resource_id: &str, offset: i64) -> Message {
    Message::user(id, thread_id, resource_id, format!("text of {id}"))
        .with_created_at(base_time() + Duration::seconds(offset))
}

pub async fn seed_thread(store: &MemoryStore, thread_id: &str, resource_id: &str) -> Thread {
    store
        .save_thread(Thread::new(thread_id, resource_id).with_created_at(base_time()))
        .await
        .unwrap()
}

/// Saves `count` messages `m1..=m{count}` one second apart.
pub async fn seed_messages(store: &MemoryStore, thread_id: &str, resource_id: &str, count: usize) -> Vec<Message> {
    let messages: Vec<Message> = (1..=count)
        .map(|i| message_at(&format!("m{i}"), thread_id, resource_id, i as i64))
        .collect();
    store.save_messages(messages).await.unwrap()
}

pub fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

/// Wraps [`MemoryKv`] and fails chosen operations on demand.
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKv,
    fail_reads: AtomicBool,
    fail_lists: AtomicBool,
    fail_message_deletes: AtomicBool,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, on: bool) {
        self.fail_lists.store(on, Ordering::SeqCst);
    }

    pub fn fail_message_deletes(&self, on: bool) {
        self.fail_message_deletes.store(on, Ordering::SeqCst);
    }

    fn injected(op: &str) -> KvError {
        KvError::Backend(format!("injected {op} failure"))
    }
}

#[async_trait]
impl KvAdapter for FlakyKv {
    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, KvError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(table, key).await
    }

    async fn put(&self, table: Table, key: &str, value: Value) -> Result<(), KvError> {
        self.inner.put(table, key, value).await
    }

    async fn delete(&self, table: Table, key: &str) -> Result<(), KvError> {
        if table == Table::Messages && self.fail_message_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(table, key).await
    }

    async fn list(&self, table: Table, prefix: &str) -> Result<Vec<KeyInfo>, KvError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Self::injected("list"));
        }
        self.inner.list(table, prefix).await
    }
}
