mod common;

use std::sync::Arc;

use common::*;
use praxis_memory::{
    KvAdapter, ListMessagesQuery, MemoryKv, MemoryStorage, MemoryStore, Message, OrderEntry,
    PerPage, Table,
};
use serde_json::{json, Value};

fn setup() -> (Arc<MemoryKv>, MemoryStore) {
    let kv = Arc::new(MemoryKv::new());
    let store = MemoryStore::new(kv.clone());
    (kv, store)
}

fn record(message: &Message, migrated_from: Option<&str>) -> Value {
    let mut value = serde_json::to_value(message).unwrap();
    if let Some(from) = migrated_from {
        value["_migratedFrom"] = json!(from);
    }
    value
}

async fn listing(store: &MemoryStore, thread_id: &str) -> Vec<String> {
    store
        .list_messages(ListMessagesQuery::thread(thread_id).with_per_page(PerPage::All))
        .await
        .unwrap()
        .messages
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[tokio::test]
async fn test_consistent_thread_is_clean() {
    let (_, store) = setup();
    seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 3).await;

    let report = store.reconcile_thread("T1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.thread_id, "T1");
}

#[tokio::test]
async fn test_dangling_index_entry_is_dropped() {
    let (_, store) = setup();
    seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 2).await;
    store
        .order_index()
        .add("T1", vec![OrderEntry::new("ghost", 1.0)])
        .await
        .unwrap();

    let report = store.reconcile_thread("T1").await.unwrap();
    assert_eq!(report.dropped, vec!["ghost"]);
    assert_eq!(store.order_index().get_full_order("T1").await.unwrap(), vec!["m1", "m2"]);

    assert!(store.reconcile_thread("T1").await.unwrap().is_clean());
}

#[tokio::test]
async fn test_unindexed_record_is_indexed() {
    let (kv, store) = setup();
    seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 2).await;

    // A save that stopped after writing the record
    let orphan = message_at("m3", "T1", "R1", 3);
    kv.put(Table::Messages, "messages:T1:m3", record(&orphan, None))
        .await
        .unwrap();
    assert_eq!(listing(&store, "T1").await, vec!["m1", "m2"]);

    let report = store.reconcile_thread("T1").await.unwrap();
    assert_eq!(report.unindexed, vec!["m3"]);
    assert_eq!(listing(&store, "T1").await, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_move_stopped_after_copy_is_rolled_back() {
    let (kv, store) = setup();
    seed_thread(&store, "A", "R1").await;
    seed_thread(&store, "B", "R1").await;
    seed_messages(&store, "A", "R1", 2).await;

    let copy = message_at("m1", "B", "R1", 1);
    kv.put(Table::Messages, "messages:B:m1", record(&copy, Some("A")))
        .await
        .unwrap();

    let report = store.reconcile_thread("B").await.unwrap();
    assert_eq!(report.removed, vec!["m1"]);
    assert!(kv.get(Table::Messages, "messages:B:m1").await.unwrap().is_none());

    assert!(store.reconcile_thread("A").await.unwrap().is_clean());
    assert_eq!(listing(&store, "A").await, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_move_stopped_after_unindexing_is_completed() {
    let (kv, store) = setup();
    seed_thread(&store, "A", "R1").await;
    seed_thread(&store, "B", "R1").await;
    seed_messages(&store, "A", "R1", 2).await;

    // Copy written and source index entry removed; source record still there
    let copy = message_at("m1", "B", "R1", 1);
    kv.put(Table::Messages, "messages:B:m1", record(&copy, Some("A")))
        .await
        .unwrap();
    store
        .order_index()
        .remove("A", &["m1".to_string()])
        .await
        .unwrap();

    let source = store.reconcile_thread("A").await.unwrap();
    assert_eq!(source.removed, vec!["m1"]);

    let destination = store.reconcile_thread("B").await.unwrap();
    assert_eq!(destination.unindexed, vec!["m1"]);

    assert_eq!(listing(&store, "A").await, vec!["m2"]);
    assert_eq!(listing(&store, "B").await, vec!["m1"]);
    assert_eq!(
        store.messages().find_message_in_any_thread("m1").await.unwrap().as_deref(),
        Some("B")
    );
}

#[tokio::test]
async fn test_record_naming_other_thread_is_adopted() {
    let (kv, store) = setup();
    seed_thread(&store, "B", "R1").await;

    let stray = message_at("s1", "A", "R1", 1);
    kv.put(Table::Messages, "messages:B:s1", record(&stray, None))
        .await
        .unwrap();

    let report = store.reconcile_thread("B").await.unwrap();
    assert_eq!(report.adopted, vec!["s1"]);
    assert_eq!(report.unindexed, vec!["s1"]);

    let page = store
        .list_messages(ListMessagesQuery::thread("B"))
        .await
        .unwrap();
    assert_eq!(page.messages[0].thread_id, "B");
}

#[tokio::test]
async fn test_leftovers_of_deleted_thread_are_purged() {
    let (kv, store) = setup();
    seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 2).await;
    kv.delete(Table::Threads, "threads:T1").await.unwrap();

    let report = store.reconcile_thread("T1").await.unwrap();
    assert!(report.purged);
    assert!(kv.list(Table::Messages, "messages:T1:").await.unwrap().is_empty());

    assert!(store.reconcile_thread("T1").await.unwrap().is_clean());
}
