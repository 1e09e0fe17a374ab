mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use praxis_memory::{
    ErrorCategory, ListMessagesQuery, ListThreadsQuery, MemoryError, MemoryStorage, MemoryStore,
    Metadata, PerPage, SortDirection, Thread, ThreadOrderField,
};
use serde_json::json;

fn metadata(pairs: &[(&str, serde_json::Value)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_save_and_get_thread() {
    let store = store();
    let thread = Thread::new("T1", "R1")
        .with_title("Support chat")
        .with_metadata(metadata(&[("channel", json!("web"))]));

    store.save_thread(thread.clone()).await.unwrap();

    let loaded = store.get_thread_by_id("T1").await.unwrap().unwrap();
    assert_eq!(loaded, thread);
    assert!(store.get_thread_by_id("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_thread_validates_ids() {
    let store = store();
    let err = store.save_thread(Thread::new("", "a:b")).await.unwrap_err();

    match err {
        MemoryError::Validation { violations } => assert_eq!(violations.len(), 2),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_thread_merges_metadata() {
    let store = store();
    let original = store
        .save_thread(Thread::new("T1", "R1").with_metadata(metadata(&[("a", json!(1)), ("b", json!(2))])))
        .await
        .unwrap();

    let updated = store
        .update_thread("T1", "Renamed".to_string(), metadata(&[("b", json!(3)), ("c", json!(4))]))
        .await
        .unwrap();

    assert_eq!(updated.title.as_deref(), Some("Renamed"));
    assert_eq!(updated.metadata, metadata(&[("a", json!(1)), ("b", json!(3)), ("c", json!(4))]));
    assert!(updated.updated_at > original.updated_at);
    assert_eq!(updated.created_at, original.created_at);
    assert_eq!(store.get_thread_by_id("T1").await.unwrap().unwrap(), updated);
}

#[tokio::test]
async fn test_update_missing_thread_fails() {
    let store = store();
    let err = store
        .update_thread("nope", "title".to_string(), Metadata::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::ThreadNotFound(ref id) if id == "nope"));
    assert_eq!(err.category(), ErrorCategory::User);
}

#[tokio::test]
async fn test_saving_messages_touches_thread() {
    let store = store();
    let before = seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 1).await;

    let after = store.get_thread_by_id("T1").await.unwrap().unwrap();
    assert!(after.updated_at > before.updated_at);
}

#[tokio::test]
async fn test_list_threads_stays_within_resource() {
    let store = store();
    for i in 0..7 {
        let resource = if i % 2 == 0 { "R1" } else { "R2" };
        store
            .save_thread(
                Thread::new(format!("T{i}"), resource)
                    .with_created_at(base_time() + Duration::seconds(i)),
            )
            .await
            .unwrap();
    }

    for per_page in [PerPage::Limit(1), PerPage::Limit(3), PerPage::All] {
        for page in 0..5 {
            let result = store
                .list_threads_by_resource_id(
                    ListThreadsQuery::new("R2").with_page(page).with_per_page(per_page),
                )
                .await
                .unwrap();
            assert_eq!(result.total, 3);
            assert!(result.threads.iter().all(|t| t.resource_id == "R2"));
        }
    }
}

#[tokio::test]
async fn test_list_threads_order_and_pages() {
    let store = store();
    for (id, offset) in [("a", 3), ("b", 1), ("c", 2), ("d", 2)] {
        store
            .save_thread(Thread::new(id, "R1").with_created_at(base_time() + Duration::seconds(offset)))
            .await
            .unwrap();
    }

    let newest_first = store
        .list_threads_by_resource_id(ListThreadsQuery::new("R1").with_per_page(3))
        .await
        .unwrap();
    let ids: Vec<&str> = newest_first.threads.iter().map(|t| t.id.as_str()).collect();
    // Equal created_at falls back to id ascending
    assert_eq!(ids, vec!["a", "c", "d"]);
    assert!(newest_first.has_more);
    assert_eq!(newest_first.total, 4);

    let oldest_first = store
        .list_threads_by_resource_id(
            ListThreadsQuery::new("R1")
                .with_order_by(ThreadOrderField::CreatedAt, SortDirection::Asc)
                .with_per_page(3)
                .with_page(1),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = oldest_first.threads.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
    assert!(!oldest_first.has_more);
}

#[tokio::test]
async fn test_list_threads_by_updated_at() {
    let store = store();
    seed_thread(&store, "old", "R1").await;
    seed_thread(&store, "new", "R1").await;
    store
        .update_thread("old", "bumped".to_string(), Metadata::new())
        .await
        .unwrap();

    let page = store
        .list_threads_by_resource_id(
            ListThreadsQuery::new("R1").with_order_by(ThreadOrderField::UpdatedAt, SortDirection::Desc),
        )
        .await
        .unwrap();
    assert_eq!(page.threads[0].id, "old");
}

#[tokio::test]
async fn test_list_threads_negative_page() {
    let store = store();
    let err = store
        .list_threads_by_resource_id(ListThreadsQuery::new("R1").with_page(-2))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_delete_thread_removes_everything() {
    let store = store();
    seed_thread(&store, "T1", "R1").await;
    seed_thread(&store, "T2", "R1").await;
    seed_messages(&store, "T1", "R1", 3).await;
    store
        .save_messages(vec![message_at("keep", "T2", "R1", 1)])
        .await
        .unwrap();

    store.delete_thread("T1").await.unwrap();

    assert!(store.get_thread_by_id("T1").await.unwrap().is_none());
    let former: Vec<String> = ["m1", "m2", "m3"].iter().map(|s| s.to_string()).collect();
    assert!(store.list_messages_by_id(&former).await.unwrap().is_empty());
    assert!(store.order_index().get_full_order("T1").await.unwrap().is_empty());

    let survivors = store
        .list_messages(ListMessagesQuery::thread("T2"))
        .await
        .unwrap();
    assert_eq!(ids(&survivors.messages), vec!["keep"]);
}

#[tokio::test]
async fn test_delete_missing_thread_fails() {
    let store = store();
    let err = store.delete_thread("ghost").await.unwrap_err();
    assert_eq!(err.code(), "STORAGE_THREAD_NOT_FOUND");
}

#[tokio::test]
async fn test_failed_delete_surfaces_backend_error() {
    let kv = Arc::new(FlakyKv::new());
    let store = MemoryStore::new(kv.clone());
    seed_thread(&store, "T1", "R1").await;
    seed_messages(&store, "T1", "R1", 2).await;

    kv.fail_message_deletes(true);
    let err = store.delete_thread("T1").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ThirdParty);
    assert_eq!(err.domain(), "STORAGE");
    assert_eq!(err.context().and_then(|c| c.get("threadId")), Some("T1"));
}

#[tokio::test]
async fn test_get_thread_degrades_on_backend_failure() {
    let kv = Arc::new(FlakyKv::new());
    let store = MemoryStore::new(kv.clone());
    seed_thread(&store, "T1", "R1").await;

    kv.fail_reads(true);
    assert!(store.get_thread_by_id("T1").await.unwrap().is_none());
}
