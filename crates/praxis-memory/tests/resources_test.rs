mod common;

use std::sync::Arc;

use common::*;
use praxis_memory::{MemoryStorage, MemoryStore, Metadata, Resource};
use serde_json::json;

#[tokio::test]
async fn test_save_and_get_resource() {
    let store = store();
    let resource = Resource::new("R1").with_working_memory("# Notes\n- likes tea");

    store.save_resource(resource.clone()).await.unwrap();

    assert_eq!(store.get_resource_by_id("R1").await.unwrap(), Some(resource));
    assert!(store.get_resource_by_id("R2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_creates_missing_resource() {
    let store = store();

    let created = store
        .update_resource("R1", Some("first notes".to_string()), None)
        .await
        .unwrap();

    assert_eq!(created.id, "R1");
    assert_eq!(created.working_memory.as_deref(), Some("first notes"));
    assert_eq!(store.get_resource_by_id("R1").await.unwrap(), Some(created));
}

#[tokio::test]
async fn test_update_merges_metadata_and_keeps_working_memory() {
    let store = store();
    let mut metadata = Metadata::new();
    metadata.insert("tz".into(), json!("UTC"));
    metadata.insert("lang".into(), json!("en"));
    let original = store
        .save_resource(Resource::new("R1").with_working_memory("notes").with_metadata(metadata))
        .await
        .unwrap();

    let mut patch = Metadata::new();
    patch.insert("lang".into(), json!("pt"));
    let updated = store.update_resource("R1", None, Some(patch)).await.unwrap();

    assert_eq!(updated.working_memory.as_deref(), Some("notes"));
    assert_eq!(updated.metadata["tz"], json!("UTC"));
    assert_eq!(updated.metadata["lang"], json!("pt"));
    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);
}

#[tokio::test]
async fn test_invalid_resource_id() {
    let store = store();
    assert!(store.save_resource(Resource::new("")).await.unwrap_err().is_validation());
    assert!(store
        .update_resource("a:b", None, None)
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn test_get_resource_degrades_on_backend_failure() {
    let kv = Arc::new(FlakyKv::new());
    let store = MemoryStore::new(kv.clone());
    store.save_resource(Resource::new("R1")).await.unwrap();

    kv.fail_reads(true);
    assert!(store.get_resource_by_id("R1").await.unwrap().is_none());

    // Mutations surface the failure
    let err = store.update_resource("R1", None, None).await.unwrap_err();
    assert_eq!(err.code(), "STORAGE_KV_GET_RESOURCE_FAILED");
}
