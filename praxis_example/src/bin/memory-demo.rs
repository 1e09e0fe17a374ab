use anyhow::Result;
use chrono::{Duration, Utc};
use praxis_memory::{
    IncludeRequest, ListMessagesQuery, ListThreadsQuery, MemoryStorage, Message, MessageUpdate,
    Metadata, SortDirection, Thread,
};
use praxis_memory_example::{init_logging, open_store, DemoConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = DemoConfig::load()?;
    init_logging(&config);

    tracing::info!("Starting memory demo ({:?} backend)", config.backend.kind);
    let store = open_store(&config).await?;

    let resource_id = format!("user_{}", uuid::Uuid::new_v4().simple());
    let support = format!("thread_{}", uuid::Uuid::new_v4().simple());
    let billing = format!("thread_{}", uuid::Uuid::new_v4().simple());

    // 1. Threads
    let mut metadata = Metadata::new();
    metadata.insert("channel".into(), json!("web"));
    store
        .save_thread(Thread::new(&support, &resource_id).with_title("Support").with_metadata(metadata))
        .await?;
    store
        .save_thread(Thread::new(&billing, &resource_id).with_title("Billing"))
        .await?;
    println!("✓ Created threads {} and {}", support, billing);

    // 2. Messages, one second apart
    let start = Utc::now();
    let lines = [
        "Hi, my invoice looks wrong",
        "Sorry to hear that! Which invoice?",
        "The one from March",
        "I can see a duplicate charge there",
        "Can you refund it?",
    ];
    let messages: Vec<Message> = lines
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let id = format!("msg_{}", i + 1);
            let message = if i % 2 == 0 {
                Message::user(id, &support, &resource_id, *text)
            } else {
                Message::assistant(id, &support, &resource_id, *text)
            };
            message.with_created_at(start + Duration::seconds(i as i64))
        })
        .collect();
    let saved = store.save_messages(messages).await?;
    println!("✓ Saved {} messages", saved.len());

    // 3. Page through the thread
    let mut page = 0;
    loop {
        let result = store
            .list_messages(ListMessagesQuery::thread(&support).with_per_page(2).with_page(page))
            .await?;
        let ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
        println!("  page {} of {} total: {:?}", page, result.total, ids);
        if !result.has_more {
            break;
        }
        page += 1;
    }

    // 4. Newest first, with context around an older message
    let result = store
        .list_messages(
            ListMessagesQuery::thread(&support)
                .with_per_page(1)
                .with_order(SortDirection::Desc)
                .with_include(IncludeRequest::new("msg_2").with_context(1, 0)),
        )
        .await?;
    let ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
    println!("✓ Latest message plus context around msg_2: {:?}", ids);

    // 5. Move the refund request to the billing thread
    store
        .update_messages(vec![MessageUpdate::new("msg_5").move_to(&billing)])
        .await?;
    let moved = store.list_recent_messages(&billing, 10).await?;
    println!("✓ Billing thread now holds {:?}", moved.iter().map(|m| &m.id).collect::<Vec<_>>());

    // 6. Working memory
    store
        .update_resource(&resource_id, Some("- prefers email follow-ups".to_string()), None)
        .await?;
    if let Some(resource) = store.get_resource_by_id(&resource_id).await? {
        println!("✓ Working memory: {:?}", resource.working_memory);
    }

    // 7. Threads of the resource
    let threads = store
        .list_threads_by_resource_id(ListThreadsQuery::new(&resource_id))
        .await?;
    for thread in &threads.threads {
        println!("  thread {} {:?}", thread.id, thread.title);
    }

    // 8. Consistency check, then clean up
    let report = store.reconcile_thread(&support).await?;
    println!("✓ Reconcile clean: {}", report.is_clean());

    store.delete_thread(&support).await?;
    store.delete_thread(&billing).await?;
    println!("✓ Deleted demo threads");

    tracing::info!("Memory demo finished");
    Ok(())
}
