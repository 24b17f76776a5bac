use super::*;
use serde_json::json;
use shared::{
    domain::{Message, MessageId, RoomId, SendStatus, UserId},
    protocol::{decode_message, FieldUpdate},
};
use std::collections::BTreeMap;

fn room_messages() -> Collection {
    Collection::messages(&RoomId::from("room1"))
}

fn sample_message(id: &str, sent_at: i64) -> Message {
    Message::new_normal(
        MessageId::from(id),
        UserId::from("user2"),
        "Hanako",
        format!("body {id}"),
        sent_at,
    )
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("documents.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn lists_documents_in_first_write_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let room_id = RoomId::from("room1");
    storage
        .apply_batch(&[
            WriteOperation::put_message(&room_id, &sample_message("b", 20)),
            WriteOperation::put_message(&room_id, &sample_message("a", 10)),
        ])
        .await
        .expect("batch");
    // Overwriting keeps the original position.
    storage
        .apply_batch(&[WriteOperation::put_message(&room_id, &sample_message("b", 20))])
        .await
        .expect("rewrite");

    let docs = storage.list_documents(&room_messages()).await.expect("list");
    let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[tokio::test]
async fn update_merges_fields_and_unions_arrays() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let room_id = RoomId::from("room1");
    let message_id = MessageId::from("m1");
    storage
        .apply_batch(&[WriteOperation::put_message(&room_id, &sample_message("m1", 5))])
        .await
        .expect("put");

    let reader = UserId::from("user1");
    storage
        .apply_batch(&[
            WriteOperation::mark_read(&room_id, &message_id, &reader),
            WriteOperation::mark_read(&room_id, &message_id, &reader),
            WriteOperation::set_send_status(&room_id, &message_id, SendStatus::ConfirmedSent),
        ])
        .await
        .expect("update");

    let doc = storage
        .get_document(&room_messages(), "m1")
        .await
        .expect("get")
        .expect("present");
    let message = decode_message(&doc).expect("decode");
    assert_eq!(message.readers.len(), 1);
    assert!(message.is_read_by(&reader));
    assert_eq!(message.send_status, SendStatus::ConfirmedSent);
    assert_eq!(message.body, "body m1");
}

#[tokio::test]
async fn failed_update_rolls_back_whole_batch() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let room_id = RoomId::from("room1");

    let mut fields = BTreeMap::new();
    fields.insert("lastMessage".to_string(), FieldUpdate::set("hi"));
    let result = storage
        .apply_batch(&[
            WriteOperation::put_message(&room_id, &sample_message("m1", 5)),
            WriteOperation::Update {
                collection: Collection::Rooms,
                document_id: "missing-room".into(),
                fields,
            },
        ])
        .await;

    assert!(result.is_err());
    assert!(storage
        .get_document(&room_messages(), "m1")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn committed_batches_are_published_per_collection() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut changes = storage.subscribe_changes();
    let room_id = RoomId::from("room1");

    storage
        .apply_batch(&[WriteOperation::Put {
            collection: Collection::Rooms,
            document_id: "room1".into(),
            fields: json!({ "lastMessage": "" }).as_object().cloned().unwrap_or_default(),
        }])
        .await
        .expect("room");
    let first = changes.recv().await.expect("room change");
    assert_eq!(first.collection, Collection::Rooms);
    assert_eq!(first.added.len(), 1);

    storage
        .apply_batch(&[
            WriteOperation::put_message(&room_id, &sample_message("m1", 5)),
            WriteOperation::set_send_status(&room_id, &MessageId::from("m1"), SendStatus::ConfirmedSent),
            WriteOperation::update_room_summary(&shared::domain::Room {
                id: room_id.clone(),
                participant_ids: Vec::new(),
                participant_names: Vec::new(),
                icon_url: None,
                last_message: "body m1".into(),
                last_message_user_name: "Hanako".into(),
                created_at: None,
                updated_at: Some(5),
            }),
        ])
        .await
        .expect("batch");

    let messages = changes.recv().await.expect("message change");
    assert_eq!(messages.collection, room_messages());
    assert_eq!(messages.added.len(), 1);
    assert!(messages.changed.is_empty());
    assert_eq!(messages.added[0].data["isSent"], json!(true));

    let rooms = changes.recv().await.expect("room summary change");
    assert_eq!(rooms.collection, Collection::Rooms);
    assert_eq!(rooms.changed.len(), 1);
    assert_eq!(rooms.changed[0].data["lastMessage"], json!("body m1"));
}

#[tokio::test]
async fn changes_since_splits_added_from_changed() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let room_id = RoomId::from("room1");
    storage
        .apply_batch(&[WriteOperation::put_message(&room_id, &sample_message("m1", 5))])
        .await
        .expect("m1");
    let (documents, watermark) = storage.snapshot(&room_messages()).await.expect("snapshot");
    assert_eq!(documents.len(), 1);
    assert_eq!(watermark, 1);

    storage
        .apply_batch(&[
            WriteOperation::put_message(&room_id, &sample_message("m2", 6)),
            WriteOperation::mark_read(&room_id, &MessageId::from("m1"), &UserId::from("user1")),
        ])
        .await
        .expect("batch");

    let changes = storage
        .changes_since(&room_messages(), watermark)
        .await
        .expect("changes");
    assert_eq!(changes.revision, 2);
    let added: Vec<_> = changes.added.iter().map(|d| d.id.as_str()).collect();
    let changed: Vec<_> = changes.changed.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(added, vec!["m2"]);
    assert_eq!(changed, vec!["m1"]);

    let none = storage
        .changes_since(&room_messages(), changes.revision)
        .await
        .expect("no changes");
    assert!(none.is_empty());
    assert_eq!(none.revision, changes.revision);
}

#[tokio::test]
async fn commits_from_another_handle_are_visible_past_the_watermark() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("shared.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let reader = Storage::new(&database_url).await.expect("reader");
    let writer = Storage::new(&database_url).await.expect("writer");
    let (_, watermark) = reader.snapshot(&room_messages()).await.expect("snapshot");

    writer
        .apply_batch(&[WriteOperation::put_message(
            &RoomId::from("room1"),
            &sample_message("from-writer", 7),
        )])
        .await
        .expect("write");

    let changes = reader
        .changes_since(&room_messages(), watermark)
        .await
        .expect("changes");
    assert_eq!(changes.added.len(), 1);
    assert_eq!(changes.added[0].id, "from-writer");
    assert!(changes.revision > watermark);
}

#[test]
fn memory_urls_have_no_parent_directory() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/docs.db"),
        Some(PathBuf::from("./data/docs.db"))
    );
}
