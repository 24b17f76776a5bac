use super::*;
use chrono::FixedOffset;
use shared::{
    domain::{Room, RoomId},
    protocol::{Collection, WriteOperation},
};

const NOW: i64 = 1_704_103_200;

fn view() -> RoomView {
    RoomView::new(
        Room {
            id: RoomId::from("room1"),
            participant_ids: vec![UserId::from("user1"), UserId::from("user2")],
            participant_names: vec!["Taro".into(), "Hanako".into()],
            icon_url: None,
            last_message: String::new(),
            last_message_user_name: String::new(),
            created_at: None,
            updated_at: None,
        },
        UserId::from("user1"),
        FixedOffset::east_opt(0).expect("utc"),
    )
}

fn coordinator() -> SendCoordinator {
    SendCoordinator::new(UserId::from("user1"), "Taro")
}

#[test]
fn begin_places_sending_row_and_builds_dual_write() {
    let mut view = view();
    let mut coordinator = coordinator();
    let request = coordinator.begin(&mut view, "hi", NOW);

    assert!(request.row.is_sending);
    assert_eq!(request.row.message.body, "hi");
    assert_eq!(request.row.message.kind, MessageKind::Normal);
    assert_eq!(request.row.message.send_status, SendStatus::Unknown);
    assert!(view.messages.contains(&request.message_id));
    assert!(view
        .buckets
        .row(&request.message_id)
        .expect("row")
        .is_sending);
    assert!(coordinator.is_pending(&request.message_id));

    assert_eq!(view.room.last_message, "hi");
    assert_eq!(view.room.last_message_user_name, "Taro");
    assert_eq!(view.room.updated_at, Some(NOW));

    assert_eq!(request.writes.len(), 2);
    assert!(matches!(
        &request.writes[0],
        WriteOperation::Put { collection, document_id, .. }
            if collection == &Collection::messages(&RoomId::from("room1"))
                && document_id == request.message_id.as_str()
    ));
    assert!(matches!(
        &request.writes[1],
        WriteOperation::Update { collection: Collection::Rooms, document_id, .. }
            if document_id == "room1"
    ));
}

#[test]
fn resolve_clears_sending_and_sets_status() {
    let mut view = view();
    let mut coordinator = coordinator();
    let request = coordinator.begin(&mut view, "hi", NOW);

    let resolution = coordinator
        .resolve(&mut view, &request.message_id, SendStatus::ConfirmedSent)
        .expect("resolution");

    assert!(!resolution.row.is_sending);
    assert_eq!(resolution.row.message.send_status, SendStatus::ConfirmedSent);
    assert_eq!(resolution.status_write.document_id(), request.message_id.as_str());
    assert!(!coordinator.is_pending(&request.message_id));
    let stored = view.buckets.row(&request.message_id).expect("row");
    assert!(!stored.is_sending);
    assert_eq!(
        view.messages.find(&request.message_id).map(|m| m.send_status),
        Some(SendStatus::ConfirmedSent)
    );

    // A second resolution for the same send is a no-op.
    assert!(coordinator
        .resolve(&mut view, &request.message_id, SendStatus::ConfirmedUnsent)
        .is_none());
}

#[test]
fn retry_only_applies_to_unsent_messages() {
    let mut view = view();
    let mut coordinator = coordinator();
    let request = coordinator.begin(&mut view, "hi", NOW);

    assert!(matches!(
        coordinator.begin_retry(&mut view, &request.message_id),
        Err(SyncError::NotRetryable(_))
    ));
    assert!(matches!(
        coordinator.begin_retry(&mut view, &MessageId::from("missing")),
        Err(SyncError::UnknownMessage(_))
    ));

    let resolution = coordinator
        .resolve(&mut view, &request.message_id, SendStatus::ConfirmedUnsent)
        .expect("resolution");
    assert!(resolution.row.needs_retry());

    let retry = coordinator
        .begin_retry(&mut view, &request.message_id)
        .expect("retry");
    assert!(retry.row.is_sending);
    assert_eq!(retry.row.message.send_status, SendStatus::Unknown);
    assert_eq!(retry.writes.len(), 2);
    assert_eq!(view.buckets.len(), 1);
}

#[tokio::test]
async fn cancel_all_aborts_waits_and_forgets_sends() {
    let mut view = view();
    let mut coordinator = coordinator();
    let request = coordinator.begin(&mut view, "hi", NOW);

    let wait = tokio::spawn(std::future::pending::<()>());
    coordinator.track(&request.message_id, wait);
    assert_eq!(coordinator.pending_count(), 1);

    assert_eq!(coordinator.cancel_all(), 1);
    assert_eq!(coordinator.pending_count(), 0);
    assert!(coordinator
        .resolve(&mut view, &request.message_id, SendStatus::ConfirmedSent)
        .is_none());
    assert!(view
        .buckets
        .row(&request.message_id)
        .expect("row")
        .is_sending);
}
