use super::*;
use shared::protocol::{Collection, FieldUpdate};

#[test]
fn drain_is_none_when_nothing_recorded() {
    let mut batcher = ReceiptBatcher::default();
    assert!(batcher
        .drain(&RoomId::from("room1"), &UserId::from("user1"))
        .is_none());
}

#[test]
fn drains_one_union_update_per_message_and_clears() {
    let mut batcher = ReceiptBatcher::default();
    batcher.record(MessageId::from("a"));
    batcher.record(MessageId::from("b"));
    batcher.record(MessageId::from("a"));
    assert_eq!(batcher.pending().len(), 2);

    let ops = batcher
        .drain(&RoomId::from("room1"), &UserId::from("user1"))
        .expect("ops");
    assert_eq!(ops.len(), 2);
    for op in &ops {
        let WriteOperation::Update {
            collection, fields, ..
        } = op
        else {
            panic!("expected update");
        };
        assert_eq!(collection, &Collection::messages(&RoomId::from("room1")));
        assert_eq!(
            fields["isReadUserId"],
            FieldUpdate::ArrayUnion {
                values: vec![serde_json::json!("user1")]
            }
        );
    }
    assert!(batcher.pending().is_empty());
}

#[test]
fn status_corrections_keep_latest_value_and_ignore_unknown() {
    let mut corrections = StatusCorrections::default();
    corrections.record(MessageId::from("a"), SendStatus::ConfirmedUnsent);
    corrections.record(MessageId::from("a"), SendStatus::ConfirmedSent);
    corrections.record(MessageId::from("b"), SendStatus::Unknown);

    assert_eq!(corrections.pending().len(), 1);
    let ops = corrections.drain(&RoomId::from("room1")).expect("ops");
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].document_id(), "a");
    assert!(corrections.drain(&RoomId::from("room1")).is_none());
}
