use super::*;
use shared::domain::MessageKind;

const DAY1_10_00: i64 = 1_704_103_200; // 2024-01-01 10:00:00 UTC
const MINUTE: i64 = 60;
const DAY: i64 = 86_400;

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).expect("utc offset")
}

fn index() -> DailyBucketIndex {
    DailyBucketIndex::new(UserId::from("user1"), utc())
}

fn row(id: &str, author: &str, sent_at: i64) -> MessageRow {
    MessageRow::new(Message::new_normal(
        MessageId::from(id),
        UserId::from(author),
        author,
        format!("body {id}"),
        sent_at,
    ))
}

fn ids(index: &DailyBucketIndex, key: &str) -> Vec<String> {
    index
        .rows(key)
        .iter()
        .map(|r| r.id().0.clone())
        .collect()
}

#[test]
fn day_key_uses_configured_offset() {
    assert_eq!(day_key(DAY1_10_00, &utc()), "2024/01/01");
    let tokyo = FixedOffset::east_opt(9 * 3600).expect("jst");
    // 2024-01-01 20:00 UTC is already the next day in Tokyo.
    assert_eq!(day_key(DAY1_10_00 + 10 * 3600, &tokyo), "2024/01/02");
}

#[test]
fn inserts_keep_bucket_sorted_by_timestamp() {
    let mut index = index();
    index.place(row("a", "user2", DAY1_10_00));
    index.place(row("b", "user2", DAY1_10_00 + 5 * MINUTE));
    let placement = index.place(row("c", "user2", DAY1_10_00 + 3 * MINUTE));

    assert_eq!(
        placement,
        Placement::Inserted {
            key: "2024/01/01".into(),
            row: 1
        }
    );
    assert_eq!(ids(&index, "2024/01/01"), vec!["a", "c", "b"]);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut index = index();
    for id in ["first", "second", "third"] {
        index.place(row(id, "user2", DAY1_10_00));
    }
    index.place(row("earlier", "user2", DAY1_10_00 - MINUTE));
    assert_eq!(
        ids(&index, "2024/01/01"),
        vec!["earlier", "first", "second", "third"]
    );
}

#[test]
fn placing_existing_id_replaces_in_position() {
    let mut index = index();
    index.place(row("a", "user2", DAY1_10_00));
    index.place(row("b", "user2", DAY1_10_00 + MINUTE));

    let mut updated = row("a", "user2", DAY1_10_00);
    updated.is_sending = true;
    let placement = index.place(updated);

    assert_eq!(
        placement,
        Placement::Replaced {
            key: "2024/01/01".into(),
            row: 0
        }
    );
    assert_eq!(index.len(), 2);
    assert!(index.rows("2024/01/01")[0].is_sending);
}

#[test]
fn self_authored_system_messages_are_never_placed() {
    let mut index = index();
    let mut system = row("sys", "user1", DAY1_10_00);
    system.message.kind = MessageKind::System;
    assert_eq!(index.place(system), Placement::Hidden);
    assert!(index.is_empty());

    let mut peer_system = row("peer-sys", "user2", DAY1_10_00);
    peer_system.message.kind = MessageKind::System;
    assert!(matches!(index.place(peer_system), Placement::Inserted { .. }));
}

#[test]
fn keys_are_ascending_and_locate_scans_in_key_order() {
    let mut index = index();
    index.place(row("late", "user2", DAY1_10_00 + 2 * DAY));
    index.place(row("early", "user2", DAY1_10_00));
    index.place(row("mid", "user2", DAY1_10_00 + DAY));

    assert_eq!(
        index.ordered_keys(),
        vec!["2024/01/01", "2024/01/02", "2024/01/03"]
    );
    assert_eq!(
        index.locate(&MessageId::from("mid")),
        Some(("2024/01/02".to_string(), 0))
    );
    assert_eq!(index.locate(&MessageId::from("missing")), None);
}

#[test]
fn replace_requires_existing_row() {
    let mut index = index();
    assert_eq!(index.replace(row("ghost", "user2", DAY1_10_00)), None);

    index.place(row("a", "user2", DAY1_10_00));
    index.place(row("b", "user2", DAY1_10_00 + MINUTE));
    let mut read = row("b", "user2", DAY1_10_00 + MINUTE);
    read.message.readers.insert(UserId::from("user1"));

    assert_eq!(index.replace(read), Some(("2024/01/01".to_string(), 1)));
    assert!(index
        .row(&MessageId::from("b"))
        .expect("row")
        .message
        .is_read_by(&UserId::from("user1")));
}
