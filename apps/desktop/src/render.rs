use chrono::{DateTime, FixedOffset, Utc};
use client_core::MessageRow;
use shared::domain::UserId;

fn status_label(row: &MessageRow, local_user: &UserId) -> Option<&'static str> {
    if row.is_sending {
        return Some("sending");
    }
    if row.needs_retry() {
        return Some("not sent");
    }
    let read_by_peer = row.message.readers.iter().any(|reader| reader != local_user);
    (row.message.is_authored_by(local_user) && read_by_peer).then_some("read")
}

pub fn day_header(key: &str) -> String {
    format!("---- {key} ----")
}

pub fn row_line(row: &MessageRow, local_user: &UserId, offset: &FixedOffset) -> String {
    let time = DateTime::<Utc>::from_timestamp(row.message.sent_at, 0)
        .unwrap_or_default()
        .with_timezone(offset)
        .format("%H:%M");
    let mut line = format!(
        "[{time}] {}: {}",
        row.message.author_name, row.message.body
    );
    if let Some(label) = status_label(row, local_user) {
        line.push_str(&format!("  ({label})"));
    }
    if row.needs_retry() {
        line.push_str(&format!("  /retry {}", row.id()));
    }
    line
}

#[cfg(test)]
mod tests {
    use shared::domain::{Message, MessageId, SendStatus};

    use super::*;

    fn row(author: &str, readers: &[&str]) -> MessageRow {
        let mut message = Message::new_normal(
            MessageId::from("m1"),
            UserId::from(author),
            author,
            "hello",
            1_704_103_200,
        );
        message.readers = readers.iter().map(|r| UserId::from(*r)).collect();
        message.send_status = SendStatus::ConfirmedSent;
        MessageRow::new(message)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).expect("utc")
    }

    #[test]
    fn own_message_read_by_peer_is_labelled() {
        let me = UserId::from("user1");
        assert_eq!(
            row_line(&row("user1", &["user2"]), &me, &utc()),
            "[10:00] user1: hello  (read)"
        );
        assert_eq!(
            row_line(&row("user2", &["user1"]), &me, &utc()),
            "[10:00] user2: hello"
        );
    }

    #[test]
    fn unsent_message_offers_retry() {
        let me = UserId::from("user1");
        let mut unsent = row("user1", &[]);
        unsent.message.send_status = SendStatus::ConfirmedUnsent;
        assert_eq!(
            row_line(&unsent, &me, &utc()),
            "[10:00] user1: hello  (not sent)  /retry m1"
        );

        unsent.is_sending = true;
        assert!(row_line(&unsent, &me, &utc()).ends_with("(sending)"));
    }
}
