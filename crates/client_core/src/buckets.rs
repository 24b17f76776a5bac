use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use shared::domain::{Message, MessageId, SendStatus, Timestamp, UserId};

pub const DAY_KEY_FORMAT: &str = "%Y/%m/%d";

/// A message as the presentation layer renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub message: Message,
    /// True while an optimistic write for this message is in flight.
    pub is_sending: bool,
}

impl MessageRow {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            is_sending: false,
        }
    }

    pub fn sending(message: Message) -> Self {
        Self {
            message,
            is_sending: true,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    /// Whether the row should offer tap-to-retry.
    pub fn needs_retry(&self) -> bool {
        !self.is_sending && self.message.send_status == SendStatus::ConfirmedUnsent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Inserted { key: String, row: usize },
    Replaced { key: String, row: usize },
    Hidden,
}

pub fn day_key(sent_at: Timestamp, offset: &FixedOffset) -> String {
    DateTime::<Utc>::from_timestamp(sent_at, 0)
        .unwrap_or_default()
        .with_timezone(offset)
        .format(DAY_KEY_FORMAT)
        .to_string()
}

/// Messages partitioned by calendar day, oldest day and oldest message first.
#[derive(Debug)]
pub struct DailyBucketIndex {
    local_user: UserId,
    offset: FixedOffset,
    buckets: BTreeMap<String, Vec<MessageRow>>,
}

impl DailyBucketIndex {
    pub fn new(local_user: UserId, offset: FixedOffset) -> Self {
        Self {
            local_user,
            offset,
            buckets: BTreeMap::new(),
        }
    }

    pub fn key_for(&self, message: &Message) -> String {
        day_key(message.sent_at, &self.offset)
    }

    pub fn place(&mut self, row: MessageRow) -> Placement {
        if row.message.is_hidden_for(&self.local_user) {
            return Placement::Hidden;
        }

        let key = self.key_for(&row.message);
        let bucket = self.buckets.entry(key.clone()).or_default();
        if let Some(index) = bucket.iter().position(|r| r.id() == row.id()) {
            bucket[index] = row;
            return Placement::Replaced { key, row: index };
        }

        let id = row.id().clone();
        bucket.push(row);
        // Stable: equal timestamps keep arrival order.
        bucket.sort_by_key(|r| r.message.sent_at);
        let index = bucket.iter().position(|r| r.id() == &id).unwrap_or(0);
        Placement::Inserted { key, row: index }
    }

    /// Swaps an existing row in place without re-sorting. Returns where it lives.
    pub fn replace(&mut self, row: MessageRow) -> Option<(String, usize)> {
        let (key, index) = self.locate(row.id())?;
        let bucket = self.buckets.get_mut(&key)?;
        bucket[index] = row;
        Some((key, index))
    }

    pub fn locate(&self, id: &MessageId) -> Option<(String, usize)> {
        self.buckets.iter().find_map(|(key, rows)| {
            rows.iter()
                .position(|r| r.id() == id)
                .map(|index| (key.clone(), index))
        })
    }

    pub fn row(&self, id: &MessageId) -> Option<&MessageRow> {
        let (key, index) = self.locate(id)?;
        self.buckets.get(&key).and_then(|rows| rows.get(index))
    }

    pub fn ordered_keys(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub fn rows(&self, key: &str) -> &[MessageRow] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/buckets_tests.rs"]
mod tests;
