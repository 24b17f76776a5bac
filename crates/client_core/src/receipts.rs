use std::collections::BTreeMap;

use shared::{
    domain::{MessageId, RoomId, SendStatus, UserId},
    protocol::WriteOperation,
};

/// Collects read marks for peer messages until the end of a reconciliation pass.
#[derive(Debug, Default)]
pub struct ReceiptBatcher {
    pending: Vec<MessageId>,
}

impl ReceiptBatcher {
    pub fn record(&mut self, message_id: MessageId) {
        if !self.pending.contains(&message_id) {
            self.pending.push(message_id);
        }
    }

    pub fn pending(&self) -> &[MessageId] {
        &self.pending
    }

    /// One `arrayUnion` update per message, or `None` when nothing is owed.
    pub fn drain(&mut self, room_id: &RoomId, reader: &UserId) -> Option<Vec<WriteOperation>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(
            self.pending
                .drain(..)
                .map(|message_id| WriteOperation::mark_read(room_id, &message_id, reader))
                .collect(),
        )
    }
}

/// Send-status values to push back to the store.
#[derive(Debug, Default)]
pub struct StatusCorrections {
    pending: BTreeMap<MessageId, SendStatus>,
}

impl StatusCorrections {
    pub fn record(&mut self, message_id: MessageId, status: SendStatus) {
        if status == SendStatus::Unknown {
            return;
        }
        self.pending.insert(message_id, status);
    }

    pub fn pending(&self) -> &BTreeMap<MessageId, SendStatus> {
        &self.pending
    }

    pub fn drain(&mut self, room_id: &RoomId) -> Option<Vec<WriteOperation>> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        Some(
            pending
                .into_iter()
                .map(|(message_id, status)| {
                    WriteOperation::set_send_status(room_id, &message_id, status)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
#[path = "tests/receipts_tests.rs"]
mod tests;
