use std::collections::HashMap;

use shared::{
    domain::{Message, MessageId, MessageKind, SendStatus, Timestamp, UserId},
    protocol::WriteOperation,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{buckets::MessageRow, error::SyncError, reconciler::RoomView};

/// A provisional message whose dual write is about to be issued.
#[derive(Debug)]
pub struct SendRequest {
    pub message_id: MessageId,
    pub row: MessageRow,
    pub writes: Vec<WriteOperation>,
}

/// Final state of a send, to be emitted and pushed back to the store.
#[derive(Debug)]
pub struct SendResolution {
    pub row: MessageRow,
    pub status_write: WriteOperation,
}

#[derive(Default)]
struct PendingSend {
    wait: Option<JoinHandle<()>>,
}

pub struct SendCoordinator {
    local_user: UserId,
    local_name: String,
    pending: HashMap<MessageId, PendingSend>,
}

impl SendCoordinator {
    pub fn new(local_user: UserId, local_name: impl Into<String>) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            pending: HashMap::new(),
        }
    }

    pub fn compose(&self, kind: MessageKind, text: &str, sent_at: Timestamp) -> Message {
        let mut message = Message::new_normal(
            MessageId::generate(),
            self.local_user.clone(),
            self.local_name.clone(),
            text,
            sent_at,
        );
        message.kind = kind;
        message
    }

    /// Applies the optimistic message locally and returns the writes to issue.
    pub fn begin(&mut self, view: &mut RoomView, text: &str, sent_at: Timestamp) -> SendRequest {
        let message = self.compose(MessageKind::Normal, text, sent_at);
        let message_id = message.id.clone();

        view.messages.upsert(message.clone());
        view.room.record_last_message(&message);
        let row = MessageRow::sending(message.clone());
        view.buckets.place(row.clone());
        self.pending.insert(message_id.clone(), PendingSend::default());

        debug!(message_id = %message_id, "send: optimistic message placed");
        SendRequest {
            message_id,
            row,
            writes: vec![
                WriteOperation::put_message(&view.room.id, &message),
                WriteOperation::update_room_summary(&view.room),
            ],
        }
    }

    pub fn begin_retry(
        &mut self,
        view: &mut RoomView,
        message_id: &MessageId,
    ) -> Result<SendRequest, SyncError> {
        let mut message = view
            .messages
            .find(message_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownMessage(message_id.clone()))?;
        if self.pending.contains_key(message_id)
            || message.send_status != SendStatus::ConfirmedUnsent
        {
            return Err(SyncError::NotRetryable(message_id.clone()));
        }

        message.send_status = SendStatus::Unknown;
        view.messages.upsert(message.clone());
        let row = MessageRow::sending(message.clone());
        if view.buckets.replace(row.clone()).is_none() {
            view.buckets.place(row.clone());
        }
        self.pending
            .insert(message_id.clone(), PendingSend::default());

        info!(message_id = %message_id, "send: retrying unsent message");
        Ok(SendRequest {
            message_id: message_id.clone(),
            row,
            writes: vec![
                WriteOperation::put_message(&view.room.id, &message),
                WriteOperation::update_room_summary(&view.room),
            ],
        })
    }

    pub fn track(&mut self, message_id: &MessageId, wait: JoinHandle<()>) {
        match self.pending.get_mut(message_id) {
            Some(pending) => pending.wait = Some(wait),
            None => wait.abort(),
        }
    }

    pub fn is_pending(&self, message_id: &MessageId) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Settles a send. `None` when the send was cancelled or is unknown.
    pub fn resolve(
        &mut self,
        view: &mut RoomView,
        message_id: &MessageId,
        status: SendStatus,
    ) -> Option<SendResolution> {
        self.pending.remove(message_id)?;
        let mut message = view.messages.find(message_id).cloned()?;
        message.send_status = status;
        view.messages.upsert(message.clone());

        let row = MessageRow::new(message);
        view.buckets.replace(row.clone());
        Some(SendResolution {
            row,
            status_write: WriteOperation::set_send_status(&view.room.id, message_id, status),
        })
    }

    /// Aborts every outstanding wait. Affected messages stay in the sending state.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        for (_, pending) in self.pending.drain() {
            if let Some(wait) = pending.wait {
                wait.abort();
            }
        }
        cancelled
    }
}

#[cfg(test)]
#[path = "tests/send_coordinator_tests.rs"]
mod tests;
