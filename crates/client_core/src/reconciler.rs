use chrono::FixedOffset;
use shared::{
    domain::{Message, Room, SendStatus, UserId},
    protocol::{decode_message, ChangeSet, RawDocument, WriteOperation},
};
use tracing::{debug, warn};

use crate::{
    buckets::{DailyBucketIndex, MessageRow},
    emitter::ViewUpdate,
    error::SyncError,
    message_store::CanonicalMessageStore,
    receipts::{ReceiptBatcher, StatusCorrections},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Uninitialized,
    /// Bulk fetch applied; the next live event repeats it and is dropped.
    Bootstrapped,
    Live,
}

/// Everything the presentation layer reads, owned by one session.
#[derive(Debug)]
pub struct RoomView {
    pub room: Room,
    pub messages: CanonicalMessageStore,
    pub buckets: DailyBucketIndex,
}

impl RoomView {
    pub fn new(room: Room, local_user: UserId, day_offset: FixedOffset) -> Self {
        Self {
            room,
            messages: CanonicalMessageStore::new(),
            buckets: DailyBucketIndex::new(local_user, day_offset),
        }
    }
}

/// Output of one live event.
#[derive(Debug, Default)]
pub struct ReconcilePass {
    pub update: ViewUpdate,
    pub receipt_writes: Option<Vec<WriteOperation>>,
    pub status_writes: Option<Vec<WriteOperation>>,
}

pub struct Reconciler {
    local_user: UserId,
    phase: SyncPhase,
    receipts: ReceiptBatcher,
    corrections: StatusCorrections,
}

impl Reconciler {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            phase: SyncPhase::Uninitialized,
            receipts: ReceiptBatcher::default(),
            corrections: StatusCorrections::default(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Applies the bulk fetch. Returns the read marks owed for unread peer messages.
    pub fn bootstrap(
        &mut self,
        view: &mut RoomView,
        documents: &[RawDocument],
    ) -> Result<Option<Vec<WriteOperation>>, SyncError> {
        if self.phase != SyncPhase::Uninitialized {
            return Err(SyncError::AlreadyInitialized);
        }

        let mut skipped = 0usize;
        for document in documents {
            let Some(mut message) = self.decode(document) else {
                skipped += 1;
                continue;
            };
            if view.messages.contains(&message.id) {
                continue;
            }
            if message.is_hidden_for(&self.local_user) {
                view.messages.upsert(message);
                continue;
            }
            self.mark_read_on_arrival(&mut message);
            view.messages.upsert(message.clone());
            view.buckets.place(MessageRow::new(message));
        }

        self.phase = SyncPhase::Bootstrapped;
        debug!(
            room_id = %view.room.id,
            messages = view.messages.len(),
            skipped,
            "reconciler: bootstrapped from bulk fetch"
        );
        Ok(self.receipts.drain(&view.room.id, &self.local_user))
    }

    pub fn reconcile(&mut self, view: &mut RoomView, change: ChangeSet) -> ReconcilePass {
        match self.phase {
            SyncPhase::Uninitialized => {
                warn!("reconciler: dropping live event received before bootstrap");
                return ReconcilePass::default();
            }
            SyncPhase::Bootstrapped => {
                self.phase = SyncPhase::Live;
                debug!(
                    room_id = %view.room.id,
                    added = change.added.len(),
                    "reconciler: discarding first live snapshot"
                );
                return ReconcilePass::default();
            }
            SyncPhase::Live => {}
        }

        let mut update = ViewUpdate::default();

        for document in &change.added {
            let Some(mut message) = self.decode(document) else {
                continue;
            };
            if message.send_status == SendStatus::Unknown {
                let pending = document.has_pending_writes || change.from_pending_local_write;
                self.resolve_unknown_status(&mut message, pending);
            }
            if view.messages.contains(&message.id) {
                continue;
            }
            if message.is_hidden_for(&self.local_user) {
                view.messages.upsert(message);
                continue;
            }
            self.mark_read_on_arrival(&mut message);
            view.room.record_last_message(&message);
            view.messages.upsert(message.clone());
            let row = MessageRow::new(message);
            view.buckets.place(row.clone());
            update.new_rows.push(row);
        }

        for document in &change.changed {
            let Some(mut message) = self.decode(document) else {
                continue;
            };
            if message.is_hidden_for(&self.local_user) {
                view.messages.upsert(message);
                continue;
            }
            let Some(prior_row) = view.buckets.row(&message.id).cloned() else {
                debug!(message_id = %message.id, "reconciler: change for unplaced message ignored");
                continue;
            };

            self.carry_local_knowledge(&prior_row.message, &mut message, document, &change);
            if !view.messages.upsert(message.clone()).changed {
                continue;
            }
            let row = MessageRow {
                message,
                is_sending: prior_row.is_sending,
            };
            view.buckets.replace(row.clone());
            update.changed_rows.push(row);
        }

        ReconcilePass {
            update,
            receipt_writes: self.receipts.drain(&view.room.id, &self.local_user),
            status_writes: self.corrections.drain(&view.room.id),
        }
    }

    fn decode(&self, document: &RawDocument) -> Option<Message> {
        match decode_message(document) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(document_id = %err.document_id(), "reconciler: skipping undecodable document: {err}");
                None
            }
        }
    }

    fn resolve_unknown_status(&mut self, message: &mut Message, pending_local_write: bool) {
        if pending_local_write {
            // Not durable yet; a later event for this document settles it.
            debug!(message_id = %message.id, "reconciler: status deferred for pending local write");
            return;
        }
        message.send_status = SendStatus::ConfirmedSent;
        self.corrections
            .record(message.id.clone(), SendStatus::ConfirmedSent);
    }

    fn mark_read_on_arrival(&mut self, message: &mut Message) {
        if message.is_authored_by(&self.local_user) || message.is_read_by(&self.local_user) {
            return;
        }
        message.readers.insert(self.local_user.clone());
        self.receipts.record(message.id.clone());
    }

    /// Keeps state the remote may not reflect yet: our own read mark and a settled send status.
    fn carry_local_knowledge(
        &mut self,
        prior: &Message,
        incoming: &mut Message,
        document: &RawDocument,
        change: &ChangeSet,
    ) {
        if prior.is_read_by(&self.local_user) {
            incoming.readers.insert(self.local_user.clone());
        }
        if incoming.send_status == SendStatus::Unknown {
            if prior.send_status != SendStatus::Unknown {
                incoming.send_status = prior.send_status;
            } else {
                let pending = document.has_pending_writes || change.from_pending_local_write;
                self.resolve_unknown_status(incoming, pending);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
