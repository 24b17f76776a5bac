use tokio::sync::broadcast;
use tracing::debug;

use crate::buckets::MessageRow;

/// Rows produced by one reconciliation pass. New rows are applied before changed rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    pub new_rows: Vec<MessageRow>,
    pub changed_rows: Vec<MessageRow>,
}

impl ViewUpdate {
    pub fn new_row(row: MessageRow) -> Self {
        Self {
            new_rows: vec![row],
            changed_rows: Vec::new(),
        }
    }

    pub fn changed_row(row: MessageRow) -> Self {
        Self {
            new_rows: Vec::new(),
            changed_rows: vec![row],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_rows.is_empty() && self.changed_rows.is_empty()
    }
}

pub struct ViewEmitter {
    tx: broadcast::Sender<ViewUpdate>,
}

impl ViewEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.tx.subscribe()
    }

    /// Returns false when the update was empty and therefore not sent.
    pub fn emit(&self, update: ViewUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        debug!(
            new = update.new_rows.len(),
            changed = update.changed_rows.len(),
            "view: emitting update"
        );
        let _ = self.tx.send(update);
        true
    }
}
