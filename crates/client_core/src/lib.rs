use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use shared::{
    domain::{Message, MessageId, MessageKind, Room, RoomId, SendStatus},
    error::StoreError,
    protocol::{decode_room, ChangeSet, RawDocument, WriteOperation},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod buckets;
pub mod config;
mod durable_store;
pub mod emitter;
pub mod error;
pub mod message_store;
pub mod receipts;
pub mod reconciler;
pub mod send_coordinator;

pub use buckets::MessageRow;
pub use config::SyncConfig;
pub use durable_store::DurableRemoteStore;
pub use emitter::ViewUpdate;
pub use error::SyncError;
pub use reconciler::SyncPhase;

use crate::{
    emitter::ViewEmitter,
    reconciler::{Reconciler, RoomView},
    send_coordinator::{SendCoordinator, SendRequest},
};

/// Live change notifications for one room's message collection.
pub type ChangeStream = BoxStream<'static, ChangeSet>;

/// The remote document database a room session reads from and writes to.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RawDocument, StoreError>;
    /// Every message document of the room, in store order.
    async fn fetch_all_messages(&self, room_id: &RoomId) -> Result<Vec<RawDocument>, StoreError>;
    /// The first item repeats the current contents of the collection.
    async fn subscribe_messages(&self, room_id: &RoomId) -> Result<ChangeStream, StoreError>;
    /// Applies all operations or none.
    async fn atomic_write(&self, operations: Vec<WriteOperation>) -> Result<(), StoreError>;
}

pub struct MissingRemoteStore;

#[async_trait]
impl RemoteStore for MissingRemoteStore {
    async fn fetch_room(&self, _room_id: &RoomId) -> Result<RawDocument, StoreError> {
        Err(StoreError::unavailable("remote store is not configured"))
    }

    async fn fetch_all_messages(&self, _room_id: &RoomId) -> Result<Vec<RawDocument>, StoreError> {
        Err(StoreError::unavailable("remote store is not configured"))
    }

    async fn subscribe_messages(&self, _room_id: &RoomId) -> Result<ChangeStream, StoreError> {
        Err(StoreError::unavailable("remote store is not configured"))
    }

    async fn atomic_write(&self, _operations: Vec<WriteOperation>) -> Result<(), StoreError> {
        Err(StoreError::unavailable("remote store is not configured"))
    }
}

struct SessionState {
    view: Option<RoomView>,
    reconciler: Reconciler,
    sends: SendCoordinator,
    live_task: Option<JoinHandle<()>>,
    closed: bool,
}

/// One room's synchronization session.
///
/// Bulk fetch, live stream events and send completions all mutate the view
/// through the same lock, so the presentation layer only ever observes whole
/// reconciliation passes.
pub struct RoomSync {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    inner: Mutex<SessionState>,
    emitter: ViewEmitter,
}

impl RoomSync {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Arc<Self> {
        let emitter = ViewEmitter::new(config.event_capacity);
        let inner = SessionState {
            view: None,
            reconciler: Reconciler::new(config.local_user_id.clone()),
            sends: SendCoordinator::new(
                config.local_user_id.clone(),
                config.local_user_name.clone(),
            ),
            live_task: None,
            closed: false,
        };
        Arc::new(Self {
            store,
            config,
            inner: Mutex::new(inner),
            emitter,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewUpdate> {
        self.emitter.subscribe()
    }

    pub async fn initialize(self: &Arc<Self>, room_id: RoomId) -> Result<Room, SyncError> {
        {
            let guard = self.inner.lock().await;
            if guard.closed {
                return Err(SyncError::ShutDown);
            }
            if guard.view.is_some() || guard.reconciler.phase() != SyncPhase::Uninitialized {
                return Err(SyncError::AlreadyInitialized);
            }
        }

        // Subscribed before the bulk fetch so no commit falls between the two.
        // Documents seen by both are dropped by id.
        let mut stream = self
            .store
            .subscribe_messages(&room_id)
            .await
            .map_err(|err| SyncError::from_fetch(&room_id, err))?;
        let room_document = self
            .store
            .fetch_room(&room_id)
            .await
            .map_err(|err| SyncError::from_fetch(&room_id, err))?;
        let room = decode_room(&room_document).map_err(SyncError::InvalidRoom)?;
        let documents = self
            .store
            .fetch_all_messages(&room_id)
            .await
            .map_err(|err| SyncError::from_fetch(&room_id, err))?;

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Err(SyncError::ShutDown);
        }

        let mut view = RoomView::new(
            room,
            self.config.local_user_id.clone(),
            self.config.day_offset,
        );
        let receipt_writes = state.reconciler.bootstrap(&mut view, &documents)?;
        let room = view.room.clone();
        state.view = Some(view);

        if let Some(writes) = receipt_writes {
            self.spawn_best_effort("read receipts", writes);
        }

        // Weak, so dropping the session ends the listener.
        let session = Arc::downgrade(self);
        let live_room_id = room_id.clone();
        state.live_task = Some(tokio::spawn(async move {
            while let Some(change) = stream.next().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_change_set(change).await;
            }
            debug!(room_id = %live_room_id, "sync: live stream ended");
        }));

        info!(
            room_id = %room_id,
            messages = documents.len(),
            "sync: room session initialized"
        );
        Ok(room)
    }

    async fn handle_change_set(&self, change: ChangeSet) {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let Some(view) = state.view.as_mut() else {
            return;
        };

        let pass = state.reconciler.reconcile(view, change);
        if let Some(writes) = pass.receipt_writes {
            self.spawn_best_effort("read receipts", writes);
        }
        if let Some(writes) = pass.status_writes {
            self.spawn_best_effort("status corrections", writes);
        }
        self.emitter.emit(pass.update);
    }

    /// Shows the message immediately and writes it in the background.
    pub async fn send_text(self: &Arc<Self>, text: &str) -> Result<MessageId, SyncError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Err(SyncError::ShutDown);
        }
        let view = state.view.as_mut().ok_or(SyncError::NotInitialized)?;

        let SendRequest {
            message_id,
            row,
            writes,
        } = state.sends.begin(view, text, Utc::now().timestamp());
        self.emitter.emit(ViewUpdate::new_row(row));

        let wait = self.spawn_send_wait(message_id.clone(), writes);
        state.sends.track(&message_id, wait);
        Ok(message_id)
    }

    /// Re-issues the write for a message whose send was not confirmed.
    pub async fn retry_send(self: &Arc<Self>, message_id: &MessageId) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Err(SyncError::ShutDown);
        }
        let view = state.view.as_mut().ok_or(SyncError::NotInitialized)?;

        let SendRequest {
            message_id,
            row,
            writes,
        } = state.sends.begin_retry(view, message_id)?;
        self.emitter.emit(ViewUpdate::changed_row(row));

        let wait = self.spawn_send_wait(message_id.clone(), writes);
        state.sends.track(&message_id, wait);
        Ok(())
    }

    /// Writes a bookkeeping message that is never displayed.
    pub async fn send_system_message(&self, text: &str) -> Result<MessageId, SyncError> {
        let (room_id, message) = {
            let guard = self.inner.lock().await;
            if guard.closed {
                return Err(SyncError::ShutDown);
            }
            let view = guard.view.as_ref().ok_or(SyncError::NotInitialized)?;
            let message =
                guard
                    .sends
                    .compose(MessageKind::System, text, Utc::now().timestamp());
            (view.room.id.clone(), message)
        };

        let writes = vec![WriteOperation::put_message(&room_id, &message)];
        match tokio::time::timeout(self.config.send_timeout, self.store.atomic_write(writes)).await
        {
            Ok(Ok(())) => {
                debug!(message_id = %message.id, "sync: system message written");
                Ok(message.id)
            }
            Ok(Err(err)) => Err(SyncError::WriteFailed(err)),
            Err(_) => Err(SyncError::WriteTimeout),
        }
    }

    fn spawn_send_wait(
        self: &Arc<Self>,
        message_id: MessageId,
        writes: Vec<WriteOperation>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(
                session.config.send_timeout,
                session.store.atomic_write(writes),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(SyncError::WriteFailed(err)),
                Err(_) => Err(SyncError::WriteTimeout),
            };
            session.finish_send(message_id, outcome).await;
        })
    }

    async fn finish_send(&self, message_id: MessageId, outcome: Result<(), SyncError>) {
        let status = match &outcome {
            Ok(()) => SendStatus::ConfirmedSent,
            Err(err) => {
                warn!(message_id = %message_id, "send: message not confirmed: {err}");
                SendStatus::ConfirmedUnsent
            }
        };

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        let Some(view) = state.view.as_mut() else {
            return;
        };
        let Some(resolution) = state.sends.resolve(view, &message_id, status) else {
            debug!(message_id = %message_id, "send: completion for a cancelled send dropped");
            return;
        };

        info!(message_id = %message_id, status = ?status, "send: resolved");
        self.emitter.emit(ViewUpdate::changed_row(resolution.row));
        self.spawn_best_effort("send status", vec![resolution.status_write]);
    }

    /// Stops the live stream and abandons outstanding sends.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return;
        }
        guard.closed = true;
        if let Some(task) = guard.live_task.take() {
            task.abort();
        }
        let cancelled = guard.sends.cancel_all();
        info!(cancelled_sends = cancelled, "sync: room session shut down");
    }

    pub async fn phase(&self) -> SyncPhase {
        self.inner.lock().await.reconciler.phase()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn room(&self) -> Option<Room> {
        let guard = self.inner.lock().await;
        guard.view.as_ref().map(|view| view.room.clone())
    }

    pub async fn ordered_keys(&self) -> Vec<String> {
        let guard = self.inner.lock().await;
        guard
            .view
            .as_ref()
            .map(|view| view.buckets.ordered_keys())
            .unwrap_or_default()
    }

    pub async fn rows(&self, key: &str) -> Vec<MessageRow> {
        let guard = self.inner.lock().await;
        guard
            .view
            .as_ref()
            .map(|view| view.buckets.rows(key).to_vec())
            .unwrap_or_default()
    }

    pub async fn locate(&self, message_id: &MessageId) -> Option<(String, usize)> {
        let guard = self.inner.lock().await;
        guard.view.as_ref()?.buckets.locate(message_id)
    }

    pub async fn message(&self, message_id: &MessageId) -> Option<Message> {
        let guard = self.inner.lock().await;
        guard.view.as_ref()?.messages.find(message_id).cloned()
    }

    /// Every known message in arrival order, hidden ones included.
    pub async fn all_messages(&self) -> Vec<Message> {
        let guard = self.inner.lock().await;
        guard
            .view
            .as_ref()
            .map(|view| view.messages.all().to_vec())
            .unwrap_or_default()
    }

    pub async fn pending_sends(&self) -> usize {
        self.inner.lock().await.sends.pending_count()
    }

    fn spawn_best_effort(&self, label: &'static str, writes: Vec<WriteOperation>) {
        let store = Arc::clone(&self.store);
        let timeout = self.config.send_timeout;
        tokio::spawn(async move {
            let count = writes.len();
            match tokio::time::timeout(timeout, store.atomic_write(writes)).await {
                Ok(Ok(())) => debug!(count, "sync: {label} flushed"),
                Ok(Err(err)) => warn!(count, "sync: {label} write failed: {err}"),
                Err(_) => warn!(count, "sync: {label} write timed out"),
            }
        });
    }
}

impl Drop for RoomSync {
    fn drop(&mut self) {
        let state = self.inner.get_mut();
        if let Some(task) = state.live_task.take() {
            task.abort();
        }
        state.sends.cancel_all();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
