use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use shared::{
    domain::RoomId,
    error::StoreError,
    protocol::{ChangeSet, Collection, RawDocument, WriteOperation},
};
use storage::{CommittedChange, Storage};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{self, Interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{ChangeStream, RemoteStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `RemoteStore` backed by the local SQLite document store.
///
/// Live changes are read back by revision, so commits made by other processes
/// sharing the database file are delivered too. Commits through the same
/// `Storage` handle wake the reader immediately; others are seen on the next poll.
#[derive(Clone)]
pub struct DurableRemoteStore {
    storage: Storage,
    poll_interval: Duration,
}

impl DurableRemoteStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn unavailable(err: anyhow::Error) -> StoreError {
    StoreError::unavailable(format!("{err:#}"))
}

struct FeedCursor {
    storage: Storage,
    collection: Collection,
    revision: i64,
    wakeups: Option<broadcast::Receiver<CommittedChange>>,
    ticks: Interval,
}

impl FeedCursor {
    async fn wait(&mut self) {
        let Some(wakeups) = self.wakeups.as_mut() else {
            self.ticks.tick().await;
            return;
        };
        tokio::select! {
            _ = self.ticks.tick() => {}
            received = wakeups.recv() => match received {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => self.wakeups = None,
            },
        }
    }

    async fn next_change(&mut self) -> ChangeSet {
        loop {
            self.wait().await;
            match self
                .storage
                .changes_since(&self.collection, self.revision)
                .await
            {
                Ok(changes) if changes.is_empty() => {}
                Ok(changes) => {
                    debug!(
                        collection = %self.collection.path(),
                        revision = changes.revision,
                        added = changes.added.len(),
                        changed = changes.changed.len(),
                        "durable store: delivering changes"
                    );
                    self.revision = changes.revision;
                    return ChangeSet {
                        added: changes.added,
                        changed: changes.changed,
                        from_pending_local_write: false,
                    };
                }
                Err(err) => {
                    warn!(collection = %self.collection.path(), "durable store: change poll failed: {err:#}");
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for DurableRemoteStore {
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RawDocument, StoreError> {
        self.storage
            .get_document(&Collection::Rooms, room_id.as_str())
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::not_found(format!("room {room_id} not found")))
    }

    async fn fetch_all_messages(&self, room_id: &RoomId) -> Result<Vec<RawDocument>, StoreError> {
        self.storage
            .list_documents(&Collection::messages(room_id))
            .await
            .map_err(unavailable)
    }

    async fn subscribe_messages(&self, room_id: &RoomId) -> Result<ChangeStream, StoreError> {
        let collection = Collection::messages(room_id);
        let wakeups = self.storage.subscribe_changes();
        let (snapshot, revision) = self
            .storage
            .snapshot(&collection)
            .await
            .map_err(unavailable)?;

        let mut ticks = time::interval(self.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cursor = FeedCursor {
            storage: self.storage.clone(),
            collection,
            revision,
            wakeups: Some(wakeups),
            ticks,
        };

        let live = stream::unfold(cursor, |mut cursor| async move {
            let change = cursor.next_change().await;
            Some((change, cursor))
        });

        Ok(stream::once(async move { ChangeSet::added(snapshot) })
            .chain(live)
            .boxed())
    }

    async fn atomic_write(&self, operations: Vec<WriteOperation>) -> Result<(), StoreError> {
        self.storage
            .apply_batch(&operations)
            .await
            .map_err(unavailable)
    }
}
