use shared::{
    domain::{MessageId, RoomId},
    error::{DecodeError, StoreError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),
    #[error("failed to load room: {0}")]
    Fetch(#[source] StoreError),
    #[error("room document is invalid: {0}")]
    InvalidRoom(#[source] DecodeError),
    #[error("room session is not initialized")]
    NotInitialized,
    #[error("room session is already initialized")]
    AlreadyInitialized,
    #[error("room session has been shut down")]
    ShutDown,
    #[error("message {0} is not known to this session")]
    UnknownMessage(MessageId),
    #[error("message {0} is not awaiting a retry")]
    NotRetryable(MessageId),
    #[error("write did not complete within the send timeout")]
    WriteTimeout,
    #[error("write failed: {0}")]
    WriteFailed(#[source] StoreError),
}

impl SyncError {
    pub(crate) fn from_fetch(room_id: &RoomId, err: StoreError) -> Self {
        if err.is_not_found() {
            SyncError::RoomNotFound(room_id.clone())
        } else {
            SyncError::Fetch(err)
        }
    }
}
