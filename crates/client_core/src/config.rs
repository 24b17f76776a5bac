use std::time::Duration;

use chrono::{FixedOffset, Local, Offset};
use shared::domain::UserId;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub local_user_id: UserId,
    pub local_user_name: String,
    /// Upper bound on the wait for an optimistic send to reach the store.
    pub send_timeout: Duration,
    /// Offset used to derive day-bucket keys from message timestamps.
    pub day_offset: FixedOffset,
    pub event_capacity: usize,
}

impl SyncConfig {
    pub fn new(local_user_id: UserId, local_user_name: impl Into<String>) -> Self {
        Self {
            local_user_id,
            local_user_name: local_user_name.into(),
            ..Self::default()
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_day_offset(mut self, day_offset: FixedOffset) -> Self {
        self.day_offset = day_offset;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_user_id: UserId::from("user1"),
            local_user_name: "user1".into(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            day_offset: Local::now().offset().fix(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}
