use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(RoomId);
id_newtype!(MessageId);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Normal,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Normal => "normal",
            MessageKind::System => "system",
        }
    }
}

/// Remote durability of a message as last observed by this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    #[default]
    Unknown,
    ConfirmedSent,
    ConfirmedUnsent,
}

impl SendStatus {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => SendStatus::Unknown,
            Some(true) => SendStatus::ConfirmedSent,
            Some(false) => SendStatus::ConfirmedUnsent,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            SendStatus::Unknown => None,
            SendStatus::ConfirmedSent => Some(true),
            SendStatus::ConfirmedUnsent => Some(false),
        }
    }
}

/// Seconds since the unix epoch. Ordering key for messages.
pub type Timestamp = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author_id: UserId,
    pub author_name: String,
    pub kind: MessageKind,
    pub body: String,
    pub readers: BTreeSet<UserId>,
    pub send_status: SendStatus,
    pub sent_at: Timestamp,
}

impl Message {
    pub fn new_normal(
        id: MessageId,
        author_id: UserId,
        author_name: impl Into<String>,
        body: impl Into<String>,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            id,
            author_id,
            author_name: author_name.into(),
            kind: MessageKind::Normal,
            body: body.into(),
            readers: BTreeSet::new(),
            send_status: SendStatus::Unknown,
            sent_at,
        }
    }

    pub fn is_authored_by(&self, user_id: &UserId) -> bool {
        &self.author_id == user_id
    }

    /// System messages written by the local user are bookkeeping only.
    pub fn is_hidden_for(&self, local_user: &UserId) -> bool {
        self.kind == MessageKind::System && self.is_authored_by(local_user)
    }

    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.readers.contains(user_id)
    }

    /// Any observable difference that warrants re-upserting and notifying.
    pub fn differs_materially(&self, other: &Message) -> bool {
        self.author_id != other.author_id
            || self.author_name != other.author_name
            || self.kind != other.kind
            || self.body != other.body
            || self.readers != other.readers
            || self.send_status != other.send_status
            || self.sent_at != other.sent_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub participant_ids: Vec<UserId>,
    pub participant_names: Vec<String>,
    pub icon_url: Option<String>,
    pub last_message: String,
    pub last_message_user_name: String,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl Room {
    pub fn record_last_message(&mut self, message: &Message) {
        self.last_message = message.body.clone();
        self.last_message_user_name = message.author_name.clone();
        self.updated_at = Some(message.sent_at);
    }

    /// Names of everyone in the room other than `local_name`, for a title bar.
    pub fn peer_names(&self, local_name: &str) -> Vec<&str> {
        self.participant_names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != local_name)
            .collect()
    }
}
