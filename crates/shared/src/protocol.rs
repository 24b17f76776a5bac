use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{Message, MessageId, MessageKind, Room, RoomId, SendStatus, Timestamp, UserId},
    error::DecodeError,
};

pub const ROOMS_COLLECTION: &str = "rooms";
pub const MESSAGES_COLLECTION: &str = "chatMessages";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Collection {
    Rooms,
    RoomMessages { room_id: RoomId },
}

impl Collection {
    pub fn messages(room_id: &RoomId) -> Self {
        Collection::RoomMessages {
            room_id: room_id.clone(),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Collection::Rooms => ROOMS_COLLECTION.to_string(),
            Collection::RoomMessages { room_id } => {
                format!("{ROOMS_COLLECTION}/{room_id}/{MESSAGES_COLLECTION}")
            }
        }
    }
}

/// A document as delivered by the store: its id, untyped body and write metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub data: Value,
    /// Set while the document reflects a local write the remote has not yet acknowledged.
    #[serde(default)]
    pub has_pending_writes: bool,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            has_pending_writes: false,
        }
    }

    pub fn pending(mut self) -> Self {
        self.has_pending_writes = true;
        self
    }
}

/// One notification from a live message subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<RawDocument>,
    pub changed: Vec<RawDocument>,
    pub from_pending_local_write: bool,
}

impl ChangeSet {
    pub fn added(added: Vec<RawDocument>) -> Self {
        Self {
            added,
            ..Self::default()
        }
    }

    pub fn changed(changed: Vec<RawDocument>) -> Self {
        Self {
            changed,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldUpdate {
    Set { value: Value },
    ArrayUnion { values: Vec<Value> },
}

impl FieldUpdate {
    pub fn set(value: impl Into<Value>) -> Self {
        FieldUpdate::Set {
            value: value.into(),
        }
    }

    /// Resolves the new field value given what is currently stored.
    pub fn apply(&self, current: Option<&Value>) -> Value {
        match self {
            FieldUpdate::Set { value } => value.clone(),
            FieldUpdate::ArrayUnion { values } => {
                let mut merged = match current {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                for value in values {
                    if !merged.contains(value) {
                        merged.push(value.clone());
                    }
                }
                Value::Array(merged)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteOperation {
    Put {
        collection: Collection,
        document_id: String,
        fields: Map<String, Value>,
    },
    Update {
        collection: Collection,
        document_id: String,
        fields: BTreeMap<String, FieldUpdate>,
    },
}

impl WriteOperation {
    pub fn collection(&self) -> &Collection {
        match self {
            WriteOperation::Put { collection, .. } | WriteOperation::Update { collection, .. } => {
                collection
            }
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            WriteOperation::Put { document_id, .. }
            | WriteOperation::Update { document_id, .. } => document_id,
        }
    }

    pub fn put_message(room_id: &RoomId, message: &Message) -> Self {
        WriteOperation::Put {
            collection: Collection::messages(room_id),
            document_id: message.id.0.clone(),
            fields: encode_message(message),
        }
    }

    pub fn put_room(room: &Room) -> Self {
        WriteOperation::Put {
            collection: Collection::Rooms,
            document_id: room.id.0.clone(),
            fields: encode_room(room),
        }
    }

    pub fn update_room_summary(room: &Room) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "lastMessage".to_string(),
            FieldUpdate::set(room.last_message.clone()),
        );
        fields.insert(
            "lastMessageUserName".to_string(),
            FieldUpdate::set(room.last_message_user_name.clone()),
        );
        if let Some(updated_at) = room.updated_at {
            fields.insert("updatedAt".to_string(), FieldUpdate::set(updated_at));
        }
        WriteOperation::Update {
            collection: Collection::Rooms,
            document_id: room.id.0.clone(),
            fields,
        }
    }

    pub fn mark_read(room_id: &RoomId, message_id: &MessageId, reader: &UserId) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "isReadUserId".to_string(),
            FieldUpdate::ArrayUnion {
                values: vec![Value::String(reader.0.clone())],
            },
        );
        WriteOperation::Update {
            collection: Collection::messages(room_id),
            document_id: message_id.0.clone(),
            fields,
        }
    }

    pub fn set_send_status(room_id: &RoomId, message_id: &MessageId, status: SendStatus) -> Self {
        let value = status.as_flag().map(Value::Bool).unwrap_or(Value::Null);
        let mut fields = BTreeMap::new();
        fields.insert("isSent".to_string(), FieldUpdate::Set { value });
        WriteOperation::Update {
            collection: Collection::messages(room_id),
            document_id: message_id.0.clone(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDocument {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    type_raw_value: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    is_read_user_id: Vec<String>,
    #[serde(default)]
    is_sent: Option<bool>,
    #[serde(default)]
    sent_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomDocument {
    #[serde(default)]
    user_ids: Vec<String>,
    #[serde(default)]
    user_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon_url: Option<String>,
    #[serde(default)]
    last_message: String,
    #[serde(default)]
    last_message_user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<Timestamp>,
}

fn object_for(document: &RawDocument) -> Result<Value, DecodeError> {
    if !document.data.is_object() {
        return Err(DecodeError::NotAnObject {
            document_id: document.id.clone(),
        });
    }
    Ok(document.data.clone())
}

fn parse_kind(document_id: &str, raw: Option<&str>) -> Result<MessageKind, DecodeError> {
    match raw {
        None | Some("normal") => Ok(MessageKind::Normal),
        Some("system") => Ok(MessageKind::System),
        Some(other) => Err(DecodeError::UnknownKind {
            document_id: document_id.to_string(),
            raw: other.to_string(),
        }),
    }
}

pub fn decode_message(document: &RawDocument) -> Result<Message, DecodeError> {
    let wire: MessageDocument =
        serde_json::from_value(object_for(document)?).map_err(|err| DecodeError::Malformed {
            document_id: document.id.clone(),
            reason: err.to_string(),
        })?;

    let author_id = wire.user_id.ok_or_else(|| DecodeError::MissingField {
        document_id: document.id.clone(),
        field: "userId",
    })?;
    let sent_at = wire.sent_at.ok_or_else(|| DecodeError::MissingField {
        document_id: document.id.clone(),
        field: "sentAt",
    })?;
    let kind = parse_kind(&document.id, wire.type_raw_value.as_deref())?;

    Ok(Message {
        id: MessageId(document.id.clone()),
        author_id: UserId(author_id),
        author_name: wire.user_name,
        kind,
        body: wire.message,
        readers: wire.is_read_user_id.into_iter().map(UserId).collect(),
        send_status: SendStatus::from_flag(wire.is_sent),
        sent_at,
    })
}

pub fn encode_message(message: &Message) -> Map<String, Value> {
    let wire = MessageDocument {
        user_id: Some(message.author_id.0.clone()),
        user_name: message.author_name.clone(),
        type_raw_value: Some(message.kind.as_str().to_string()),
        message: message.body.clone(),
        is_read_user_id: message.readers.iter().map(|id| id.0.clone()).collect(),
        is_sent: message.send_status.as_flag(),
        sent_at: Some(message.sent_at),
    };
    match serde_json::to_value(wire) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn decode_room(document: &RawDocument) -> Result<Room, DecodeError> {
    let wire: RoomDocument =
        serde_json::from_value(object_for(document)?).map_err(|err| DecodeError::Malformed {
            document_id: document.id.clone(),
            reason: err.to_string(),
        })?;

    Ok(Room {
        id: RoomId(document.id.clone()),
        participant_ids: wire.user_ids.into_iter().map(UserId).collect(),
        participant_names: wire.user_names,
        icon_url: wire.icon_url,
        last_message: wire.last_message,
        last_message_user_name: wire.last_message_user_name,
        created_at: wire.created_at,
        updated_at: wire.updated_at,
    })
}

pub fn encode_room(room: &Room) -> Map<String, Value> {
    let wire = RoomDocument {
        user_ids: room.participant_ids.iter().map(|id| id.0.clone()).collect(),
        user_names: room.participant_names.clone(),
        icon_url: room.icon_url.clone(),
        last_message: room.last_message.clone(),
        last_message_user_name: room.last_message_user_name.clone(),
        created_at: room.created_at,
        updated_at: room.updated_at,
    };
    match serde_json::to_value(wire) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
