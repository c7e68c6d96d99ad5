// Wire protocol DTOs and conversions for public session server messages.

use crate::domain::{PeerId, ReplicationMessage, SetEntry, Snapshot, Value, ValueEntry};
use crate::use_cases::SessionEvent;
use serde::{Deserialize, Serialize};

/// Messages the server sends to connected clients over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    // Assigned identity for the connection, sent before anything else.
    Identity { peer_id: u64 },
    // Full replicated state; sent on join, on request and for lag recovery.
    Snapshot(SnapshotDto),
    ValueChanged {
        key: String,
        value: ValueDto,
        version: u64,
    },
    MemberAdded {
        key: String,
        member: String,
        len: usize,
    },
    ColorPreview { index: i64 },
}

/// Messages the client sends to the server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    ProposeWrite { key: String, value: ValueDto },
    ProposeAdd { key: String, member: String },
    RequestSnapshot,
    PreviewColor { index: i64 },
    ActivateCheckpoint { index: u32 },
    UseKeyDoor { door: String },
}

impl ClientMessage {
    pub fn into_event(self, peer: PeerId) -> SessionEvent {
        match self {
            ClientMessage::ProposeWrite { key, value } => SessionEvent::ProposeWrite {
                peer,
                key,
                value: value.into(),
            },
            ClientMessage::ProposeAdd { key, member } => {
                SessionEvent::ProposeAdd { peer, key, member }
            }
            ClientMessage::RequestSnapshot => SessionEvent::RequestSnapshot { peer },
            ClientMessage::PreviewColor { index } => SessionEvent::PreviewColor { peer, index },
            ClientMessage::ActivateCheckpoint { index } => {
                SessionEvent::ActivateCheckpoint { peer, index }
            }
            ClientMessage::UseKeyDoor { door } => SessionEvent::UseKeyDoor { peer, door },
        }
    }
}

/// Replicated value as plain JSON: `true` or `3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDto {
    Bool(bool),
    Int(i64),
}

impl From<Value> for ValueDto {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => ValueDto::Bool(b),
            Value::Int(i) => ValueDto::Int(i),
        }
    }
}

impl From<ValueDto> for Value {
    fn from(value: ValueDto) -> Self {
        match value {
            ValueDto::Bool(b) => Value::Bool(b),
            ValueDto::Int(i) => Value::Int(i),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDto {
    pub sequence: u64,
    pub values: Vec<ValueEntryDto>,
    pub sets: Vec<SetEntryDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueEntryDto {
    pub key: String,
    pub value: ValueDto,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetEntryDto {
    pub key: String,
    pub members: Vec<String>,
}

impl From<Snapshot> for SnapshotDto {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            sequence: snapshot.sequence,
            values: snapshot.values.into_iter().map(ValueEntryDto::from).collect(),
            sets: snapshot.sets.into_iter().map(SetEntryDto::from).collect(),
        }
    }
}

impl From<ValueEntry> for ValueEntryDto {
    fn from(entry: ValueEntry) -> Self {
        Self {
            key: entry.key,
            value: entry.value.into(),
            version: entry.version,
        }
    }
}

impl From<SetEntry> for SetEntryDto {
    fn from(entry: SetEntry) -> Self {
        Self {
            key: entry.key,
            members: entry.members,
        }
    }
}

impl From<ReplicationMessage> for ServerMessage {
    fn from(message: ReplicationMessage) -> Self {
        match message {
            ReplicationMessage::Snapshot(snapshot) => ServerMessage::Snapshot(snapshot.into()),
            ReplicationMessage::ValueChanged {
                key,
                value,
                version,
            } => ServerMessage::ValueChanged {
                key,
                value: value.into(),
                version,
            },
            ReplicationMessage::MemberAdded { key, member, len } => {
                ServerMessage::MemberAdded { key, member, len }
            }
            ReplicationMessage::ColorPreview { index } => ServerMessage::ColorPreview { index },
        }
    }
}
