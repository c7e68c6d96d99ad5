// Messages and change records exchanged between the authority and its mirrors.

use crate::domain::value::Value;

/// A change observed by subscribers and presentation adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Value {
        key: String,
        old: Value,
        new: Value,
        version: u64,
    },
    Member {
        key: String,
        member: String,
        len: usize,
    },
}

impl StateChange {
    pub fn key(&self) -> &str {
        match self {
            StateChange::Value { key, .. } | StateChange::Member { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntry {
    pub key: String,
    pub members: Vec<String>,
}

/// Full copy of replicated state, sent to peers on join and on request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    // Number of updates the authority had broadcast when the snapshot was taken.
    pub sequence: u64,
    pub values: Vec<ValueEntry>,
    pub sets: Vec<SetEntry>,
}

impl Snapshot {
    pub fn value(&self, key: &str) -> Option<&ValueEntry> {
        self.values.iter().find(|entry| entry.key == key)
    }

    pub fn set(&self, key: &str) -> Option<&SetEntry> {
        self.sets.iter().find(|entry| entry.key == key)
    }
}

/// Everything the authority sends downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMessage {
    Snapshot(Snapshot),
    ValueChanged {
        key: String,
        value: Value,
        version: u64,
    },
    MemberAdded {
        key: String,
        member: String,
        len: usize,
    },
    // Transient colour preview; never stored and never versioned.
    ColorPreview { index: i64 },
}
