use crate::domain::peer::PeerId;
use crate::domain::value::ValueKind;

// Domain-level errors for replicated state. None of these abort a session;
// they fail the single operation that raised them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error("unknown replicated key `{key}`")]
    UnknownKey { key: String },

    #[error("key `{key}` is already registered")]
    DuplicateKey { key: String },

    #[error("only the authoritative peer may write `{key}`")]
    UnauthorizedWrite { key: String },

    #[error("key `{key}` holds {expected} values, got {found}")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("peer {peer} has not received a snapshot after {waited_ms}ms")]
    StaleJoin { peer: PeerId, waited_ms: u64 },

    #[error("session is closed")]
    SessionClosed,
}

impl ReplicationError {
    pub(crate) fn unknown(key: &str) -> Self {
        ReplicationError::UnknownKey {
            key: key.to_string(),
        }
    }

    pub(crate) fn unauthorized(key: &str) -> Self {
        ReplicationError::UnauthorizedWrite {
            key: key.to_string(),
        }
    }
}
