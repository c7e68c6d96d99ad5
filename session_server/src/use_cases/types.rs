// Use-case level inputs/outputs for the session loop.

use crate::domain::{PeerId, ReplicationMessage, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Join { peer: PeerId },
    Leave { peer: PeerId },
    ProposeWrite { peer: PeerId, key: String, value: Value },
    ProposeAdd { peer: PeerId, key: String, member: String },
    RequestSnapshot { peer: PeerId },
    PreviewColor { peer: PeerId, index: i64 },
    ActivateCheckpoint { peer: PeerId, index: u32 },
    UseKeyDoor { peer: PeerId, door: String },
}

impl SessionEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            SessionEvent::Join { peer }
            | SessionEvent::Leave { peer }
            | SessionEvent::ProposeWrite { peer, .. }
            | SessionEvent::ProposeAdd { peer, .. }
            | SessionEvent::RequestSnapshot { peer }
            | SessionEvent::PreviewColor { peer, .. }
            | SessionEvent::ActivateCheckpoint { peer, .. }
            | SessionEvent::UseKeyDoor { peer, .. } => *peer,
        }
    }
}

/// A replication message on the shared fan-out channel, addressed to one peer
/// or to everyone.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Option<PeerId>,
    pub message: ReplicationMessage,
}

impl Outbound {
    pub fn is_for(&self, peer: PeerId) -> bool {
        self.to.is_none_or(|to| to == peer)
    }
}
