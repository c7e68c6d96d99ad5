use crate::domain::peer::PeerId;
use crate::domain::replication::{ReplicationMessage, Snapshot, StateChange};

// Port for the reliable ordered channel between the authority and its peers.
// Delivery is best effort from the session's point of view: a peer that left
// simply misses the message.
pub trait Transport: Send + Sync {
    fn send_to(&self, peer: PeerId, message: ReplicationMessage);
    fn broadcast(&self, message: ReplicationMessage);
    // Latest full state, used for lag recovery without a round trip.
    fn publish_snapshot(&self, snapshot: Snapshot);
}

// Port for anything that turns state changes into visuals or audio. May be absent.
pub trait PresentationAdapter: Send {
    fn on_change(&mut self, change: &StateChange);

    fn on_preview(&mut self, _color_index: i64) {}
}
