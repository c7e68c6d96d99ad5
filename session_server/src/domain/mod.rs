// Domain layer: replicated state primitives, peer roles and the ports the session relies on.

pub mod door;
pub mod errors;
pub mod peer;
pub mod ports;
pub mod replication;
pub mod set;
pub mod value;

pub use door::{DoorMotion, DoorPhase};
pub use errors::ReplicationError;
pub use peer::{PeerId, Role};
pub use ports::{PresentationAdapter, Transport};
pub use replication::{ReplicationMessage, SetEntry, Snapshot, StateChange, ValueEntry};
pub use set::{ReplicatedSet, SetPolicy};
pub use value::{Rejection, ReplicatedValue, Value, ValueKind, WriteGuard};
