// Mutable state owned by the authoritative session task.

use super::store::ReplicatedStore;
use crate::domain::{DoorMotion, DoorPhase, PeerId, Role};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Logical door motion for every door bound to a replicated bool.
#[derive(Debug, Default)]
pub struct DoorBank {
    doors: BTreeMap<String, DoorMotion>,
}

impl DoorBank {
    pub fn bind(&mut self, key: impl Into<String>, travel_ticks: u32) {
        self.doors.insert(key.into(), DoorMotion::new(travel_ticks));
    }

    pub fn phase(&self, key: &str) -> Option<DoorPhase> {
        self.doors.get(key).map(DoorMotion::phase)
    }

    pub fn len(&self) -> usize {
        self.doors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doors.is_empty()
    }

    /// Feeds every door its bound value, then moves it one tick.
    pub fn step(&mut self, store: &ReplicatedStore) {
        for (key, door) in self.doors.iter_mut() {
            // Registered by the level wiring; a missing key just leaves the door idle.
            let Ok(bound) = store.read_bool(key) else {
                continue;
            };
            if let Some(phase) = door.observe(bound) {
                debug!(door = %key, ?phase, "door started moving");
            }
            if let Some(phase) = door.advance() {
                debug!(door = %key, ?phase, "door settled");
            }
        }
    }
}

pub struct SessionWorld {
    pub store: ReplicatedStore,
    pub doors: DoorBank,
    pub peers: BTreeSet<PeerId>,
}

impl SessionWorld {
    pub fn new() -> Self {
        let mut peers = BTreeSet::new();
        peers.insert(PeerId::HOST);
        Self {
            store: ReplicatedStore::new(Role::Authoritative),
            doors: DoorBank::default(),
            peers,
        }
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains(&peer)
    }
}

impl Default for SessionWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Value, WriteGuard};

    #[test]
    fn door_bank_follows_bound_value_edges() {
        let mut store = ReplicatedStore::new(Role::Authoritative);
        store
            .register_value("door.A", Value::Bool(false), WriteGuard::ServerOnly)
            .unwrap();
        let mut doors = DoorBank::default();
        doors.bind("door.A", 2);

        doors.step(&store);
        assert_eq!(doors.phase("door.A"), Some(DoorPhase::Closed));

        store.write("door.A", true).unwrap();
        doors.step(&store);
        assert_eq!(doors.phase("door.A"), Some(DoorPhase::Opening));
        doors.step(&store);
        assert_eq!(doors.phase("door.A"), Some(DoorPhase::Open));

        store.write("door.A", false).unwrap();
        doors.step(&store);
        assert_eq!(doors.phase("door.A"), Some(DoorPhase::Closing));
    }

    #[test]
    fn new_world_knows_the_host() {
        let world = SessionWorld::new();

        assert!(world.is_connected(PeerId::HOST));
        assert!(world.store.is_authoritative());
    }
}
