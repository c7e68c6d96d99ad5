use crate::domain::PeerId;
use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Returns a process-unique, monotonically increasing identifier.
///
/// Seeded from the clock so ids from a restarted server are unlikely to repeat
/// ones a client still remembers.
pub fn rand_id() -> u64 {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| AtomicU64::new(now_nanos().max(1)));
    counter.fetch_add(1, Ordering::Relaxed)
}

/// Identity for a newly connected peer. Never collides with the host.
pub fn next_peer_id() -> PeerId {
    loop {
        let id = PeerId(rand_id());
        if id != PeerId::HOST {
            return id;
        }
    }
}
