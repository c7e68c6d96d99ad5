// Observer side of replication: a read-only copy of the authority's store,
// brought up by a snapshot-on-join handshake and kept current by ordered updates.

use super::level::{self, LevelLayout};
use super::store::{ReplicatedStore, SubscriptionId};
use super::types::{Outbound, SessionEvent};
use crate::domain::{
    PeerId, PresentationAdapter, ReplicationError, ReplicationMessage, Role, Snapshot, StateChange,
    Value,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum SyncState {
    // Updates that race ahead of the snapshot wait here; the store's version
    // check drops the ones the snapshot already covers.
    AwaitingSnapshot {
        since: Instant,
        buffered: Vec<ReplicationMessage>,
    },
    Synced,
}

/// Handshake state machine around an observer store. Has no channels of its own.
pub struct Mirror {
    peer: PeerId,
    store: ReplicatedStore,
    state: SyncState,
    join_timeout: Duration,
}

impl Mirror {
    pub fn new(peer: PeerId, store: ReplicatedStore, join_timeout: Duration, now: Instant) -> Self {
        Self {
            peer,
            store,
            state: SyncState::AwaitingSnapshot {
                since: now,
                buffered: Vec::new(),
            },
            join_timeout,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ReplicatedStore {
        &mut self.store
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.state, SyncState::Synced)
    }

    /// Applies one message from the authority. Returns whether local state changed.
    pub fn receive(&mut self, message: ReplicationMessage) -> Result<bool, ReplicationError> {
        if let ReplicationMessage::Snapshot(snapshot) = message {
            return self.complete(snapshot);
        }
        match &mut self.state {
            // Previews are transient and are not replayed once the snapshot lands.
            SyncState::AwaitingSnapshot { .. }
                if matches!(message, ReplicationMessage::ColorPreview { .. }) =>
            {
                Ok(false)
            }
            SyncState::AwaitingSnapshot { buffered, .. } => {
                buffered.push(message);
                Ok(false)
            }
            SyncState::Synced => self.store.apply(message),
        }
    }

    fn complete(&mut self, snapshot: Snapshot) -> Result<bool, ReplicationError> {
        let sequence = snapshot.sequence;
        let mut changed = self.store.apply_snapshot(snapshot)?;

        if let SyncState::AwaitingSnapshot { buffered, .. } =
            std::mem::replace(&mut self.state, SyncState::Synced)
        {
            let pending = buffered.len();
            for message in buffered {
                changed |= self.store.apply(message)?;
            }
            debug!(peer = %self.peer, sequence, buffered = pending, "mirror synced");
        }
        Ok(changed)
    }

    /// Reports a join that has waited longer than the timeout for its snapshot.
    /// The wait restarts so the caller re-requests once per timeout. Updates
    /// buffered so far are dropped; the re-requested snapshot supersedes them.
    pub fn check_stale(&mut self, now: Instant) -> Result<(), ReplicationError> {
        let SyncState::AwaitingSnapshot { since, buffered } = &mut self.state else {
            return Ok(());
        };
        let waited = now.saturating_duration_since(*since);
        if waited < self.join_timeout {
            return Ok(());
        }
        *since = now;
        if !buffered.is_empty() {
            debug!(peer = %self.peer, dropped = buffered.len(), "join stale, dropping buffered updates");
            buffered.clear();
        }
        Err(ReplicationError::StaleJoin {
            peer: self.peer,
            waited_ms: waited.as_millis() as u64,
        })
    }

    /// Drops back to awaiting a snapshot, e.g. after missing updates.
    pub fn resync(&mut self, now: Instant) {
        self.state = SyncState::AwaitingSnapshot {
            since: now,
            buffered: Vec::new(),
        };
    }
}

/// A joined observer peer: mirror plus the channels to and from the session.
pub struct ObserverReplica {
    mirror: Mirror,
    updates_rx: broadcast::Receiver<Outbound>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl ObserverReplica {
    pub(crate) fn new(
        peer: PeerId,
        layout: &LevelLayout,
        updates_rx: broadcast::Receiver<Outbound>,
        event_tx: mpsc::Sender<SessionEvent>,
        join_timeout: Duration,
    ) -> Result<Self, ReplicationError> {
        let mut store = ReplicatedStore::new(Role::Observer);
        level::register_keys(layout, &mut store)?;
        Ok(Self {
            mirror: Mirror::new(peer, store, join_timeout, Instant::now()),
            updates_rx,
            event_tx,
        })
    }

    pub fn peer(&self) -> PeerId {
        self.mirror.peer()
    }

    pub fn is_synced(&self) -> bool {
        self.mirror.is_synced()
    }

    pub fn store(&self) -> &ReplicatedStore {
        self.mirror.store()
    }

    pub fn read(&self, key: &str) -> Result<Value, ReplicationError> {
        self.mirror.store().read(key)
    }

    pub fn read_bool(&self, key: &str) -> Result<bool, ReplicationError> {
        self.mirror.store().read_bool(key)
    }

    pub fn read_int(&self, key: &str) -> Result<i64, ReplicationError> {
        self.mirror.store().read_int(key)
    }

    pub fn contains(&self, set_key: &str, member: &str) -> Result<bool, ReplicationError> {
        self.mirror.store().contains(set_key, member)
    }

    pub fn has_key(&self, key: &str) -> Result<bool, ReplicationError> {
        level::has_key(self.mirror.store(), key)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.mirror.store().snapshot()
    }

    pub fn subscribe<F>(&mut self, key: &str, callback: F) -> Result<SubscriptionId, ReplicationError>
    where
        F: FnMut(&StateChange) + Send + 'static,
    {
        self.mirror.store_mut().subscribe(key, callback)
    }

    pub fn unsubscribe(&mut self, key: &str, id: SubscriptionId) -> bool {
        self.mirror.store_mut().unsubscribe(key, id)
    }

    pub fn set_presentation(&mut self, adapter: Box<dyn PresentationAdapter>) {
        self.mirror.store_mut().set_presentation(adapter);
    }

    /// Always fails: observers propose, they never write.
    pub fn write(&mut self, key: &str, value: impl Into<Value>) -> Result<bool, ReplicationError> {
        self.mirror.store_mut().write(key, value)
    }

    pub async fn propose_write(
        &self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ProposeWrite {
            peer: self.peer(),
            key: key.to_string(),
            value: value.into(),
        })
        .await
    }

    pub async fn propose_add(&self, set_key: &str, member: &str) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ProposeAdd {
            peer: self.peer(),
            key: set_key.to_string(),
            member: member.to_string(),
        })
        .await
    }

    pub async fn preview_color(&self, index: i64) -> Result<(), ReplicationError> {
        self.send(SessionEvent::PreviewColor {
            peer: self.peer(),
            index,
        })
        .await
    }

    pub async fn activate_checkpoint(&self, index: u32) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ActivateCheckpoint {
            peer: self.peer(),
            index,
        })
        .await
    }

    pub async fn use_key_door(&self, door: &str) -> Result<(), ReplicationError> {
        self.send(SessionEvent::UseKeyDoor {
            peer: self.peer(),
            door: door.to_string(),
        })
        .await
    }

    pub async fn request_snapshot(&self) -> Result<(), ReplicationError> {
        self.send(SessionEvent::RequestSnapshot { peer: self.peer() })
            .await
    }

    pub async fn leave(self) -> Result<(), ReplicationError> {
        self.send(SessionEvent::Leave { peer: self.peer() }).await
    }

    async fn send(&self, event: SessionEvent) -> Result<(), ReplicationError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| ReplicationError::SessionClosed)
    }

    /// Applies everything already delivered without waiting. Returns the number of
    /// messages addressed to this peer.
    pub fn pump(&mut self) -> Result<usize, ReplicationError> {
        let mut applied = 0;
        loop {
            match self.updates_rx.try_recv() {
                Ok(outbound) => {
                    if outbound.is_for(self.peer()) {
                        self.mirror.receive(outbound.message)?;
                        applied += 1;
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(applied),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.recover_from_lag(skipped)?;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(ReplicationError::SessionClosed);
                }
            }
        }
    }

    /// Waits for the next message addressed to this peer and applies it.
    /// Returns whether local state changed.
    pub async fn recv(&mut self) -> Result<bool, ReplicationError> {
        loop {
            match self.updates_rx.recv().await {
                Ok(outbound) => {
                    if outbound.is_for(self.peer()) {
                        return self.mirror.receive(outbound.message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.recover_from_lag(skipped)?;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ReplicationError::SessionClosed);
                }
            }
        }
    }

    /// Waits until the join handshake completes, re-requesting the snapshot
    /// every time the join goes stale.
    pub async fn sync(&mut self) -> Result<(), ReplicationError> {
        while !self.is_synced() {
            let timeout = self.mirror.join_timeout;
            match tokio::time::timeout(timeout, self.recv()).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => {
                    if let Err(err) = self.check_stale() {
                        info!(error = %err, "join went stale, snapshot re-requested");
                    }
                }
            }
        }
        Ok(())
    }

    /// Detects a stale join and re-requests the snapshot when it finds one.
    pub fn check_stale(&mut self) -> Result<(), ReplicationError> {
        let result = self.mirror.check_stale(Instant::now());
        if matches!(result, Err(ReplicationError::StaleJoin { .. })) {
            self.try_request_snapshot()?;
        }
        result
    }

    fn recover_from_lag(&mut self, skipped: u64) -> Result<(), ReplicationError> {
        // Missed updates cannot be replayed; start over from a fresh snapshot.
        warn!(peer = %self.peer(), skipped, "observer lagged, requesting snapshot");
        self.mirror.resync(Instant::now());
        self.try_request_snapshot()
    }

    fn try_request_snapshot(&self) -> Result<(), ReplicationError> {
        match self
            .event_tx
            .try_send(SessionEvent::RequestSnapshot { peer: self.peer() })
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // The next stale check retries.
                warn!(peer = %self.peer(), "session inbox full, snapshot request dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ReplicationError::SessionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ValueEntry, WriteGuard};

    const JOIN_TIMEOUT: Duration = Duration::from_millis(200);

    fn mirror(now: Instant) -> Mirror {
        let mut store = ReplicatedStore::new(Role::Observer);
        store
            .register_value("color.active", Value::Int(0), WriteGuard::ServerOnly)
            .unwrap();
        Mirror::new(PeerId(3), store, JOIN_TIMEOUT, now)
    }

    fn color(value: i64, version: u64) -> ReplicationMessage {
        ReplicationMessage::ValueChanged {
            key: "color.active".to_string(),
            value: Value::Int(value),
            version,
        }
    }

    fn snapshot_with_color(value: i64, version: u64) -> ReplicationMessage {
        ReplicationMessage::Snapshot(Snapshot {
            sequence: version,
            values: vec![ValueEntry {
                key: "color.active".to_string(),
                value: Value::Int(value),
                version,
            }],
            sets: Vec::new(),
        })
    }

    #[test]
    fn updates_before_snapshot_are_buffered_and_stale_ones_dropped() {
        let mut mirror = mirror(Instant::now());

        assert!(!mirror.receive(color(1, 1)).unwrap());
        assert!(!mirror.receive(color(3, 3)).unwrap());
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 0);

        mirror.receive(snapshot_with_color(2, 2)).unwrap();

        assert!(mirror.is_synced());
        // Version 1 predates the snapshot; version 3 is newer and lands.
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 3);
        assert_eq!(mirror.store().get("color.active").unwrap().version(), 3);
    }

    #[test]
    fn synced_mirror_applies_updates_directly() {
        let mut mirror = mirror(Instant::now());
        mirror.receive(snapshot_with_color(0, 0)).unwrap();

        assert!(mirror.receive(color(2, 1)).unwrap());
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 2);
    }

    #[test]
    fn join_goes_stale_after_timeout_and_restarts_the_wait() {
        let start = Instant::now();
        let mut mirror = mirror(start);

        assert!(mirror.check_stale(start + JOIN_TIMEOUT / 2).is_ok());
        let later = start + JOIN_TIMEOUT;
        assert!(matches!(
            mirror.check_stale(later),
            Err(ReplicationError::StaleJoin { peer: PeerId(3), waited_ms: 200 })
        ));
        assert!(mirror.check_stale(later + JOIN_TIMEOUT / 2).is_ok());
    }

    #[test]
    fn synced_mirror_is_never_stale() {
        let start = Instant::now();
        let mut mirror = mirror(start);
        mirror.receive(snapshot_with_color(0, 0)).unwrap();

        assert!(mirror.check_stale(start + JOIN_TIMEOUT * 10).is_ok());
    }

    #[test]
    fn resync_waits_for_a_new_snapshot() {
        let mut mirror = mirror(Instant::now());
        mirror.receive(snapshot_with_color(1, 1)).unwrap();

        mirror.resync(Instant::now());
        assert!(!mirror.is_synced());
        mirror.receive(color(2, 2)).unwrap();
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 1);

        mirror.receive(snapshot_with_color(2, 2)).unwrap();
        assert!(mirror.is_synced());
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 2);
    }

    #[test]
    fn previews_before_snapshot_are_not_replayed() {
        let mut mirror = mirror(Instant::now());

        for index in 0..3 {
            assert!(!mirror.receive(ReplicationMessage::ColorPreview { index }).unwrap());
        }
        assert!(!mirror.receive(color(3, 3)).unwrap());

        assert!(matches!(
            &mirror.state,
            SyncState::AwaitingSnapshot { buffered, .. } if buffered.len() == 1
        ));
        mirror.receive(snapshot_with_color(2, 2)).unwrap();
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 3);
    }

    #[test]
    fn stale_join_drops_updates_buffered_before_the_new_request() {
        let start = Instant::now();
        let mut mirror = mirror(start);
        mirror.receive(color(1, 1)).unwrap();
        mirror.receive(color(2, 2)).unwrap();

        assert!(mirror.check_stale(start + JOIN_TIMEOUT).is_err());
        assert!(matches!(
            &mirror.state,
            SyncState::AwaitingSnapshot { buffered, .. } if buffered.is_empty()
        ));

        mirror.receive(color(4, 4)).unwrap();
        mirror.receive(snapshot_with_color(3, 3)).unwrap();
        assert!(mirror.is_synced());
        assert_eq!(mirror.store().read_int("color.active").unwrap(), 4);
    }

    #[tokio::test]
    async fn replica_rejects_direct_writes_and_forwards_proposals() {
        let (updates_tx, updates_rx) = broadcast::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut replica = ObserverReplica::new(
            PeerId(5),
            &LevelLayout::default(),
            updates_rx,
            event_tx,
            JOIN_TIMEOUT,
        )
        .unwrap();

        assert!(matches!(
            replica.write(level::COLOR_ACTIVE, 2_i64),
            Err(ReplicationError::UnauthorizedWrite { .. })
        ));
        replica.propose_write(level::COLOR_ACTIVE, 2_i64).await.unwrap();

        assert_eq!(
            event_rx.recv().await,
            Some(SessionEvent::ProposeWrite {
                peer: PeerId(5),
                key: level::COLOR_ACTIVE.to_string(),
                value: Value::Int(2),
            })
        );
        drop(updates_tx);
    }

    #[tokio::test]
    async fn lagged_replica_requests_a_snapshot() {
        let (updates_tx, updates_rx) = broadcast::channel(2);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut replica = ObserverReplica::new(
            PeerId(5),
            &LevelLayout::default(),
            updates_rx,
            event_tx,
            JOIN_TIMEOUT,
        )
        .unwrap();

        for index in 0..5 {
            updates_tx
                .send(Outbound {
                    to: None,
                    message: ReplicationMessage::ColorPreview { index },
                })
                .unwrap();
        }
        replica.pump().unwrap();

        assert_eq!(
            event_rx.recv().await,
            Some(SessionEvent::RequestSnapshot { peer: PeerId(5) })
        );
        assert!(!replica.is_synced());
    }
}
