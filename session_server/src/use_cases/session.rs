// Authoritative session: the single task that owns replicated state, and the
// handle callers use to reach it.

use super::channels::ChannelTransport;
use super::level::{self, LevelLayout};
use super::mirror::ObserverReplica;
use super::rules::RulesEngine;
use super::scheduler::{Scheduler, TickInfo};
use super::store::{ProposalOutcome, ReplicatedStore};
use super::types::{Outbound, SessionEvent};
use super::world::SessionWorld;
use crate::domain::{
    PeerId, ReplicationError, ReplicationMessage, Snapshot, Transport, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Shared configuration for starting a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity for inbound peer events.
    pub event_channel_capacity: usize,
    /// Capacity for the outbound update fan-out.
    pub update_broadcast_capacity: usize,
    /// Fixed tick interval for the session loop.
    pub tick_interval: Duration,
    /// How long an observer waits for its snapshot before re-requesting it.
    pub join_timeout: Duration,
}

/// Everything the session task owns. Synchronous so it can be driven by hand in tests.
pub struct SessionRuntime {
    world: SessionWorld,
    rules: RulesEngine,
    scheduler: Scheduler<SessionWorld>,
    layout: Arc<LevelLayout>,
    published_sequence: Option<u64>,
}

impl SessionRuntime {
    pub fn new(layout: Arc<LevelLayout>, tick_interval: Duration) -> Result<Self, ReplicationError> {
        let mut world = SessionWorld::new();
        let mut rules = RulesEngine::new();
        let mut scheduler = Scheduler::new(tick_interval);
        level::install(&layout, &mut world, &mut rules, &mut scheduler)?;

        Ok(Self {
            world,
            rules,
            scheduler,
            layout,
            published_sequence: None,
        })
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.world.store
    }

    /// Host-side access for authoritative writes outside the event flow.
    pub fn store_mut(&mut self) -> &mut ReplicatedStore {
        &mut self.world.store
    }

    pub fn world(&self) -> &SessionWorld {
        &self.world
    }

    pub fn handle_event(&mut self, event: SessionEvent, transport: &dyn Transport) {
        let peer = event.peer();
        match event {
            SessionEvent::Join { peer } => {
                // Earlier updates go out first so the snapshot is the newest thing the peer sees.
                self.flush(transport);
                self.world.peers.insert(peer);
                info!(%peer, peers = self.world.peers.len(), "peer joined");
                transport.send_to(peer, ReplicationMessage::Snapshot(self.world.store.snapshot()));
            }
            SessionEvent::Leave { peer } => {
                if self.world.peers.remove(&peer) {
                    info!(%peer, peers = self.world.peers.len(), "peer left");
                }
            }
            SessionEvent::RequestSnapshot { peer } => {
                if !self.world.is_connected(peer) {
                    warn!(%peer, "snapshot requested by unknown peer");
                    return;
                }
                self.flush(transport);
                debug!(%peer, "snapshot re-sent");
                transport.send_to(peer, ReplicationMessage::Snapshot(self.world.store.snapshot()));
            }
            proposal => {
                if !self.world.is_connected(peer) {
                    warn!(%peer, ?proposal, "proposal from unknown peer ignored");
                    return;
                }
                self.handle_proposal(proposal);
            }
        }
    }

    fn handle_proposal(&mut self, event: SessionEvent) {
        let store = &mut self.world.store;
        let peer = event.peer();
        let result = match event {
            SessionEvent::ProposeWrite { key, value, .. } => store.decide_proposal(&key, value),
            SessionEvent::ProposeAdd { key, member, .. } if key == level::KEYS_COLLECTED => {
                level::collect_key(&self.layout, store, &member)
            }
            SessionEvent::ProposeAdd { key, member, .. } => store.decide_add_proposal(&key, &member),
            SessionEvent::PreviewColor { index, .. } => {
                level::preview_color(&self.layout, store, index)
            }
            SessionEvent::ActivateCheckpoint { index, .. } => {
                level::activate_checkpoint(&self.layout, store, index).map(applied_if)
            }
            SessionEvent::UseKeyDoor { door, .. } => match self.layout.required_key(&door) {
                Some(required_key) => level::use_key_door(store, &door, required_key).map(applied_if),
                None => {
                    warn!(%peer, %door, "unknown key door");
                    return;
                }
            },
            SessionEvent::Join { .. }
            | SessionEvent::Leave { .. }
            | SessionEvent::RequestSnapshot { .. } => return,
        };

        match result {
            Ok(ProposalOutcome::Rejected(reason)) => {
                info!(%peer, %reason, "proposal rejected");
            }
            Ok(outcome) => debug!(%peer, ?outcome, "proposal decided"),
            Err(err) => warn!(%peer, error = %err, "proposal failed"),
        }
    }

    /// Runs one tick: per-tick rules, trigger cascades, then scheduled callbacks.
    pub fn tick(&mut self) -> TickInfo {
        let store = &mut self.world.store;
        if let Err(err) = self.rules.evaluate_tick(store) {
            warn!(error = %err, "tick rules failed");
        }
        let changed = store.take_dirty();
        if let Err(err) = self.rules.evaluate_triggered(store, &changed) {
            warn!(error = %err, "triggered rules failed");
        }
        self.scheduler.advance(&mut self.world)
    }

    /// Hands queued updates to the transport and republishes the snapshot if anything changed.
    pub fn flush(&mut self, transport: &dyn Transport) {
        for message in self.world.store.drain_outbox() {
            transport.broadcast(message);
        }

        let sequence = self.world.store.sequence();
        if self.published_sequence != Some(sequence) {
            transport.publish_snapshot(self.world.store.snapshot());
            self.published_sequence = Some(sequence);
        }
    }
}

fn applied_if(changed: bool) -> ProposalOutcome {
    if changed {
        ProposalOutcome::Applied
    } else {
        ProposalOutcome::Unchanged
    }
}

pub async fn session_task(
    mut event_rx: mpsc::Receiver<SessionEvent>,
    transport: Arc<dyn Transport>,
    mut runtime: SessionRuntime,
    tick_interval: Duration,
    shutdown: Arc<Notify>,
) {
    // Drive the fixed-step session loop at the configured tick rate.
    let mut interval = tokio::time::interval(tick_interval);
    runtime.flush(transport.as_ref());

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("session shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        while let Ok(event) = event_rx.try_recv() {
            runtime.handle_event(event, transport.as_ref());
        }
        runtime.tick();
        runtime.flush(transport.as_ref());
    }
}

/// Channels into and out of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    /// Identifier used in logs and the state route.
    pub session_id: Arc<str>,
    /// Sender for peer events into the session task.
    event_tx: mpsc::Sender<SessionEvent>,
    /// Fan-out of every outbound replication message.
    updates_tx: broadcast::Sender<Outbound>,
    /// Latest published snapshot.
    latest_rx: watch::Receiver<Snapshot>,
    shutdown: Arc<Notify>,
    layout: Arc<LevelLayout>,
    join_timeout: Duration,
}

impl SessionHandle {
    /// Spawns the authoritative session task. Must be called inside a tokio runtime.
    pub fn start(
        session_id: impl Into<Arc<str>>,
        layout: Arc<LevelLayout>,
        settings: &SessionSettings,
    ) -> Result<Self, ReplicationError> {
        let runtime = SessionRuntime::new(Arc::clone(&layout), settings.tick_interval)?;

        // Channel wiring for the session loop.
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(settings.event_channel_capacity);
        let (updates_tx, _updates_rx) =
            broadcast::channel::<Outbound>(settings.update_broadcast_capacity);
        let (latest_tx, latest_rx) = watch::channel::<Snapshot>(runtime.store().snapshot());
        let shutdown = Arc::new(Notify::new());
        let transport: Arc<dyn Transport> =
            Arc::new(ChannelTransport::new(updates_tx.clone(), latest_tx));

        let session_id = session_id.into();
        info!(session = %session_id, level = %layout.name, "session started");
        tokio::spawn(session_task(
            event_rx,
            transport,
            runtime,
            settings.tick_interval,
            Arc::clone(&shutdown),
        ));

        Ok(Self {
            session_id,
            event_tx,
            updates_tx,
            latest_rx,
            shutdown,
            layout,
            join_timeout: settings.join_timeout,
        })
    }

    pub fn layout(&self) -> &LevelLayout {
        &self.layout
    }

    pub fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.latest_rx.borrow().clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Outbound> {
        self.updates_tx.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.latest_rx.clone()
    }

    /// Non-blocking send for callers that drop events when the session is busy.
    pub fn try_send(&self, event: SessionEvent) -> Result<(), mpsc::error::TrySendError<SessionEvent>> {
        self.event_tx.try_send(event)
    }

    pub async fn send(&self, event: SessionEvent) -> Result<(), ReplicationError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| ReplicationError::SessionClosed)
    }

    /// Joins as an observer. The update receiver is created before `Join` is sent
    /// so the snapshot addressed to this peer cannot be missed.
    pub async fn join(&self, peer: PeerId) -> Result<ObserverReplica, ReplicationError> {
        let updates_rx = self.updates_tx.subscribe();
        let replica = ObserverReplica::new(
            peer,
            &self.layout,
            updates_rx,
            self.event_tx.clone(),
            self.join_timeout,
        )?;
        self.send(SessionEvent::Join { peer }).await?;
        Ok(replica)
    }

    pub async fn leave(&self, peer: PeerId) -> Result<(), ReplicationError> {
        self.send(SessionEvent::Leave { peer }).await
    }

    pub async fn propose_write(
        &self,
        peer: PeerId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ProposeWrite {
            peer,
            key: key.to_string(),
            value: value.into(),
        })
        .await
    }

    pub async fn propose_add(
        &self,
        peer: PeerId,
        set_key: &str,
        member: &str,
    ) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ProposeAdd {
            peer,
            key: set_key.to_string(),
            member: member.to_string(),
        })
        .await
    }

    pub async fn preview_color(&self, peer: PeerId, index: i64) -> Result<(), ReplicationError> {
        self.send(SessionEvent::PreviewColor { peer, index }).await
    }

    pub async fn activate_checkpoint(
        &self,
        peer: PeerId,
        index: u32,
    ) -> Result<(), ReplicationError> {
        self.send(SessionEvent::ActivateCheckpoint { peer, index })
            .await
    }

    pub async fn use_key_door(&self, peer: PeerId, door: &str) -> Result<(), ReplicationError> {
        self.send(SessionEvent::UseKeyDoor {
            peer,
            door: door.to_string(),
        })
        .await
    }

    pub fn shutdown(&self) {
        // `notify_one` keeps a permit, so a shutdown during a tick is not lost.
        self.shutdown.notify_one();
    }
}
