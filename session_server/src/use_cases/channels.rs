// In-process transport: one broadcast channel carries every outbound message,
// a watch channel holds the latest snapshot for lag recovery.

use super::types::Outbound;
use crate::domain::{PeerId, ReplicationMessage, Snapshot, Transport};
use tokio::sync::{broadcast, watch};
use tracing::trace;

pub struct ChannelTransport {
    updates_tx: broadcast::Sender<Outbound>,
    latest_tx: watch::Sender<Snapshot>,
}

impl ChannelTransport {
    pub fn new(updates_tx: broadcast::Sender<Outbound>, latest_tx: watch::Sender<Snapshot>) -> Self {
        Self {
            updates_tx,
            latest_tx,
        }
    }

    fn send(&self, outbound: Outbound) {
        // No receivers just means nobody is connected yet.
        if self.updates_tx.send(outbound).is_err() {
            trace!("no subscribers for outbound update");
        }
    }
}

impl Transport for ChannelTransport {
    fn send_to(&self, peer: PeerId, message: ReplicationMessage) {
        self.send(Outbound {
            to: Some(peer),
            message,
        });
    }

    fn broadcast(&self, message: ReplicationMessage) {
        self.send(Outbound { to: None, message });
    }

    fn publish_snapshot(&self, snapshot: Snapshot) {
        self.latest_tx.send_replace(snapshot);
    }
}
