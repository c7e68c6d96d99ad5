use std::sync::{Arc, Mutex};

use crate::domain::{PeerId, ReplicationMessage, Snapshot, Transport};
use crate::use_cases::types::Outbound;

// Transport double that keeps everything the session sent, in order.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    sent: Arc<Mutex<Vec<Outbound>>>,
    published: Arc<Mutex<Vec<Snapshot>>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }

    pub(crate) fn sent_to(&self, peer: PeerId) -> Vec<ReplicationMessage> {
        self.sent()
            .into_iter()
            .filter(|outbound| outbound.to == Some(peer))
            .map(|outbound| outbound.message)
            .collect()
    }

    pub(crate) fn broadcasts(&self) -> Vec<ReplicationMessage> {
        self.sent()
            .into_iter()
            .filter(|outbound| outbound.to.is_none())
            .map(|outbound| outbound.message)
            .collect()
    }

    pub(crate) fn latest(&self) -> Option<Snapshot> {
        self.published
            .lock()
            .expect("published mutex poisoned")
            .last()
            .cloned()
    }

    pub(crate) fn published_count(&self) -> usize {
        self.published.lock().expect("published mutex poisoned").len()
    }
}

impl Transport for RecordingTransport {
    fn send_to(&self, peer: PeerId, message: ReplicationMessage) {
        self.sent.lock().expect("sent mutex poisoned").push(Outbound {
            to: Some(peer),
            message,
        });
    }

    fn broadcast(&self, message: ReplicationMessage) {
        self.sent
            .lock()
            .expect("sent mutex poisoned")
            .push(Outbound { to: None, message });
    }

    fn publish_snapshot(&self, snapshot: Snapshot) {
        self.published
            .lock()
            .expect("published mutex poisoned")
            .push(snapshot);
    }
}
