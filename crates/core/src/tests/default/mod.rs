use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::rendezvous::RendezvousCallback;
use crate::session::PeerSession;

mod test_session;
mod test_sps;
mod test_supervisor;
mod test_tracker;

/// What a recorded connector reported upward.
#[allow(dead_code)]
pub enum RecordedEvent {
    Peer(PeerSession),
    Open(String),
    Kill(String, Error),
    Warn(String, String),
}

/// A [RendezvousCallback] that records everything and forwards it on a
/// channel so tests can await connector activity.
pub struct RecorderCallback {
    pub blocked: Mutex<Vec<String>>,
    pub block_all: bool,
    tx: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecorderCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RecordedEvent>) {
        Self::with_gate(false)
    }

    /// A recorder whose admission gate rejects everyone.
    pub fn new_blocking() -> (Arc<Self>, mpsc::UnboundedReceiver<RecordedEvent>) {
        Self::with_gate(true)
    }

    fn with_gate(block_all: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<RecordedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                blocked: Mutex::new(Vec::new()),
                block_all,
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl RendezvousCallback for RecorderCallback {
    fn should_block(&self, peer_id: &str) -> bool {
        self.blocked.lock().unwrap().push(peer_id.to_string());
        self.block_all
    }

    async fn on_peer(&self, _rendezvous: &str, peer: PeerSession) {
        let _ = self.tx.send(RecordedEvent::Peer(peer));
    }

    async fn on_open(&self, rendezvous: &str) {
        let _ = self.tx.send(RecordedEvent::Open(rendezvous.to_string()));
    }

    async fn on_kill(&self, rendezvous: &str, error: Error) {
        let _ = self
            .tx
            .send(RecordedEvent::Kill(rendezvous.to_string(), error));
    }

    async fn on_warn(&self, rendezvous: &str, message: String) {
        let _ = self
            .tx
            .send(RecordedEvent::Warn(rendezvous.to_string(), message));
    }
}
