//! Rendezvous connectors.
//!
//! A connector owns one socket to one rendezvous server and every peer
//! session it has created but not yet handed upward. Two dialects exist:
//! the BitTorrent-style WebSocket tracker ([tracker]) and the direct
//! relay protocol ([sps]). Connectors report upward exclusively through
//! [RendezvousCallback]; the supervisor side of that trait holds only a
//! weak reference back, so ownership always points down the tree.

pub mod sps;
pub mod tracker;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::consts::RECONNECT_BACKOFF_CAP;
use crate::consts::RECONNECT_BACKOFF_UNIT_MS;
use crate::error::Error;
use crate::session::PeerSession;

/// The two rendezvous protocol dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// WebTorrent-compatible WebSocket tracker.
    Tracker,
    /// Switchboard Peering Server direct relay.
    Sps,
}

/// What a connector announces on behalf of the supervisor. Only the SPS
/// dialect distinguishes roles; trackers treat every announcer alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceRole {
    /// Accept joiners addressed to our own id.
    Host,
    /// Look for a specific hosting peer.
    JoinHost(String),
    /// Join a named group where everyone connects to everyone.
    Swarm(String),
}

/// One configured rendezvous server.
#[derive(Debug, Clone)]
pub struct RendezvousOptions {
    /// WebSocket url of the server.
    pub url: String,
    /// Which dialect the server speaks.
    pub dialect: Dialect,
    /// When true, losing this server kills the whole supervisor.
    pub is_required: bool,
    /// SPS access pass code, if the server demands one.
    pub pass_code: Option<String>,
}

impl RendezvousOptions {
    /// A tracker-dialect entry with defaults.
    pub fn tracker(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dialect: Dialect::Tracker,
            is_required: false,
            pass_code: None,
        }
    }

    /// An SPS-dialect entry with defaults.
    pub fn sps(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dialect: Dialect::Sps,
            is_required: false,
            pass_code: None,
        }
    }
}

/// Callback wired by the supervisor into every connector.
#[async_trait]
pub trait RendezvousCallback: Send + Sync {
    /// Admission gate, consulted before any resources are spent on a
    /// sighted peer. Returning true rejects the peer.
    fn should_block(&self, peer_id: &str) -> bool;

    /// A candidate session completed ICE and stabilized; ownership
    /// transfers to the callee.
    async fn on_peer(&self, rendezvous: &str, peer: PeerSession);

    /// The connector's socket is open.
    async fn on_open(&self, rendezvous: &str);

    /// The connector died and will not reconnect.
    async fn on_kill(&self, rendezvous: &str, error: Error);

    /// A survivable problem worth reporting.
    async fn on_warn(&self, rendezvous: &str, message: String);
}

/// Shared ownership handle of a running connector task.
pub type SharedRendezvousCallback = Arc<dyn RendezvousCallback>;

/// Handle the supervisor keeps per connector. Dropping it does not stop
/// the task; call [ConnectorHandle::kill].
pub struct ConnectorHandle {
    /// The rendezvous url this connector serves.
    pub url: String,
    /// Whether losing this connector is fatal for the supervisor.
    pub is_required: bool,
    is_open: Arc<AtomicBool>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl ConnectorHandle {
    pub(crate) fn new(
        url: String,
        is_required: bool,
        is_open: Arc<AtomicBool>,
        shutdown: tokio::sync::watch::Sender<bool>,
    ) -> Self {
        Self {
            url,
            is_required,
            is_open,
            shutdown,
        }
    }

    /// Whether the underlying socket is currently open.
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Ask the connector task to stop. Idempotent; the task closes its
    /// socket and destroys unmatched sessions.
    pub fn kill(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Backoff before reconnect attempt number `tries`, capped at ten units.
pub fn reconnect_backoff(tries: u32) -> Duration {
    Duration::from_millis(u64::from(tries.min(RECONNECT_BACKOFF_CAP)) * RECONNECT_BACKOFF_UNIT_MS)
}
