//! The connection interface every WebRTC backend implements, plus the
//! serde types that mirror the browser's JSON shapes for descriptions and
//! ICE candidates. Keeping the wire shapes here lets higher layers relay
//! payloads produced by any conforming endpoint without re-encoding.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::core::callback::BoxedTransportCallback;
use crate::error::Result;

/// Aggregate connection states, mirroring `RTCPeerConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebrtcConnectionState {
    /// Unspecified state.
    Unspecified,
    /// Freshly created, no negotiation yet.
    New,
    /// ICE/DTLS in progress.
    Connecting,
    /// Transport established.
    Connected,
    /// Transport lost, may recover.
    Disconnected,
    /// Transport failed permanently.
    Failed,
    /// Closed by either side.
    Closed,
}

/// Signaling states, mirroring `RTCSignalingState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// Unspecified state.
    Unspecified,
    /// No offer/answer exchange in progress.
    Stable,
    /// A local offer has been applied.
    HaveLocalOffer,
    /// A local provisional answer has been applied.
    HaveLocalPranswer,
    /// A remote offer has been applied.
    HaveRemoteOffer,
    /// A remote provisional answer has been applied.
    HaveRemotePranswer,
    /// The connection is closed.
    Closed,
}

/// SDP description kinds. Serialized lowercase to match the browser JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// An SDP offer.
    Offer,
    /// A provisional answer.
    Pranswer,
    /// An SDP answer.
    Answer,
    /// A rollback marker.
    Rollback,
}

/// A session description as exchanged on the wire: `{"type": ..., "sdp": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp,
        }
    }

    /// Build an answer description.
    pub fn answer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp,
        }
    }
}

/// An ICE candidate as exchanged on the wire, camelCased like the browser's
/// `RTCIceCandidateInit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate-attribute line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE ufrag, present when the candidate was gathered after a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Options for opening one data channel.
#[derive(Debug, Clone, Default)]
pub struct DataChannelInit {
    /// Out-of-band negotiated channel id. Channels with a fixed id are
    /// usable without a signaling round-trip, both sides must open them
    /// with the same id and label.
    pub negotiated_id: Option<u16>,
    /// Ordered delivery, defaults to true when `None`.
    pub ordered: Option<bool>,
    /// Retransmit bound for unreliable channels.
    pub max_retransmits: Option<u16>,
}

/// Construction options shared by all connection implementations.
#[derive(Debug, Clone, Default)]
pub struct RtcConfig {
    /// `;`-separated STUN/TURN url list, see [crate::ice_server::IceServer].
    pub ice_servers: String,
    /// 1:1 NAT external address, native only.
    pub external_address: Option<String>,
    /// Channels opened at construction with pre-negotiated ids.
    pub reserved_channels: Vec<(String, u16)>,
}

/// The operations switchboard needs from a WebRTC peer connection.
///
/// Offer/answer generation does NOT wait for ICE gathering; callers decide
/// the gathering policy via [ConnectionInterface::wait_ice_gathering_complete].
#[async_trait]
pub trait ConnectionInterface {
    /// Error type of this implementation.
    type Error;

    /// Create an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer for the applied remote offer and apply it locally.
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a remote description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Roll the local description back to stable. Only valid while a local
    /// offer is pending.
    async fn rollback(&self) -> Result<()>;

    /// Apply a remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// The current local description, if any.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// The current remote description, if any.
    async fn remote_description(&self) -> Option<SessionDescription>;

    /// Current signaling state.
    fn signaling_state(&self) -> SignalingState;

    /// Current aggregate connection state.
    fn connection_state(&self) -> WebrtcConnectionState;

    /// Wait until ICE gathering completes or `timeout` elapses. Returns
    /// `true` when gathering finished in time.
    async fn wait_ice_gathering_complete(&self, timeout: Duration) -> bool;

    /// Open an additional data channel.
    async fn open_channel(&self, label: &str, init: DataChannelInit) -> Result<()>;

    /// Close one data channel, leaving the connection up.
    async fn close_channel(&self, label: &str) -> Result<()>;

    /// Whether the named channel is currently open.
    fn channel_ready(&self, label: &str) -> bool;

    /// Send bytes on the named channel. Fails when the channel is absent or
    /// not open; callers queue in that case.
    async fn send_on_channel(&self, label: &str, data: Bytes) -> Result<()>;

    /// Attach an outbound media track, triggering renegotiation.
    async fn add_media_track(&self, track: crate::connections::MediaTrack) -> Result<()>;

    /// Close the connection and all channels.
    async fn close(&self) -> Result<()>;
}

/// Constructor shared by all implementations, kept out of
/// [ConnectionInterface] so the trait stays object-safe for callers that
/// only drive an existing connection.
#[async_trait]
pub trait ConnectionCreation: Sized {
    /// Build a connection, wiring `callback` and opening the reserved
    /// channels of `config`.
    async fn new_connection(config: RtcConfig, callback: BoxedTransportCallback) -> Result<Self>;
}
