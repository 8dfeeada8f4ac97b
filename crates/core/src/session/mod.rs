//! One authenticated WebRTC session.
//!
//! A [PeerSession] wraps a single transport connection and owns its whole
//! lifecycle: the initial offer/answer handshake relayed through a
//! rendezvous, the reserved channels, in-band renegotiation over the
//! `_meta` control channel (no rendezvous needed once the session is up),
//! and teardown. Two channels are pre-negotiated at fixed ids so no
//! signaling round-trip is needed to open them: `_meta` (id 0) for
//! renegotiation and `default` (id 1) for the application.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use switchboard_transport::core::callback::CallbackError;
use switchboard_transport::core::callback::TransportCallback;
use switchboard_transport::core::transport::ConnectionCreation;
use switchboard_transport::core::transport::ConnectionInterface;
use switchboard_transport::core::transport::DataChannelInit;
use switchboard_transport::core::transport::IceCandidate;
use switchboard_transport::core::transport::RtcConfig;
use switchboard_transport::core::transport::SdpKind;
use switchboard_transport::core::transport::SessionDescription;
use switchboard_transport::core::transport::SignalingState;
use switchboard_transport::core::transport::WebrtcConnectionState;

#[cfg(feature = "dummy")]
pub use switchboard_transport::connections::DummyConnection as ConnectionOwner;
pub use switchboard_transport::connections::MediaTrack;
#[cfg(not(feature = "dummy"))]
pub use switchboard_transport::connections::WebrtcConnection as ConnectionOwner;

use crate::bus::Emittable;
use crate::bus::Subscribable;
use crate::consts::DEFAULT_CHANNEL;
use crate::consts::DEFAULT_CHANNEL_ID;
use crate::consts::DEFAULT_TRICKLE_TIMEOUT_MS;
use crate::consts::META_CHANNEL;
use crate::consts::META_CHANNEL_ID;
use crate::error::Error;
use crate::error::Result;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no handshake yet.
    New,
    /// Local offer being prepared.
    Offering,
    /// Remote offer received, answer being prepared.
    Answering,
    /// Waiting for ICE gathering before emitting the local description.
    IceGathering,
    /// Signaling settled, control channel open.
    SignalStable,
    /// Signed intro exchange in progress.
    Authenticating,
    /// Authenticated and surfaced to the caller.
    Open,
    /// Terminal.
    Closed,
}

/// Events surfaced by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A signaling payload to relay to the remote side out-of-band.
    Handshake(String),
    /// First stabilization, fired at most once.
    Connect,
    /// Fired on every stabilization: `_meta` opening and after each
    /// successful renegotiation.
    Ready,
    /// Raw bytes received on the application channel.
    Message(Bytes),
    /// Application channel payload that parsed as JSON.
    Data(serde_json::Value),
    /// Activity on an additional data channel. `data` is `None` when the
    /// channel just opened.
    DataChannel {
        /// Channel label.
        label: String,
        /// Message bytes, absent on open.
        data: Option<Bytes>,
    },
    /// A remote media stream arrived.
    Stream(String),
    /// A local ICE candidate was gathered (`None` = gathering finished).
    IceEvent(Option<IceCandidate>),
    /// ICE gathering reported completion.
    IceFinished,
    /// A fatal session error.
    Error(String),
    /// Fired exactly once when the session closes.
    Close,
    /// Fired in addition to `Close` when closure was not intentional.
    Disconnect,
}

/// Discriminants of [SessionEvent].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SessionEventKind {
    Handshake,
    Connect,
    Ready,
    Message,
    Data,
    DataChannel,
    Stream,
    IceEvent,
    IceFinished,
    Error,
    Close,
    Disconnect,
}

impl Emittable for SessionEvent {
    type Kind = SessionEventKind;

    fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Handshake(_) => SessionEventKind::Handshake,
            SessionEvent::Connect => SessionEventKind::Connect,
            SessionEvent::Ready => SessionEventKind::Ready,
            SessionEvent::Message(_) => SessionEventKind::Message,
            SessionEvent::Data(_) => SessionEventKind::Data,
            SessionEvent::DataChannel { .. } => SessionEventKind::DataChannel,
            SessionEvent::Stream(_) => SessionEventKind::Stream,
            SessionEvent::IceEvent(_) => SessionEventKind::IceEvent,
            SessionEvent::IceFinished => SessionEventKind::IceFinished,
            SessionEvent::Error(_) => SessionEventKind::Error,
            SessionEvent::Close => SessionEventKind::Close,
            SessionEvent::Disconnect => SessionEventKind::Disconnect,
        }
    }
}

/// Construction options for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `;`-separated STUN/TURN urls.
    pub ice_servers: String,
    /// 1:1 NAT external address.
    pub external_address: Option<String>,
    /// Whether this side opened the connection. Decides glare resolution.
    pub initiator: bool,
    /// Stream candidates as they are gathered instead of waiting for the
    /// final one. The supervisor requires non-trickle sessions.
    pub trickle_ice: bool,
    /// Gathering wait bound in non-trickle mode.
    pub trickle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: "stun://stun.l.google.com:19302".to_string(),
            external_address: None,
            initiator: false,
            trickle_ice: false,
            trickle_timeout: Duration::from_millis(DEFAULT_TRICKLE_TIMEOUT_MS),
        }
    }
}

struct SessionShared {
    config: SessionConfig,
    conn: OnceLock<ConnectionOwner>,
    events: Subscribable<SessionEvent>,
    state: Mutex<SessionState>,
    peer_id: Mutex<Option<String>>,
    verified_full_id: Mutex<Option<String>>,
    pending_candidates: Mutex<Vec<IceCandidate>>,
    send_queues: Mutex<HashMap<String, VecDeque<Bytes>>>,
    /// Application-channel messages received before the session is Open,
    /// kept so the signed intro survives arriving ahead of its consumer.
    inbound_buffer: Mutex<VecDeque<Bytes>>,
    inbound_notify: tokio::sync::Notify,
    connected_once: AtomicBool,
    closed: AtomicBool,
    timers: Mutex<Vec<tokio::task::AbortHandle>>,
}

/// Pre-open inbound messages kept at most.
const INBOUND_BUFFER_CAP: usize = 16;

/// A single WebRTC session with in-band renegotiation. Cheap to clone.
#[derive(Clone)]
pub struct PeerSession {
    shared: Arc<SessionShared>,
}

impl PeerSession {
    /// Create a session and its underlying connection with the reserved
    /// channels pre-negotiated.
    pub async fn new(config: SessionConfig) -> Result<Self> {
        let shared = Arc::new(SessionShared {
            config: config.clone(),
            conn: OnceLock::new(),
            events: Subscribable::new(),
            state: Mutex::new(SessionState::New),
            peer_id: Mutex::new(None),
            verified_full_id: Mutex::new(None),
            pending_candidates: Mutex::new(Vec::new()),
            send_queues: Mutex::new(HashMap::new()),
            inbound_buffer: Mutex::new(VecDeque::new()),
            inbound_notify: tokio::sync::Notify::new(),
            connected_once: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            timers: Mutex::new(Vec::new()),
        });

        let handler = SessionRtcHandler {
            shared: Arc::downgrade(&shared),
        };
        let rtc_config = RtcConfig {
            ice_servers: config.ice_servers,
            external_address: config.external_address,
            reserved_channels: vec![
                (META_CHANNEL.to_string(), META_CHANNEL_ID),
                (DEFAULT_CHANNEL.to_string(), DEFAULT_CHANNEL_ID),
            ],
        };
        let conn = ConnectionOwner::new_connection(rtc_config, Box::new(handler)).await?;
        shared
            .conn
            .set(conn)
            .unwrap_or_else(|_| unreachable!("connection installed once"));

        Ok(Self { shared })
    }

    /// The event bus of this session.
    pub fn events(&self) -> &Subscribable<SessionEvent> {
        &self.shared.events
    }

    /// Whether two handles refer to the same session.
    pub fn same(&self, other: &PeerSession) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    /// Whether the session reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether this side opened the initial connection.
    pub fn is_initiator(&self) -> bool {
        self.shared.config.initiator
    }

    /// The id the rendezvous advertised for the remote peer, if known.
    pub fn peer_id(&self) -> Option<String> {
        self.shared.peer_id.lock().unwrap().clone()
    }

    /// Record the advertised remote id.
    pub fn set_peer_id(&self, id: &str) {
        *self.shared.peer_id.lock().unwrap() = Some(id.to_string());
    }

    /// The cryptographically verified full id, present after
    /// authentication.
    pub fn verified_full_id(&self) -> Option<String> {
        self.shared.verified_full_id.lock().unwrap().clone()
    }

    /// Record a verified identity and open the session for the caller.
    pub fn set_verified_full_id(&self, full_id: &str) {
        *self.shared.verified_full_id.lock().unwrap() = Some(full_id.to_string());
        self.set_state(SessionState::Open);
    }

    /// Mark the session as undergoing the signed intro exchange.
    pub fn begin_authentication(&self) {
        self.set_state(SessionState::Authenticating);
    }

    /// Await the next application-channel message from the pre-open
    /// buffer. Returns `None` once the session closes. Used by the
    /// supervisor to consume the peer's signed intro without racing its
    /// arrival.
    pub(crate) async fn next_inbound(&self) -> Option<Bytes> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(bytes) = self.shared.inbound_buffer.lock().unwrap().pop_front() {
                return Some(bytes);
            }
            self.shared.inbound_notify.notified().await;
        }
    }

    /// The local SDP text, once a local description exists.
    pub async fn local_sdp(&self) -> Option<String> {
        let conn = self.shared.conn.get()?;
        conn.local_description().await.map(|d| d.sdp)
    }

    /// The remote SDP text, once a remote description exists.
    pub async fn remote_sdp(&self) -> Option<String> {
        let conn = self.shared.conn.get()?;
        conn.remote_description().await.map(|d| d.sdp)
    }

    /// Register a timer owned by this session; it is aborted on close.
    pub fn register_timer(&self, handle: tokio::task::AbortHandle) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        self.shared.timers.lock().unwrap().push(handle);
    }

    /// Access the underlying dummy connection, for tests.
    #[cfg(feature = "dummy")]
    pub fn connection(&self) -> &ConnectionOwner {
        self.shared.conn.get().expect("connection installed at new")
    }

    fn conn(&self) -> Result<&ConnectionOwner> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.shared
            .conn
            .get()
            .ok_or_else(|| Error::PeerFatal("connection not initialized".into()))
    }

    fn set_state(&self, state: SessionState) {
        *self.shared.state.lock().unwrap() = state;
    }

    fn emit(&self, event: SessionEvent) {
        self.shared.events.emit(&event);
    }

    /// Drive the signaling handshake.
    ///
    /// With no payload, the session becomes the initiator: it generates an
    /// offer, waits for ICE per the gathering policy and emits (and
    /// returns) the serialized local description as a `handshake` event.
    /// With a payload, it applies the remote description or candidate and,
    /// for an offer, produces the answer the same way.
    pub async fn handshake(&self, payload: Option<&str>) -> Result<Option<String>> {
        if self.is_closed() {
            return Ok(None);
        }
        match payload {
            None => {
                {
                    let mut state = self.shared.state.lock().unwrap();
                    if *state != SessionState::New {
                        return Err(Error::HandshakeAlreadyStarted);
                    }
                    *state = SessionState::Offering;
                }
                let conn = self.conn()?;
                conn.create_offer().await?;
                let payload = self.local_description_payload().await?;
                self.emit(SessionEvent::Handshake(payload.clone()));
                Ok(Some(payload))
            }
            Some(payload) => self.handle_remote_payload(payload).await,
        }
    }

    async fn handle_remote_payload(&self, payload: &str) -> Result<Option<String>> {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                self.fatal_error(&format!("unparseable handshake payload: {e}"))
                    .await;
                return Err(Error::Deserialize(e));
            }
        };

        if value.get("sdp").is_some() {
            let desc: SessionDescription =
                serde_json::from_value(value).map_err(Error::Deserialize)?;
            let is_offer = desc.kind == SdpKind::Offer;

            let conn = self.conn()?;
            conn.set_remote_description(desc).await?;
            self.drain_pending_candidates().await?;

            if is_offer {
                self.set_state(SessionState::Answering);
                let conn = self.conn()?;
                conn.create_answer().await?;
                let payload = self.local_description_payload().await?;
                self.emit(SessionEvent::Handshake(payload.clone()));
                return Ok(Some(payload));
            }
            return Ok(None);
        }

        if let Some(candidate) = value.get("candidate") {
            let candidate: IceCandidate =
                serde_json::from_value(candidate.clone()).map_err(Error::Deserialize)?;
            let conn = self.conn()?;
            if conn.remote_description().await.is_some() {
                conn.add_ice_candidate(candidate).await?;
            } else {
                self.shared.pending_candidates.lock().unwrap().push(candidate);
            }
            return Ok(None);
        }

        self.fatal_error("handshake payload carries neither SDP nor candidate")
            .await;
        Err(Error::MalformedHandshakePayload)
    }

    async fn drain_pending_candidates(&self) -> Result<()> {
        let pending: Vec<IceCandidate> =
            self.shared.pending_candidates.lock().unwrap().drain(..).collect();
        if pending.is_empty() {
            return Ok(());
        }
        let conn = self.conn()?;
        for candidate in pending {
            conn.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Wait out the gathering policy, then serialize the local
    /// description. In non-trickle mode the wait races gathering
    /// completion against the trickle timeout; on timeout the description
    /// is used as-is, most rendezvous relays cannot forward late
    /// candidates anyway.
    async fn local_description_payload(&self) -> Result<String> {
        let conn = self.conn()?;
        if !self.shared.config.trickle_ice {
            self.set_state(SessionState::IceGathering);
            conn.wait_ice_gathering_complete(self.shared.config.trickle_timeout)
                .await;
        }
        let desc = conn
            .local_description()
            .await
            .ok_or_else(|| Error::PeerFatal("no local description after gathering".into()))?;
        serde_json::to_string(&desc).map_err(Error::Serialize)
    }

    /// Send bytes on a channel, queueing while the channel is not open
    /// yet. Queued items flush in insertion order on the channel's open.
    pub async fn send(&self, data: impl Into<Bytes>, channel: Option<&str>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let label = channel.unwrap_or(DEFAULT_CHANNEL);
        let data = data.into();

        let conn = self.conn()?;
        if conn.channel_ready(label) {
            conn.send_on_channel(label, data).await?;
            return Ok(());
        }

        self.shared
            .send_queues
            .lock()
            .unwrap()
            .entry(label.to_string())
            .or_default()
            .push_back(data);

        // The channel may have opened while we were enqueueing.
        if conn.channel_ready(label) {
            self.flush_channel(label).await;
        }
        Ok(())
    }

    async fn flush_channel(&self, label: &str) {
        loop {
            let next = {
                let mut queues = self.shared.send_queues.lock().unwrap();
                match queues.get_mut(label) {
                    Some(queue) => queue.pop_front(),
                    None => None,
                }
            };
            let Some(data) = next else { break };
            let Ok(conn) = self.conn() else { break };
            if let Err(e) = conn.send_on_channel(label, data).await {
                tracing::warn!("flush on {label} failed: {e}");
                break;
            }
        }
    }

    /// Attach an outbound media track. The resulting renegotiation runs
    /// in-band over `_meta` and never touches the rendezvous.
    pub async fn add_media(&self, track: MediaTrack) -> Result<()> {
        let conn = self.conn()?;
        conn.add_media_track(track).await?;
        Ok(())
    }

    /// Open an additional data channel.
    pub async fn add_data_channel(&self, label: &str, init: DataChannelInit) -> Result<()> {
        if label == META_CHANNEL || label == DEFAULT_CHANNEL {
            return Err(Error::ReservedChannel(label.to_string()));
        }
        let conn = self.conn()?;
        conn.open_channel(label, init).await?;
        Ok(())
    }

    /// Close an additional data channel.
    pub async fn remove_data_channel(&self, label: &str) -> Result<()> {
        if label == META_CHANNEL || label == DEFAULT_CHANNEL {
            return Err(Error::ReservedChannel(label.to_string()));
        }
        let conn = self.conn()?;
        conn.close_channel(label).await?;
        Ok(())
    }

    /// Close the session. `close` is emitted exactly once; `disconnect`
    /// additionally fires when the closure was not intentional. Closing a
    /// closed session is a no-op.
    pub async fn close(&self, intentional: bool) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Closed);

        for timer in self.shared.timers.lock().unwrap().drain(..) {
            timer.abort();
        }

        if let Some(conn) = self.shared.conn.get() {
            if let Err(e) = conn.close().await {
                tracing::debug!("closing transport connection: {e}");
            }
        }

        self.emit(SessionEvent::Close);
        if !intentional {
            self.emit(SessionEvent::Disconnect);
        }
        self.shared.events.remove_all_listeners(None);
        self.shared.inbound_notify.notify_one();
    }

    /// Record a fatal error and tear the session down.
    pub async fn fatal_error(&self, reason: &str) {
        if self.is_closed() {
            return;
        }
        tracing::warn!("session fatal: {reason}");
        self.emit(SessionEvent::Error(reason.to_string()));
        self.close(false).await;
    }

    /// Kick off an in-band renegotiation: create an offer and push it to
    /// the remote side over `_meta`.
    pub(crate) async fn start_renegotiation(&self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.channel_ready(META_CHANNEL) {
            // Initial negotiation is driven by handshake(), not in-band.
            return Ok(());
        }
        let offer = conn.create_offer().await?;
        self.send_meta_description(&offer).await
    }

    async fn send_meta_description(&self, desc: &SessionDescription) -> Result<()> {
        let conn = self.conn()?;
        let message = serde_json::to_string(&serde_json::json!({ "description": desc }))
            .map_err(Error::Serialize)?;
        conn.send_on_channel(META_CHANNEL, Bytes::from(message))
            .await?;
        Ok(())
    }

    async fn handle_meta_message(&self, data: &[u8]) {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_slice(data);
        let description = parsed
            .ok()
            .and_then(|v| v.get("description").cloned())
            .and_then(|d| serde_json::from_value::<SessionDescription>(d).ok());

        let Some(desc) = description else {
            self.fatal_error("malformed in-band control payload").await;
            return;
        };

        let Ok(conn) = self.conn() else { return };
        let is_offer = desc.kind == SdpKind::Offer;

        if is_offer && conn.signaling_state() != SignalingState::Stable {
            // Glare: both sides offered at once. The initiator ignores the
            // collision and lets its own offer win; the non-initiator rolls
            // back and takes the remote offer.
            if self.shared.config.initiator {
                tracing::debug!("renegotiation glare, keeping local offer");
                return;
            }
            if let Err(e) = conn.rollback().await {
                self.fatal_error(&format!("rollback failed: {e}")).await;
                return;
            }
        }

        if let Err(e) = conn.set_remote_description(desc).await {
            self.fatal_error(&format!("renegotiation remote description: {e}"))
                .await;
            return;
        }

        if is_offer {
            let answer = match conn.create_answer().await {
                Ok(answer) => answer,
                Err(e) => {
                    self.fatal_error(&format!("renegotiation answer: {e}")).await;
                    return;
                }
            };
            if let Err(e) = self.send_meta_description(&answer).await {
                self.fatal_error(&format!("renegotiation answer send: {e}"))
                    .await;
                return;
            }
        }

        let Ok(conn) = self.conn() else { return };
        if conn.signaling_state() == SignalingState::Stable {
            self.emit(SessionEvent::Ready);
        }
    }

    async fn handle_channel_open(&self, label: &str) {
        self.flush_channel(label).await;

        if label == META_CHANNEL {
            self.set_state(SessionState::SignalStable);
            self.emit(SessionEvent::Ready);
            if !self.shared.connected_once.swap(true, Ordering::SeqCst) {
                self.emit(SessionEvent::Connect);
            }
        } else if label != DEFAULT_CHANNEL {
            self.emit(SessionEvent::DataChannel {
                label: label.to_string(),
                data: None,
            });
        }
    }

    async fn handle_channel_close(&self, label: &str) {
        if label == META_CHANNEL && !self.is_closed() {
            self.fatal_error("control channel closed").await;
        }
    }

    async fn handle_channel_message(&self, label: &str, data: &[u8]) {
        match label {
            META_CHANNEL => self.handle_meta_message(data).await,
            DEFAULT_CHANNEL => {
                let bytes = Bytes::copy_from_slice(data);
                if self.state() != SessionState::Open {
                    let mut buffer = self.shared.inbound_buffer.lock().unwrap();
                    if buffer.len() >= INBOUND_BUFFER_CAP {
                        buffer.pop_front();
                    }
                    buffer.push_back(bytes.clone());
                    drop(buffer);
                    self.shared.inbound_notify.notify_one();
                }
                self.emit(SessionEvent::Message(bytes));
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
                    self.emit(SessionEvent::Data(value));
                }
            }
            other => {
                self.emit(SessionEvent::DataChannel {
                    label: other.to_string(),
                    data: Some(Bytes::copy_from_slice(data)),
                });
            }
        }
    }

    async fn handle_ice_candidate(&self, candidate: Option<IceCandidate>) {
        self.emit(SessionEvent::IceEvent(candidate.clone()));
        match candidate {
            None => self.emit(SessionEvent::IceFinished),
            Some(candidate) if self.shared.config.trickle_ice => {
                match serde_json::to_string(&serde_json::json!({ "candidate": candidate })) {
                    Ok(payload) => self.emit(SessionEvent::Handshake(payload)),
                    Err(e) => tracing::warn!("serializing trickle candidate: {e}"),
                }
            }
            Some(_) => {}
        }
    }

    async fn handle_connection_state(&self, state: WebrtcConnectionState) {
        match state {
            WebrtcConnectionState::Failed => {
                self.fatal_error("transport failed").await;
            }
            WebrtcConnectionState::Disconnected | WebrtcConnectionState::Closed => {
                if !self.is_closed() {
                    self.close(false).await;
                }
            }
            _ => {}
        }
    }
}

struct SessionRtcHandler {
    shared: Weak<SessionShared>,
}

impl SessionRtcHandler {
    fn session(&self) -> Option<PeerSession> {
        self.shared.upgrade().map(|shared| PeerSession { shared })
    }
}

#[async_trait]
impl TransportCallback for SessionRtcHandler {
    async fn on_channel_open(&self, label: &str) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.handle_channel_open(label).await;
        }
        Ok(())
    }

    async fn on_channel_close(&self, label: &str) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.handle_channel_close(label).await;
        }
        Ok(())
    }

    async fn on_channel_message(
        &self,
        label: &str,
        data: &[u8],
    ) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.handle_channel_message(label, data).await;
        }
        Ok(())
    }

    async fn on_channel_error(
        &self,
        label: &str,
        reason: &str,
    ) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session
                .fatal_error(&format!("channel {label} error: {reason}"))
                .await;
        }
        Ok(())
    }

    async fn on_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.handle_ice_candidate(candidate).await;
        }
        Ok(())
    }

    async fn on_negotiation_needed(&self) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            if let Err(e) = session.start_renegotiation().await {
                tracing::warn!("renegotiation offer failed: {e}");
            }
        }
        Ok(())
    }

    async fn on_track(&self, stream_id: &str) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.emit(SessionEvent::Stream(stream_id.to_string()));
        }
        Ok(())
    }

    async fn on_connection_state_change(
        &self,
        state: WebrtcConnectionState,
    ) -> std::result::Result<(), CallbackError> {
        if let Some(session) = self.session() {
            session.handle_connection_state(state).await;
        }
        Ok(())
    }
}
