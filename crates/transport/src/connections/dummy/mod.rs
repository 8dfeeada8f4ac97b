use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lazy_static::lazy_static;
use rand::Rng;

use crate::callback::InnerTransportCallback;
use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::ConnectionCreation;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::DataChannelInit;
use crate::core::transport::IceCandidate;
use crate::core::transport::RtcConfig;
use crate::core::transport::SdpKind;
use crate::core::transport::SessionDescription;
use crate::core::transport::SignalingState;
use crate::core::transport::WebrtcConnectionState;
use crate::error::Error;
use crate::error::Result;

/// Outbound media track handle for the dummy implementation: a bare
/// stream id.
pub type MediaTrack = String;

const SDP_PREFIX: &str = "dummy-sdp:";

lazy_static! {
    static ref CONNS: DashMap<String, Arc<Inner>> = DashMap::new();
}

struct Inner {
    rand_id: String,
    remote_rand_id: Mutex<Option<String>>,
    signaling_state: Mutex<SignalingState>,
    connection_state: Mutex<WebrtcConnectionState>,
    local_desc: Mutex<Option<SessionDescription>>,
    remote_desc: Mutex<Option<SessionDescription>>,
    /// label -> open flag
    channels: DashMap<String, bool>,
    callback: Arc<InnerTransportCallback>,
}

/// A connection for local testing, pairing two instances in-process
/// through a global registry. Implements [ConnectionInterface] with no
/// real network: the "SDP" is the connection's registry key and channel
/// sends are delivered straight to the paired callback.
pub struct DummyConnection {
    inner: Arc<Inner>,
}

impl Inner {
    fn remote(&self) -> Option<Arc<Inner>> {
        let cid = self.remote_rand_id.lock().unwrap().clone()?;
        CONNS.get(&cid).map(|e| e.value().clone())
    }

    async fn set_connection_state(&self, state: WebrtcConnectionState) {
        {
            let mut current = self.connection_state.lock().unwrap();
            if *current == state {
                return;
            }
            *current = state;
        }
        self.callback.on_connection_state_change(state).await;
    }

    async fn open_local_channels(&self) {
        let labels: Vec<String> = self
            .channels
            .iter()
            .filter(|e| !*e.value())
            .map(|e| e.key().clone())
            .collect();
        for label in labels {
            self.channels.insert(label.clone(), true);
            self.callback.on_channel_open(&label).await;
        }
    }
}

impl DummyConnection {
    /// The registry key of this connection, visible in its dummy SDP.
    pub fn rand_id(&self) -> String {
        self.inner.rand_id.clone()
    }

    /// Test hook: ask the owning session for a renegotiation.
    pub async fn trigger_negotiation_needed(&self) {
        self.inner.callback.on_negotiation_needed().await;
    }

    /// Test hook: drive the connection into the failed state.
    pub async fn simulate_failure(&self) {
        self.inner
            .set_connection_state(WebrtcConnectionState::Failed)
            .await;
    }

    fn parse_remote_id(sdp: &str) -> Result<String> {
        sdp.strip_prefix(SDP_PREFIX)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::DummyNotPaired(sdp.to_string()))
    }

    async fn establish(&self) {
        self.inner
            .set_connection_state(WebrtcConnectionState::Connected)
            .await;
        self.inner.open_local_channels().await;

        if let Some(remote) = self.inner.remote() {
            remote
                .set_connection_state(WebrtcConnectionState::Connected)
                .await;
            remote.open_local_channels().await;
        }
    }
}

#[async_trait]
impl ConnectionCreation for DummyConnection {
    async fn new_connection(config: RtcConfig, callback: BoxedTransportCallback) -> Result<Self> {
        let rand_id = rand::thread_rng().gen::<u64>().to_string();

        let inner = Arc::new(Inner {
            rand_id: rand_id.clone(),
            remote_rand_id: Mutex::new(None),
            signaling_state: Mutex::new(SignalingState::Stable),
            connection_state: Mutex::new(WebrtcConnectionState::New),
            local_desc: Mutex::new(None),
            remote_desc: Mutex::new(None),
            channels: DashMap::new(),
            callback: Arc::new(InnerTransportCallback::new(callback)),
        });

        for (label, _id) in &config.reserved_channels {
            inner.channels.insert(label.clone(), false);
        }

        CONNS.insert(rand_id, inner.clone());
        Ok(Self { inner })
    }
}

#[async_trait]
impl ConnectionInterface for DummyConnection {
    type Error = Error;

    async fn create_offer(&self) -> Result<SessionDescription> {
        let desc = SessionDescription::offer(format!("{}{}", SDP_PREFIX, self.inner.rand_id));
        *self.inner.signaling_state.lock().unwrap() = SignalingState::HaveLocalOffer;
        *self.inner.local_desc.lock().unwrap() = Some(desc.clone());
        Ok(desc)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.inner.remote_desc.lock().unwrap().is_none() {
            return Err(Error::NoRemoteDescription);
        }
        let desc = SessionDescription::answer(format!("{}{}", SDP_PREFIX, self.inner.rand_id));
        *self.inner.signaling_state.lock().unwrap() = SignalingState::Stable;
        *self.inner.local_desc.lock().unwrap() = Some(desc.clone());
        Ok(desc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let remote_id = Self::parse_remote_id(&desc.sdp)?;
        *self.inner.remote_rand_id.lock().unwrap() = Some(remote_id);
        *self.inner.remote_desc.lock().unwrap() = Some(desc.clone());

        match desc.kind {
            SdpKind::Offer => {
                *self.inner.signaling_state.lock().unwrap() = SignalingState::HaveRemoteOffer;
                self.inner
                    .set_connection_state(WebrtcConnectionState::Connecting)
                    .await;
            }
            SdpKind::Answer => {
                *self.inner.signaling_state.lock().unwrap() = SignalingState::Stable;
                self.establish().await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        *self.inner.signaling_state.lock().unwrap() = SignalingState::Stable;
        *self.inner.local_desc.lock().unwrap() = None;
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.local_desc.lock().unwrap().clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.remote_desc.lock().unwrap().clone()
    }

    fn signaling_state(&self) -> SignalingState {
        *self.inner.signaling_state.lock().unwrap()
    }

    fn connection_state(&self) -> WebrtcConnectionState {
        *self.inner.connection_state.lock().unwrap()
    }

    async fn wait_ice_gathering_complete(&self, _timeout: Duration) -> bool {
        true
    }

    async fn open_channel(&self, label: &str, _init: DataChannelInit) -> Result<()> {
        let connected = self.connection_state() == WebrtcConnectionState::Connected;
        self.inner.channels.insert(label.to_string(), connected);
        if connected {
            self.inner.callback.on_channel_open(label).await;
            if let Some(remote) = self.inner.remote() {
                remote.channels.insert(label.to_string(), true);
                remote.callback.on_channel_open(label).await;
            }
        }
        Ok(())
    }

    async fn close_channel(&self, label: &str) -> Result<()> {
        self.inner
            .channels
            .remove(label)
            .ok_or_else(|| Error::ChannelNotFound(label.to_string()))?;
        self.inner.callback.on_channel_close(label).await;
        if let Some(remote) = self.inner.remote() {
            if remote.channels.remove(label).is_some() {
                remote.callback.on_channel_close(label).await;
            }
        }
        Ok(())
    }

    fn channel_ready(&self, label: &str) -> bool {
        self.inner
            .channels
            .get(label)
            .map(|open| *open)
            .unwrap_or(false)
    }

    async fn send_on_channel(&self, label: &str, data: Bytes) -> Result<()> {
        if !self.channel_ready(label) {
            return Err(Error::ChannelNotOpen(label.to_string()));
        }
        let remote = self
            .inner
            .remote()
            .ok_or_else(|| Error::DummyNotPaired(self.inner.rand_id.clone()))?;
        remote.callback.on_channel_message(label, &data).await;
        Ok(())
    }

    async fn add_media_track(&self, track: MediaTrack) -> Result<()> {
        if let Some(remote) = self.inner.remote() {
            remote.callback.on_track(&track).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let labels: Vec<String> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        for label in &labels {
            if self.inner.channels.insert(label.clone(), false) == Some(true) {
                self.inner.callback.on_channel_close(label).await;
            }
        }
        self.inner
            .set_connection_state(WebrtcConnectionState::Closed)
            .await;

        // simulate remote observing the closure
        if let Some(remote) = self.inner.remote() {
            if *remote.connection_state.lock().unwrap() != WebrtcConnectionState::Closed {
                for label in labels {
                    if remote.channels.insert(label.clone(), false) == Some(true) {
                        remote.callback.on_channel_close(&label).await;
                    }
                }
                remote
                    .set_connection_state(WebrtcConnectionState::Disconnected)
                    .await;
                remote
                    .set_connection_state(WebrtcConnectionState::Closed)
                    .await;
            }
        }

        CONNS.remove(&self.inner.rand_id);
        Ok(())
    }
}
