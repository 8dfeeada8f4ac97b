use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

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
use crate::ice_server::IceCredentialType;
use crate::ice_server::IceServer;

/// Outbound media track handle for the native implementation.
pub type MediaTrack = Arc<dyn webrtc::track::track_local::TrackLocal + Send + Sync>;

/// A connection implemented by the webrtc-rs library.
/// Used for native environments.
pub struct WebrtcConnection {
    webrtc_conn: Arc<RTCPeerConnection>,
    channels: Arc<DashMap<String, Arc<RTCDataChannel>>>,
    callback: Arc<InnerTransportCallback>,
}

impl WebrtcConnection {
    fn wire_channel(
        channels: &Arc<DashMap<String, Arc<RTCDataChannel>>>,
        callback: &Arc<InnerTransportCallback>,
        channel: Arc<RTCDataChannel>,
    ) {
        let label = channel.label().to_string();
        channels.insert(label.clone(), channel.clone());

        let open_cb = callback.clone();
        let open_label = label.clone();
        channel.on_open(Box::new(move || {
            let cb = open_cb.clone();
            let label = open_label.clone();
            Box::pin(async move {
                cb.on_channel_open(&label).await;
            })
        }));

        let close_cb = callback.clone();
        let close_label = label.clone();
        channel.on_close(Box::new(move || {
            let cb = close_cb.clone();
            let label = close_label.clone();
            Box::pin(async move {
                cb.on_channel_close(&label).await;
            })
        }));

        let message_cb = callback.clone();
        let message_label = label.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let cb = message_cb.clone();
            let label = message_label.clone();
            Box::pin(async move {
                cb.on_channel_message(&label, &msg.data).await;
            })
        }));

        let error_cb = callback.clone();
        channel.on_error(Box::new(move |e: webrtc::Error| {
            let cb = error_cb.clone();
            let label = label.clone();
            Box::pin(async move {
                cb.on_channel_error(&label, &e.to_string()).await;
            })
        }));
    }

    fn convert_description(desc: RTCSessionDescription) -> SessionDescription {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            RTCSdpType::Rollback => SdpKind::Rollback,
            _ => SdpKind::Answer,
        };
        SessionDescription {
            kind,
            sdp: desc.sdp,
        }
    }

    fn unconvert_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
        match desc.kind {
            SdpKind::Offer => Ok(RTCSessionDescription::offer(desc.sdp)?),
            SdpKind::Pranswer => Ok(RTCSessionDescription::pranswer(desc.sdp)?),
            SdpKind::Answer => Ok(RTCSessionDescription::answer(desc.sdp)?),
            // There is no public constructor for rollback. The struct
            // round-trips through its serde shape instead.
            SdpKind::Rollback => Ok(serde_json::from_value(serde_json::json!({
                "type": "rollback",
                "sdp": "",
            }))?),
        }
    }
}

#[async_trait]
impl ConnectionCreation for WebrtcConnection {
    async fn new_connection(config: RtcConfig, callback: BoxedTransportCallback) -> Result<Self> {
        let ice_servers = IceServer::vec_from_str(&config.ice_servers)?
            .into_iter()
            .map(|x| x.into())
            .collect();

        let webrtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let mut setting = webrtc::api::setting_engine::SettingEngine::default();
        if let Some(ref addr) = config.external_address {
            tracing::debug!("setting external ip {:?}", addr);
            setting.set_nat_1to1_ips(vec![addr.to_string()], RTCIceCandidateType::Host);
        }
        setting.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let webrtc_api = webrtc::api::APIBuilder::new()
            .with_setting_engine(setting)
            .build();

        let webrtc_conn = Arc::new(webrtc_api.new_peer_connection(webrtc_config).await?);

        let callback = Arc::new(InnerTransportCallback::new(callback));
        let channels: Arc<DashMap<String, Arc<RTCDataChannel>>> = Arc::new(DashMap::new());

        let data_channel_cb = callback.clone();
        let data_channel_map = channels.clone();
        webrtc_conn.on_data_channel(Box::new(move |d: Arc<RTCDataChannel>| {
            tracing::debug!("New DataChannel {} {:?}", d.label(), d.id());
            Self::wire_channel(&data_channel_map, &data_channel_cb, d);
            Box::pin(async move {})
        }));

        let ice_cb = callback.clone();
        webrtc_conn.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let cb = ice_cb.clone();
            Box::pin(async move {
                let candidate = c.and_then(|c| match c.to_json() {
                    Ok(init) => serde_json::to_value(init)
                        .and_then(serde_json::from_value::<IceCandidate>)
                        .ok(),
                    Err(e) => {
                        tracing::warn!("Failed to serialize ICE candidate: {e:?}");
                        None
                    }
                });
                cb.on_ice_candidate(candidate).await;
            })
        }));

        let negotiation_cb = callback.clone();
        webrtc_conn.on_negotiation_needed(Box::new(move || {
            let cb = negotiation_cb.clone();
            Box::pin(async move {
                cb.on_negotiation_needed().await;
            })
        }));

        let track_cb = callback.clone();
        webrtc_conn.on_track(Box::new(move |track, _receiver, _transceiver| {
            let cb = track_cb.clone();
            let stream_id = track.stream_id();
            Box::pin(async move {
                cb.on_track(&stream_id).await;
            })
        }));

        let state_cb = callback.clone();
        webrtc_conn.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("Peer Connection State has changed: {s:?}");
            let cb = state_cb.clone();
            Box::pin(async move {
                cb.on_connection_state_change(s.into()).await;
            })
        }));

        for (label, id) in &config.reserved_channels {
            let init = RTCDataChannelInit {
                negotiated: Some(*id),
                ordered: Some(true),
                ..Default::default()
            };
            let channel = webrtc_conn.create_data_channel(label, Some(init)).await?;
            Self::wire_channel(&channels, &callback, channel);
        }

        Ok(Self {
            webrtc_conn,
            channels,
            callback,
        })
    }
}

#[async_trait]
impl ConnectionInterface for WebrtcConnection {
    type Error = Error;

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.webrtc_conn.create_offer(None).await?;
        self.webrtc_conn.set_local_description(offer.clone()).await?;
        Ok(Self::convert_description(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.webrtc_conn.create_answer(None).await?;
        self.webrtc_conn
            .set_local_description(answer.clone())
            .await?;
        Ok(Self::convert_description(answer))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::unconvert_description(desc)?;
        self.webrtc_conn.set_remote_description(desc).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let rollback = Self::unconvert_description(SessionDescription {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        })?;
        self.webrtc_conn.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = serde_json::from_value(serde_json::to_value(candidate)?)?;
        self.webrtc_conn.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.webrtc_conn
            .local_description()
            .await
            .map(Self::convert_description)
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.webrtc_conn
            .remote_description()
            .await
            .map(Self::convert_description)
    }

    fn signaling_state(&self) -> SignalingState {
        self.webrtc_conn.signaling_state().into()
    }

    fn connection_state(&self) -> WebrtcConnectionState {
        self.webrtc_conn.connection_state().into()
    }

    async fn wait_ice_gathering_complete(&self, timeout: Duration) -> bool {
        let mut done = self.webrtc_conn.gathering_complete_promise().await;
        tokio::time::timeout(timeout, done.recv()).await.is_ok()
    }

    async fn open_channel(&self, label: &str, init: DataChannelInit) -> Result<()> {
        let init = RTCDataChannelInit {
            negotiated: init.negotiated_id,
            ordered: init.ordered,
            max_retransmits: init.max_retransmits,
            ..Default::default()
        };
        let channel = self
            .webrtc_conn
            .create_data_channel(label, Some(init))
            .await?;
        Self::wire_channel(&self.channels, &self.callback, channel);
        Ok(())
    }

    async fn close_channel(&self, label: &str) -> Result<()> {
        let (_, channel) = self
            .channels
            .remove(label)
            .ok_or_else(|| Error::ChannelNotFound(label.to_string()))?;
        channel.close().await?;
        Ok(())
    }

    fn channel_ready(&self, label: &str) -> bool {
        self.channels
            .get(label)
            .map(|c| c.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    async fn send_on_channel(&self, label: &str, data: Bytes) -> Result<()> {
        let channel = self
            .channels
            .get(label)
            .ok_or_else(|| Error::ChannelNotFound(label.to_string()))?
            .clone();
        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(Error::ChannelNotOpen(label.to_string()));
        }
        channel
            .send(&data)
            .await
            .map_err(|e| Error::ChannelSend(label.to_string(), e.to_string()))?;
        Ok(())
    }

    async fn add_media_track(&self, track: MediaTrack) -> Result<()> {
        self.webrtc_conn.add_track(track).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.webrtc_conn.close().await.map_err(|e| e.into())
    }
}

impl From<IceCredentialType> for RTCIceCredentialType {
    fn from(s: IceCredentialType) -> Self {
        match s {
            IceCredentialType::Password => Self::Password,
            IceCredentialType::Oauth => Self::Oauth,
        }
    }
}

impl From<IceServer> for RTCIceServer {
    fn from(s: IceServer) -> Self {
        Self {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
            credential_type: s.credential_type.into(),
        }
    }
}

impl From<RTCPeerConnectionState> for WebrtcConnectionState {
    fn from(s: RTCPeerConnectionState) -> Self {
        match s {
            RTCPeerConnectionState::Unspecified => Self::Unspecified,
            RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(s: RTCSignalingState) -> Self {
        match s {
            RTCSignalingState::Unspecified => Self::Unspecified,
            RTCSignalingState::Stable => Self::Stable,
            RTCSignalingState::HaveLocalOffer => Self::HaveLocalOffer,
            RTCSignalingState::HaveLocalPranswer => Self::HaveLocalPranswer,
            RTCSignalingState::HaveRemoteOffer => Self::HaveRemoteOffer,
            RTCSignalingState::HaveRemotePranswer => Self::HaveRemotePranswer,
            RTCSignalingState::Closed => Self::Closed,
        }
    }
}
