//! This module contains the [InnerTransportCallback] struct.

use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::IceCandidate;
use crate::core::transport::WebrtcConnectionState;

/// [InnerTransportCallback] wraps the [BoxedTransportCallback] so that
/// connection implementations can fire events without caring about
/// errors raised by the consumer. Failures are logged and swallowed.
pub struct InnerTransportCallback {
    callback: BoxedTransportCallback,
}

impl InnerTransportCallback {
    /// Create a new [InnerTransportCallback].
    pub fn new(callback: BoxedTransportCallback) -> Self {
        Self { callback }
    }

    /// Notify that a data channel is open.
    pub async fn on_channel_open(&self, label: &str) {
        if let Err(e) = self.callback.on_channel_open(label).await {
            tracing::error!("Callback on_channel_open failed: {e:?}");
        }
    }

    /// Notify that a data channel is closed.
    pub async fn on_channel_close(&self, label: &str) {
        if let Err(e) = self.callback.on_channel_close(label).await {
            tracing::error!("Callback on_channel_close failed: {e:?}");
        }
    }

    /// This method is invoked on message arrival over a data channel.
    pub async fn on_channel_message(&self, label: &str, data: &[u8]) {
        if let Err(e) = self.callback.on_channel_message(label, data).await {
            tracing::error!("Callback on_channel_message failed: {e:?}");
        }
    }

    /// This method is invoked when the UA reports a data channel error.
    pub async fn on_channel_error(&self, label: &str, reason: &str) {
        if let Err(e) = self.callback.on_channel_error(label, reason).await {
            tracing::error!("Callback on_channel_error failed: {e:?}");
        }
    }

    /// This method is invoked for each gathered local ICE candidate.
    pub async fn on_ice_candidate(&self, candidate: Option<IceCandidate>) {
        if let Err(e) = self.callback.on_ice_candidate(candidate).await {
            tracing::error!("Callback on_ice_candidate failed: {e:?}");
        }
    }

    /// This method is invoked when the connection requests renegotiation.
    pub async fn on_negotiation_needed(&self) {
        if let Err(e) = self.callback.on_negotiation_needed().await {
            tracing::error!("Callback on_negotiation_needed failed: {e:?}");
        }
    }

    /// This method is invoked when a remote media track arrives.
    pub async fn on_track(&self, stream_id: &str) {
        if let Err(e) = self.callback.on_track(stream_id).await {
            tracing::error!("Callback on_track failed: {e:?}");
        }
    }

    /// This method is invoked when the state of the connection has changed.
    pub async fn on_connection_state_change(&self, state: WebrtcConnectionState) {
        if let Err(e) = self.callback.on_connection_state_change(state).await {
            tracing::error!("Callback on_connection_state_change failed: {e:?}");
        }
    }
}
