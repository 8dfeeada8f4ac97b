//! Callback interface invoked by connection implementations.

use async_trait::async_trait;

use crate::core::transport::IceCandidate;
use crate::core::transport::WebrtcConnectionState;

/// Error type of callback methods. Failures are logged by the caller and
/// never propagate into the connection.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed trait object passed to a connection at construction.
pub type BoxedTransportCallback = Box<dyn TransportCallback + Send + Sync>;

/// Any object that implements this trait can observe a connection. All
/// methods default to no-ops so implementors only write what they need.
#[async_trait]
pub trait TransportCallback {
    /// A data channel reached the open state.
    async fn on_channel_open(&self, _label: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A data channel closed.
    async fn on_channel_close(&self, _label: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A message arrived on a data channel.
    async fn on_channel_message(&self, _label: &str, _data: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The UA reported an error on a data channel.
    async fn on_channel_error(&self, _label: &str, _reason: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A local ICE candidate was gathered; `None` marks end of gathering.
    async fn on_ice_candidate(
        &self,
        _candidate: Option<IceCandidate>,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The connection wants a new offer/answer exchange.
    async fn on_negotiation_needed(&self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A remote media track arrived, identified by its stream id.
    async fn on_track(&self, _stream_id: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The aggregate connection state changed.
    async fn on_connection_state_change(
        &self,
        _state: WebrtcConnectionState,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}
