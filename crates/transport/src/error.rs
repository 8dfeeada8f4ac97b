#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "native-webrtc")]
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::error::Error),

    #[error("IceServer error: {0}")]
    IceServer(#[from] IceServerError),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("WebRTC local SDP generation error: {0}")]
    LocalSdpGeneration(String),

    #[error("No remote description has been applied yet")]
    NoRemoteDescription,

    #[error("Data channel {0} not found")]
    ChannelNotFound(String),

    #[error("Data channel {0} is not open")]
    ChannelNotOpen(String),

    #[error("Send on data channel {0} failed: {1}")]
    ChannelSend(String, String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[cfg(feature = "dummy")]
    #[error("Dummy connection {0} is not paired")]
    DummyNotPaired(String),
}

#[derive(thiserror::Error, Debug)]
pub enum IceServerError {
    #[error("Url parse error")]
    UrlParse(#[from] url::ParseError),

    #[error("Ice server scheme {0} has not supported yet")]
    SchemeNotSupported(String),

    #[error("Cannot extract host from url")]
    UrlMissHost,
}
