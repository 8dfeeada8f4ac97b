#![allow(missing_docs)]
//! Error of switchboard_core.

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in switchboard-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Cannot reach or keep rendezvous: {0}")]
    ConnectionFailed(String),

    #[error("Handshake invariant violated: {0}")]
    ClientAuth(String),

    #[error("Peer transport failure: {0}")]
    PeerFatal(String),

    #[error("Rendezvous protocol failure: {0}")]
    ProtocolFailure(String),

    #[error("Switchboard has been killed")]
    Killed,

    #[error("Seed must decode to exactly 32 bytes")]
    InvalidSeedLength,

    #[error("Base58 decode error: {0}")]
    Base58Decode(#[from] bs58::decode::Error),

    #[error("Handshake payload carries neither SDP nor candidate")]
    MalformedHandshakePayload,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Session already has a pending local offer")]
    HandshakeAlreadyStarted,

    #[error("Reserved channel {0} cannot be removed")]
    ReservedChannel(String),

    #[error("JSON serialization error")]
    Serialize(#[source] serde_json::Error),

    #[error("JSON deserialization error")]
    Deserialize(#[source] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] switchboard_transport::error::Error),

    #[error("Tracker list fetch failed: {0}")]
    TrackerListFetch(String),
}
