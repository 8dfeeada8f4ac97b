#![warn(missing_docs)]
//! The UA seam of switchboard.
//!
//! Everything the matchmaking engine needs from a WebRTC stack is expressed
//! by [core::transport::ConnectionInterface]. Two implementations are
//! provided: [connections::WebrtcConnection] on top of the `webrtc` crate
//! for native environments, and [connections::DummyConnection], an
//! in-process pair simulation used by the test suites of downstream crates.

pub mod callback;
pub mod connections;
pub mod core;
pub mod error;
pub mod ice_server;
