#![warn(missing_docs)]
//! Switchboard Peering Server.
//!
//! A self-hostable rendezvous relay speaking the SPS dialect: clients
//! introduce themselves with a self-signed witness, get placed into a
//! channel (swarm, host, or host-target), and exchange opaque signaling
//! payloads as `MSG` packets. The relay never sees anything it could
//! usefully tamper with; identity is verified end-to-end by the clients.

pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod ws;
