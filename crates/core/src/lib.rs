#![warn(missing_docs)]
//! Peer-to-peer matchmaking and authenticated signaling.
//!
//! Switchboard lets endpoints with no server of their own find each
//! other through untrusted rendezvous services and establish WebRTC
//! sessions whose identity is bound to a long-lived Ed25519 key, not to
//! any rendezvous. The [switchboard::Switchboard] supervisor fans out
//! over trackers and direct relays, dedupes sightings, and only
//! surfaces peers that passed the signed, SDP-bound intro exchange.
//!
//! ```no_run
//! use switchboard_core::switchboard::SwitchboardBuilder;
//! use switchboard_core::switchboard::SwitchboardEventKind;
//!
//! # async fn run() -> switchboard_core::error::Result<()> {
//! let board = SwitchboardBuilder::new("my-app", "lobby-42").build();
//! board.events().on(SwitchboardEventKind::Peer, |event| {
//!     // an authenticated peer, ready to talk to
//!     let _ = event;
//! });
//! board.swarm("lobby-42", None).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod bus;
pub mod consts;
pub mod ecc;
pub mod error;
pub mod rendezvous;
pub mod session;
pub mod switchboard;

#[cfg(all(test, feature = "dummy"))]
mod tests;
