//! Core traits and wire-shaped types shared by every connection
//! implementation.

/// Callback interface invoked by connections.
pub mod callback;
/// The [transport::ConnectionInterface] trait and its companion types.
pub mod transport;
