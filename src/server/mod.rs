//! Relay server lifecycle
//!
//! This module handles:
//! - Starting the listener on a background task
//! - Stopping it and moving it to a new port
//! - The registration surface used by the adapter layer

mod lifecycle;

pub use lifecycle::RelayServer;
