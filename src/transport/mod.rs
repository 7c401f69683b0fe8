//! TCP transport for the relay
//!
//! This module handles:
//! - Binding the listening socket and running the accept loop
//! - Recovering from failed accepts, bounded by the retry limit
//! - Line-oriented reads and writes on an accepted connection

mod acceptor;
mod connection;

pub use acceptor::{bind, AcceptSource, Acceptor, TcpAcceptSource};
pub(crate) use acceptor::flag_raised;
pub use connection::ClientConnection;
