//! Request dispatch
//!
//! This module handles:
//! - Reading the single request line of a connection
//! - Firing the launch trigger for `launch` commands
//! - Routing the request to its executor and writing the response back
//! - Containing every per-connection failure to that connection

mod dispatcher;

pub use dispatcher::RequestDispatcher;
