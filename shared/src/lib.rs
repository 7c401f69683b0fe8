//! Command Relay Shared Protocol Types
//!
//! This crate provides the wire types, line codec and listener state machine
//! shared between the relay server and the test-driver client.

pub mod codec;
pub mod request;
pub mod state_machine;

pub use request::{CommandRequest, ErrorBody, ErrorReply, LaunchArgs, RequestError};

/// Command name that asks the relay to fire the instrumentation launcher
pub const LAUNCH_COMMAND: &str = "launch";

/// Timing and sizing parameters for the relay
pub mod timing {
    /// Consecutive accept failures tolerated before the listener gives up
    pub const MAX_ACCEPT_RETRIES: u32 = 10;

    /// Pause after a failed accept before trying again
    pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 150;

    /// Upper bound on waiting for the old listener to exit when changing port
    pub const REBIND_GRACE_MS: u64 = 1000;

    /// Upper bound on waiting for a launched instrumentation to come up
    pub const LAUNCH_SETTLE_MS: u64 = 5000;

    /// Maximum accepted request line, newline included
    pub const MAX_LINE_BYTES: usize = 64 * 1024;
}
