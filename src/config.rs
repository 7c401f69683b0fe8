//! Relay configuration

use relay_shared::timing;
use std::time::Duration;

/// What the client sees when a request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorReplyMode {
    /// Close the connection without writing anything
    #[default]
    Silent,
    /// Write one `{"error":{...}}` line before closing
    Structured,
}

/// Configuration for the relay server
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind; the port is given per start/rebind call
    pub host: String,
    /// Consecutive accept failures tolerated before the listener stops
    pub max_accept_retries: u32,
    /// Pause after a failed accept
    pub accept_backoff: Duration,
    /// Upper bound on waiting for the old listener to exit during a port change
    pub rebind_grace: Duration,
    /// Upper bound on waiting for a launched instrumentation to report ready
    pub launch_settle: Duration,
    /// Bound on waiting for the request line. `None` waits forever,
    /// so a client that never sends stalls the relay.
    pub read_timeout: Option<Duration>,
    /// Longest accepted request line, newline included
    pub max_line_bytes: usize,
    pub error_replies: ErrorReplyMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            max_accept_retries: timing::MAX_ACCEPT_RETRIES,
            accept_backoff: Duration::from_millis(timing::ACCEPT_ERROR_BACKOFF_MS),
            rebind_grace: Duration::from_millis(timing::REBIND_GRACE_MS),
            launch_settle: Duration::from_millis(timing::LAUNCH_SETTLE_MS),
            read_timeout: None,
            max_line_bytes: timing::MAX_LINE_BYTES,
            error_replies: ErrorReplyMode::Silent,
        }
    }
}
