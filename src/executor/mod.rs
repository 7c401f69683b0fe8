//! Executor registry and built-in executors
//!
//! This module handles:
//! - The capability a registered executor exposes to the relay
//! - Mapping executor IDs to executors (re-registration overwrites)
//! - Tracking the most recently active executor ID

mod echo;
mod registry;

pub use echo::EchoExecutor;
pub use registry::ExecutorRegistry;

use async_trait::async_trait;

/// A handler that answers requests routed to its executor ID
#[async_trait]
pub trait Executor: Send + Sync {
    /// Produce the response line for a request
    ///
    /// `raw_line` is the request exactly as received, without its newline.
    /// The returned text is written back to the client as one line.
    async fn handle(&self, raw_line: &str) -> anyhow::Result<String>;
}
