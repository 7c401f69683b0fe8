//! Instrumentation launch trigger
//!
//! This module handles:
//! - The single registered launcher capability
//! - Firing it once per qualifying `launch` request
//! - Waiting, bounded by the settle interval, for the launched side to report ready

mod process;
mod trigger;

pub use process::ProcessLauncher;
pub use trigger::{LaunchOutcome, LaunchTrigger};

use async_trait::async_trait;
use tokio::sync::oneshot;

/// Starts an external instrumentation process on a `launch` command
#[async_trait]
pub trait InstrumentationLauncher: Send + Sync {
    /// Start the instrumentation for `target` on behalf of `executor_id`
    ///
    /// Call [`ReadySignal::acknowledge`] once the instrumentation can take
    /// requests. Dropping the signal instead makes the relay wait out the
    /// full settle interval.
    async fn launch(
        &self,
        target: &str,
        executor_id: &str,
        extra: &str,
        ready: ReadySignal,
    ) -> anyhow::Result<()>;
}

/// One-shot readiness acknowledgment handed to a launcher
#[derive(Debug)]
pub struct ReadySignal {
    tx: oneshot::Sender<()>,
}

impl ReadySignal {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report that the launched instrumentation is ready
    pub fn acknowledge(self) {
        // Receiver is gone once the settle interval has passed
        let _ = self.tx.send(());
    }
}
