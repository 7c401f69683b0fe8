//! Launch trigger holding the registered launcher

use super::{InstrumentationLauncher, ReadySignal};
use relay_shared::LaunchArgs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Result of firing the launch trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// No launcher registered, nothing happened
    Skipped,
    /// Launcher reported ready before the settle interval ran out
    Acknowledged,
    /// Settle interval elapsed
    Settled,
    /// Launcher returned an error
    Failed,
    /// Launcher call itself outlasted the settle interval
    TimedOut,
}

/// Holds at most one launcher; re-registration overwrites
pub struct LaunchTrigger {
    launcher: RwLock<Option<Arc<dyn InstrumentationLauncher>>>,
    settle: Duration,
}

impl LaunchTrigger {
    /// Create an empty trigger with the given settle interval
    pub fn new(settle: Duration) -> Self {
        Self {
            launcher: RwLock::new(None),
            settle,
        }
    }

    /// Register the launcher, replacing any previous one
    pub async fn register(&self, launcher: Arc<dyn InstrumentationLauncher>) {
        debug!("Registering instrumentation launcher");
        *self.launcher.write().await = Some(launcher);
    }

    /// Check if a launcher is registered
    pub async fn is_registered(&self) -> bool {
        self.launcher.read().await.is_some()
    }

    /// Fire the launcher and wait for readiness
    ///
    /// Does nothing if no launcher is registered. The launcher call and the
    /// readiness wait together never take longer than the settle interval.
    pub async fn invoke(&self, args: LaunchArgs<'_>) -> LaunchOutcome {
        let Some(launcher) = self.launcher.read().await.clone() else {
            debug!("No launcher registered, skipping launch");
            return LaunchOutcome::Skipped;
        };

        info!(
            "[LAUNCH] target={} executor={} extra={}",
            args.target, args.executor_id, args.extra
        );

        let (ready, ack) = ReadySignal::channel();
        let deadline = Instant::now() + self.settle;
        let launched = timeout_at(
            deadline,
            launcher.launch(args.target, args.executor_id, args.extra, ready),
        )
        .await;

        match launched {
            Ok(Ok(())) => self.wait_ready(ack, deadline).await,
            Ok(Err(e)) => {
                warn!("[LAUNCH] Launcher failed for {}: {:#}", args.executor_id, e);
                LaunchOutcome::Failed
            }
            Err(_) => {
                warn!(
                    "[LAUNCH] Launcher for {} still running after {:?}, not waiting for it",
                    args.executor_id, self.settle
                );
                LaunchOutcome::TimedOut
            }
        }
    }

    async fn wait_ready(&self, ack: oneshot::Receiver<()>, deadline: Instant) -> LaunchOutcome {
        match timeout_at(deadline, ack).await {
            Ok(Ok(())) => {
                debug!("[LAUNCH] Instrumentation reported ready");
                LaunchOutcome::Acknowledged
            }
            Ok(Err(_)) => {
                // Launcher dropped the signal; fall back to the fixed settle delay
                sleep_until(deadline).await;
                LaunchOutcome::Settled
            }
            Err(_) => {
                debug!("[LAUNCH] Settle interval elapsed without acknowledgment");
                LaunchOutcome::Settled
            }
        }
    }
}
