//! Launcher that spawns an external program

use super::{InstrumentationLauncher, ReadySignal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Spawns `program [args..] <target> <executor_id> <extra>` and does not wait for it
///
/// The program has no way to report readiness, so every launch waits out
/// the relay's settle interval.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Create a launcher for the given program
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Fixed arguments placed before the launch arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl InstrumentationLauncher for ProcessLauncher {
    async fn launch(
        &self,
        target: &str,
        executor_id: &str,
        extra: &str,
        _ready: ReadySignal,
    ) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .args([target, executor_id, extra])
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        info!(
            "[LAUNCH] Spawned {} (pid {:?}) for {}",
            self.program.display(),
            child.id(),
            executor_id
        );
        Ok(())
    }
}
