//! Echo executor

use super::Executor;
use async_trait::async_trait;
use tracing::debug;

/// Answers every request with the request line itself
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn handle(&self, raw_line: &str) -> anyhow::Result<String> {
        debug!("[ECHO] {}", raw_line);
        Ok(raw_line.to_string())
    }
}
