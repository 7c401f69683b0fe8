//! Request dispatcher - reads one request per connection and routes it

use crate::config::{ErrorReplyMode, RelayConfig};
use crate::error::DispatchError;
use crate::executor::ExecutorRegistry;
use crate::launch::LaunchTrigger;
use crate::transport::ClientConnection;
use relay_shared::{CommandRequest, ErrorReply};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Routes requests to registered executors
pub struct RequestDispatcher {
    registry: Arc<ExecutorRegistry>,
    launcher: Arc<LaunchTrigger>,
    config: Arc<RelayConfig>,
}

impl RequestDispatcher {
    /// Create a new request dispatcher
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        launcher: Arc<LaunchTrigger>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            registry,
            launcher,
            config,
        }
    }

    /// Serve one connection to completion
    ///
    /// Never fails: errors are logged, optionally reported to the client, and
    /// the connection is closed on every path.
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("[DISPATCH] Connection established with {}", peer);
        let mut conn = ClientConnection::new(stream, self.config.max_line_bytes);

        let written = match self.process(&mut conn).await {
            Ok(Some(response)) => conn.write_line(&response).await,
            Ok(None) => {
                debug!("[DISPATCH] {} closed without sending a request", peer);
                Ok(())
            }
            Err(e) => {
                warn!("[DISPATCH] Failed to process request from {}: {}", peer, e);
                self.report(&mut conn, &e).await
            }
        };

        if let Err(e) = written {
            warn!("[DISPATCH] Failed to reply to {}: {}", peer, e);
        }
        if let Err(e) = conn.close().await {
            warn!("[DISPATCH] Error while closing connection to {}: {}", peer, e);
        }
    }

    async fn process<S>(
        &self,
        conn: &mut ClientConnection<S>,
    ) -> Result<Option<String>, DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(line) = conn.read_line_within(self.config.read_timeout).await? else {
            return Ok(None);
        };
        debug!("[DISPATCH] Received: '{}'", line);

        let request = CommandRequest::parse(&line)?;
        self.dispatch(&request).await.map(Some)
    }

    /// Fire the launch trigger if asked to, then hand the request to its executor
    pub async fn dispatch(&self, request: &CommandRequest) -> Result<String, DispatchError> {
        if request.is_launch() && self.launcher.is_registered().await {
            let args = request.launch_args()?;
            debug!("[DISPATCH] Received launch command for {}", request.executor_id);
            let outcome = self.launcher.invoke(args).await;
            debug!(
                "[DISPATCH] Launch for {} finished: {:?}",
                request.executor_id, outcome
            );
            self.registry.mark_active(&request.executor_id).await;
        }

        info!(
            "[DISPATCH] Sending command to executor id: {}",
            request.executor_id
        );
        let executor = self.registry.lookup(&request.executor_id).await?;
        let response = executor
            .handle(&request.raw)
            .await
            .map_err(|source| DispatchError::Executor {
                executor_id: request.executor_id.clone(),
                source,
            })?;
        self.registry.mark_active(&request.executor_id).await;

        debug!("[DISPATCH] Command response is: {}", response);
        Ok(response)
    }

    /// Tell the client what went wrong, if configured to
    async fn report<S>(
        &self,
        conn: &mut ClientConnection<S>,
        error: &DispatchError,
    ) -> Result<(), DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.config.error_replies == ErrorReplyMode::Silent || !error.is_reportable() {
            return Ok(());
        }

        let reply = ErrorReply::new(error.kind(), error.to_string());
        match reply.to_line() {
            Ok(line) => conn.write_line(&line).await,
            Err(e) => {
                warn!("[DISPATCH] Failed to encode error reply: {}", e);
                Ok(())
            }
        }
    }
}
