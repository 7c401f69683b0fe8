use anyhow::Context;
use clap::Parser;
use command_relay::{EchoExecutor, ErrorReplyMode, ProcessLauncher, RelayConfig, RelayServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Relay line-delimited JSON commands to registered executors
#[derive(Parser, Debug)]
#[command(name = "command-relay", version, about)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Upper bound on waiting for a launched instrumentation, in milliseconds
    #[arg(long, default_value_t = relay_shared::timing::LAUNCH_SETTLE_MS)]
    launch_settle_ms: u64,

    /// Upper bound on waiting for the old listener during a port change, in milliseconds
    #[arg(long, default_value_t = relay_shared::timing::REBIND_GRACE_MS)]
    rebind_grace_ms: u64,

    /// Drop connections that send no request line within this many seconds
    #[arg(long)]
    read_timeout_secs: Option<u64>,

    /// Consecutive accept failures tolerated before the listener stops
    #[arg(long, default_value_t = relay_shared::timing::MAX_ACCEPT_RETRIES)]
    max_accept_retries: u32,

    /// Write an error line to the client instead of closing silently
    #[arg(long)]
    structured_errors: bool,

    /// Program run on `launch` commands with `<target> <executorID> <extra>`
    #[arg(long)]
    launch_program: Option<PathBuf>,

    /// Register a built-in echo executor under this ID
    #[arg(long, default_value = "echo")]
    echo_executor: String,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            max_accept_retries: self.max_accept_retries,
            rebind_grace: Duration::from_millis(self.rebind_grace_ms),
            launch_settle: Duration::from_millis(self.launch_settle_ms),
            read_timeout: self.read_timeout_secs.map(Duration::from_secs),
            error_replies: if self.structured_errors {
                ErrorReplyMode::Structured
            } else {
                ErrorReplyMode::Silent
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let server = RelayServer::new(args.relay_config());

    if !args.echo_executor.is_empty() {
        server
            .register_executor(args.echo_executor.clone(), Arc::new(EchoExecutor))
            .await;
        info!("Echo executor registered as {}", args.echo_executor);
    }

    if server.registry().is_empty().await {
        warn!("No executors registered, every request will be dropped");
    }

    if let Some(program) = &args.launch_program {
        server
            .register_instrumentation_launcher(Arc::new(ProcessLauncher::new(program)))
            .await;
        info!("Launch program: {}", program.display());
    }

    let addr = server
        .start_server_communication(args.port)
        .await
        .context("Failed to start relay")?;
    info!("Command relay ready on {}", addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        _ = server.wait_stopped() => {
            warn!("Listener stopped on its own");
        }
    }

    server.stop_server_communication().await;
    let last = server.last_executor_id().await;
    if !last.is_empty() {
        info!("Last active executor: {}", last);
    }
    info!("Command relay shut down");
    Ok(())
}
