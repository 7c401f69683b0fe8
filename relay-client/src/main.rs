use anyhow::Context;
use clap::Parser;
use relay_shared::codec::{encode_line, LineDecoder};
use relay_shared::CommandRequest;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Send one command to a command relay and print the response line
#[derive(Parser, Debug)]
#[command(name = "relay-client", version, about)]
struct Args {
    /// Relay host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Relay port
    #[arg(short, long)]
    port: u16,

    /// Executor ID to route to
    #[arg(short, long)]
    executor: String,

    /// Command name
    #[arg(short, long)]
    command: String,

    /// Give up waiting for the response after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Command parameters
    params: Vec<String>,
}

/// Send `request` as one line and read back at most one response line
///
/// Returns `None` when the relay closed the connection without answering.
async fn send_request(addr: &str, request: &CommandRequest) -> anyhow::Result<Option<String>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    debug!("Connected to {}", addr);

    let line = request.to_line()?;
    stream.write_all(&encode_line(&line)).await?;
    stream.flush().await?;

    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; 4096];
    loop {
        if let Some(response) = decoder.decode_next()? {
            return Ok(Some(response));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(decoder.finish()?);
        }
        decoder.extend(&buf[..n]);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let request = CommandRequest::new(args.executor, args.command, args.params);

    let limit = Duration::from_secs(args.timeout_secs);
    let response = timeout(limit, send_request(&addr, &request))
        .await
        .with_context(|| format!("No response from {} within {:?}", addr, limit))??;

    match response {
        Some(line) => println!("{}", line),
        None => info!("Relay closed the connection without a response"),
    }
    Ok(())
}
